//! Stage 5: element-number parsing (§4.2 step 5).

use super::lexicon::{is_valid_element, LexiconSnapshot};
use regex::Regex;
use std::sync::OnceLock;

fn digit_pair_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d)[ \t-]?(\d)").expect("valid regex"))
}

/// Rewrite `d[\s-]?d` digit pairs that form valid FDI element numbers.
///
/// Runs after Dutch number-word resolution, so digit pairs may originate
/// from literal digits (`1-4`) or from resolved number words (`een vier` →
/// `1 4`); both are handled identically here.
#[must_use]
pub fn rewrite_elements(text: &str, lexicon: &LexiconSnapshot) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;

    for m in digit_pair_re().find_iter(text) {
        if m.start() < cursor {
            continue; // consumed by a previous, overlapping replacement
        }
        let d1: u8 = m.as_str().as_bytes()[0] - b'0';
        let d2 = *m
            .as_str()
            .as_bytes()
            .last()
            .expect("regex guarantees a second digit") - b'0';
        let value = d1 * 10 + d2;

        out.push_str(&text[cursor..m.start()]);

        if followed_by_unit(text, m.end(), lexicon) || !is_valid_element(value) {
            out.push_str(m.as_str());
        } else if let Some(trigger_end) = trigger_immediately_before(text, m.start(), lexicon) {
            // Trigger already emitted as part of the untouched prefix up to
            // `trigger_end`; just drop in the combined digits here.
            debug_assert!(trigger_end <= m.start());
            out.push_str(&format!("{value:02}"));
        } else {
            out.push_str(&format!("element {value:02}"));
        }

        cursor = m.end();
    }
    out.push_str(&text[cursor..]);

    dedupe_adjacent_elements(&out)
}

/// True if a recognized unit word follows immediately (optional single space).
fn followed_by_unit(text: &str, after: usize, lexicon: &LexiconSnapshot) -> bool {
    let rest = &text[after..];
    let rest = rest.strip_prefix(' ').unwrap_or(rest);
    let word: String = rest
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '%')
        .collect();
    let word_lower = word.to_lowercase();
    lexicon.units.contains(&word_lower)
}

/// If the word immediately preceding `before` (skipping whitespace) is a
/// dental-context trigger, return the byte offset where that word ends.
fn trigger_immediately_before(
    text: &str,
    before: usize,
    lexicon: &LexiconSnapshot,
) -> Option<usize> {
    let prefix = &text[..before];
    let trimmed_end = prefix.trim_end();
    let gap = trimmed_end.len();
    if gap == 0 {
        return None;
    }
    let word_start = trimmed_end
        .char_indices()
        .rev()
        .take_while(|&(_, c)| c.is_alphabetic())
        .last()
        .map(|(i, _)| i)?;
    let word = &trimmed_end[word_start..];
    if lexicon
        .dental_context_triggers
        .contains(&word.to_lowercase())
    {
        Some(gap)
    } else {
        None
    }
}

/// Collapse `element NN element NN` into a single `element NN`.
fn dedupe_adjacent_elements(text: &str) -> String {
    let tokens: Vec<&str> = text.split(' ').collect();
    let mut out: Vec<&str> = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        if i + 3 < tokens.len()
            && tokens[i].eq_ignore_ascii_case("element")
            && tokens[i + 2].eq_ignore_ascii_case("element")
            && tokens[i + 1] == tokens[i + 3]
        {
            out.push(tokens[i]);
            out.push(tokens[i + 1]);
            i += 4;
        } else {
            out.push(tokens[i]);
            i += 1;
        }
    }
    out.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hyphenated_pair_becomes_element() {
        let lex = LexiconSnapshot::with_defaults();
        assert_eq!(rewrite_elements("1-4", &lex), "element 14");
    }

    #[test]
    fn trigger_word_keeps_pair_in_place() {
        let lex = LexiconSnapshot::with_defaults();
        assert_eq!(rewrite_elements("element 1 4 distaal", &lex), "element 14 distaal");
        assert_eq!(rewrite_elements("kies 2 6", &lex), "kies 26");
    }

    #[test]
    fn comma_separated_digits_are_not_combined() {
        let lex = LexiconSnapshot::with_defaults();
        assert_eq!(rewrite_elements("1, 2, 3", &lex), "1, 2, 3");
    }

    #[test]
    fn pair_followed_by_unit_is_left_alone() {
        let lex = LexiconSnapshot::with_defaults();
        assert_eq!(rewrite_elements("1 5mm", &lex), "1 5mm");
    }

    #[test]
    fn invalid_range_is_left_alone() {
        let lex = LexiconSnapshot::with_defaults();
        assert_eq!(rewrite_elements("7-9", &lex), "7-9");
    }

    #[test]
    fn dedupes_adjacent_identical_elements() {
        let lex = LexiconSnapshot::with_defaults();
        assert_eq!(
            rewrite_elements("element 14 element 14", &lex),
            "element 14"
        );
    }
}
