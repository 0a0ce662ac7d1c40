//! Stage 1: protection scan (§4.2 step 1).
//!
//! Spans matching protected words, unit expressions, decimal numbers, or
//! canonical hyphenated terms are replaced with placeholder tokens so later
//! stages cannot touch them. On restore, decimals and protected words come
//! back byte-for-byte; unit expressions additionally have their internal
//! whitespace collapsed (`15 mm` → `15mm`), which is what step 8's "unit
//! compaction" actually observes for anything protection already swallowed.

use super::lexicon::LexiconSnapshot;
use regex::Regex;
use std::sync::OnceLock;

/// A single masked span: the placeholder text and what to substitute back.
struct Protected {
    placeholder: String,
    restore: String,
}

fn decimal_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+[.,]\d+").expect("valid regex"))
}

fn unit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+\s*(?:mm|cm|ml|%)").expect("valid regex"))
}

/// Placeholders use Unicode Private Use Area code points so they can never
/// collide with real input text.
fn placeholder_for(index: usize) -> String {
    format!("\u{E000}{index}\u{E001}")
}

/// Result of the protection scan: masked text plus the data needed to restore it.
pub struct ProtectionResult {
    pub masked: String,
    restores: Vec<Protected>,
}

impl ProtectionResult {
    /// Restore every placeholder to its final (possibly compacted) text.
    #[must_use]
    pub fn restore(&self, mut text: String) -> String {
        for p in &self.restores {
            text = text.replace(&p.placeholder, &p.restore);
        }
        text
    }
}

/// Run the protection scan over `text`.
#[must_use]
pub fn protect(text: &str, lexicon: &LexiconSnapshot) -> ProtectionResult {
    let mut restores = Vec::new();
    let mut masked = String::with_capacity(text.len());
    let mut cursor = 0usize;

    // Collect all candidate spans (decimals, units, protected words, canonical
    // hyphenated terms) as non-overlapping byte ranges, earliest-first.
    let mut spans: Vec<(usize, usize, bool)> = Vec::new(); // (start, end, is_unit)

    for m in decimal_re().find_iter(text) {
        spans.push((m.start(), m.end(), false));
    }
    for m in unit_re().find_iter(text) {
        spans.push((m.start(), m.end(), true));
    }
    for (start, end) in find_word_spans(text, &lexicon.protected_words) {
        spans.push((start, end, false));
    }
    for (start, end) in find_word_spans(text, &lexicon.canonical_hyphenated) {
        spans.push((start, end, false));
    }

    spans.sort_by_key(|&(start, _, _)| start);

    let mut last_end = 0usize;
    for (start, end, is_unit) in spans {
        if start < last_end {
            continue; // overlapping with an earlier, already-masked span
        }
        masked.push_str(&text[cursor..start]);
        let original = &text[start..end];
        let restore = if is_unit {
            compact_unit_span(original)
        } else {
            original.to_owned()
        };
        let index = restores.len();
        let placeholder = placeholder_for(index);
        masked.push_str(&placeholder);
        restores.push(Protected {
            placeholder,
            restore,
        });
        cursor = end;
        last_end = end;
    }
    masked.push_str(&text[cursor..]);

    ProtectionResult { masked, restores }
}

/// Collapse whitespace between the digits and the unit suffix.
fn compact_unit_span(span: &str) -> String {
    let digits_end = span
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(span.len());
    let (digits, rest) = span.split_at(digits_end);
    format!("{digits}{}", rest.trim_start())
}

/// Find whole-word, case-insensitive occurrences of any string in `terms`.
fn find_word_spans(text: &str, terms: &std::collections::HashSet<String>) -> Vec<(usize, usize)> {
    if terms.is_empty() {
        return Vec::new();
    }
    let lower = text.to_lowercase();
    let mut spans = Vec::new();
    for term in terms {
        let term_lower = term.to_lowercase();
        if term_lower.is_empty() {
            continue;
        }
        let mut start = 0;
        while let Some(pos) = lower[start..].find(&term_lower) {
            let abs_start = start + pos;
            let abs_end = abs_start + term_lower.len();
            let before_ok = abs_start == 0
                || !lower.as_bytes()[abs_start - 1].is_ascii_alphanumeric();
            let after_ok = abs_end == lower.len()
                || !lower.as_bytes()[abs_end].is_ascii_alphanumeric();
            if before_ok && after_ok {
                spans.push((abs_start, abs_end));
            }
            start = abs_start + 1;
        }
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimals_survive_round_trip() {
        let lex = LexiconSnapshot::with_defaults();
        let result = protect("1,5 jaar geleden", &lex);
        assert!(result.masked.contains('\u{E000}'));
        let restored = result.restore(result.masked.clone());
        assert_eq!(restored, "1,5 jaar geleden");
    }

    #[test]
    fn unit_expression_is_compacted_on_restore() {
        let lex = LexiconSnapshot::with_defaults();
        let result = protect("15 mm pocket", &lex);
        let restored = result.restore(result.masked.clone());
        assert_eq!(restored, "15mm pocket");
    }

    #[test]
    fn protected_words_survive_verbatim() {
        let mut lex = LexiconSnapshot::with_defaults();
        lex.protected_words.insert("Implantaat".to_owned());
        let result = protect("zie Implantaat hier", &lex);
        let restored = result.restore(result.masked.clone());
        assert_eq!(restored, "zie Implantaat hier");
    }
}
