//! Stage 4: Dutch number-word resolution (§4.2 step 4).

use super::lexicon::LexiconSnapshot;

/// Replace Dutch number words with digit characters, word by word.
///
/// Combination of adjacent 1-digit numerals into a 2-digit element code is
/// handled downstream by [`super::elements::rewrite_elements`], which runs
/// on the output of this stage and therefore sees plain digit tokens
/// whether they originated as literal digits or number words.
#[must_use]
pub fn resolve_number_words(text: &str, lexicon: &LexiconSnapshot) -> String {
    let mut out_words: Vec<String> = Vec::new();
    for word in text.split(' ') {
        let (prefix, core, suffix) = split_punctuation(word);
        let lower = core.to_lowercase();
        if let Some(&digit) = lexicon.number_words.get(&lower) {
            out_words.push(format!("{prefix}{digit}{suffix}"));
        } else {
            out_words.push(word.to_owned());
        }
    }
    out_words.join(" ")
}

/// Split a whitespace-delimited token into (leading punctuation, core word,
/// trailing punctuation), so a trailing colon/comma is preserved across
/// word-level substitution.
fn split_punctuation(word: &str) -> (&str, &str, &str) {
    let chars: Vec<(usize, char)> = word.char_indices().collect();
    let Some(first_idx) = chars.iter().position(|&(_, c)| c.is_alphanumeric()) else {
        return (word, "", "");
    };
    let last_idx = chars
        .iter()
        .rposition(|&(_, c)| c.is_alphanumeric())
        .expect("first_idx exists so at least one alphanumeric char is present");
    let start_byte = chars[first_idx].0;
    let end_byte = chars[last_idx].0 + chars[last_idx].1.len_utf8();
    (&word[..start_byte], &word[start_byte..end_byte], &word[end_byte..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_single_number_words() {
        let lex = LexiconSnapshot::with_defaults();
        assert_eq!(resolve_number_words("element een vier distaal", &lex), "element 1 4 distaal");
    }

    #[test]
    fn preserves_trailing_punctuation() {
        let lex = LexiconSnapshot::with_defaults();
        assert_eq!(resolve_number_words("kies twee zes.", &lex), "kies 2 6.");
    }

    #[test]
    fn leaves_non_number_words_untouched() {
        let lex = LexiconSnapshot::with_defaults();
        assert_eq!(resolve_number_words("cariës distaal", &lex), "cariës distaal");
    }
}
