//! C2 — the domain text normalizer (§4.2).
//!
//! A deterministic, lexicon-driven rewriter applied to raw ASR output: no
//! network I/O, total over its input, idempotent on its own output for a
//! fixed [`LexiconSnapshot`].

pub mod elements;
pub mod lexicon;
pub mod numbers;
pub mod protect;
pub mod soundex;

pub use lexicon::LexiconSnapshot;

/// Run the full ten-stage normalization pipeline over `text`.
///
/// `language` is currently informational (the lexicon already carries the
/// Dutch-specific rule tables); it is threaded through so a future
/// multi-language lexicon can select rule tables by tag without changing
/// this signature.
#[must_use]
pub fn normalize(text: &str, lex: &LexiconSnapshot, _language: &str) -> String {
    // 0. Multi-word phrase resolution, ahead of the single-word pipeline.
    let text = apply_multiword_variants(text, lex);

    // 1. Protection scan.
    let protection = protect::protect(&text, lex);
    let mut s = protection.masked;

    // 2. Custom-pattern map.
    s = apply_custom_patterns(&s, lex);

    // 3. Article cleanup.
    s = article_cleanup(&s);

    // 4. Dutch number-word resolution.
    s = numbers::resolve_number_words(&s, lex);

    // 5. Element-number parsing.
    s = elements::rewrite_elements(&s, lex);

    // 6. Hyphen policy.
    s = hyphen_policy(&s, lex);

    // 7. Phonetic/fuzzy match.
    s = phonetic_match(&s, lex);

    // 8. Unit compaction (word-form units; protected unit expressions were
    //    already compacted when they were masked in stage 1).
    s = compact_word_units(&s);

    // 9. Post-process punctuation.
    s = post_process_punctuation(&s);

    // 10. Canonical capitalization.
    s = canonical_capitalization(&s, lex);

    // Restore protected spans last, so none of stages 2-10 ever see them.
    protection.restore(s)
}

/// Stage 0: case-insensitive replacement of admin-registered multi-word
/// phrases, longest phrase first so a three-word entry wins over a
/// two-word prefix of it.
fn apply_multiword_variants(text: &str, lex: &LexiconSnapshot) -> String {
    if lex.multiword_variants.is_empty() {
        return text.to_owned();
    }
    let mut phrases: Vec<(&str, &str)> = lex
        .multiword_variants
        .iter()
        .map(|(phrase, canonical)| (phrase.as_str(), canonical.as_str()))
        .collect();
    phrases.sort_by_key(|(phrase, _)| std::cmp::Reverse(phrase.split(' ').count()));

    let words: Vec<&str> = text.split(' ').collect();
    let mut out: Vec<String> = Vec::with_capacity(words.len());
    let mut i = 0;
    'words: while i < words.len() {
        for (phrase, canonical) in &phrases {
            let phrase_words: Vec<&str> = phrase.split(' ').collect();
            if i + phrase_words.len() > words.len() {
                continue;
            }
            let matches = words[i..i + phrase_words.len()]
                .iter()
                .zip(&phrase_words)
                .all(|(w, p)| w.eq_ignore_ascii_case(p));
            if matches {
                out.push((*canonical).to_owned());
                i += phrase_words.len();
                continue 'words;
            }
        }
        out.push(words[i].to_owned());
        i += 1;
    }
    out.join(" ")
}

/// Stage 2: case-insensitive whole-word replacement from `custom_patterns`.
fn apply_custom_patterns(text: &str, lex: &LexiconSnapshot) -> String {
    if lex.custom_patterns.is_empty() {
        return text.to_owned();
    }
    map_words(text, |core| {
        lex.custom_patterns.get(&core.to_lowercase()).cloned()
    })
}

/// Stage 3: remove a leading `de`/`het` immediately before a number or `element`.
fn article_cleanup(text: &str) -> String {
    let words: Vec<&str> = text.split(' ').collect();
    let mut out: Vec<&str> = Vec::with_capacity(words.len());
    let mut i = 0;
    while i < words.len() {
        let is_article = words[i].eq_ignore_ascii_case("de") || words[i].eq_ignore_ascii_case("het");
        let next_is_number_or_element = words
            .get(i + 1)
            .is_some_and(|w| w.eq_ignore_ascii_case("element") || w.chars().next().is_some_and(|c| c.is_ascii_digit()));
        if is_article && next_is_number_or_element {
            i += 1;
            continue;
        }
        out.push(words[i]);
        i += 1;
    }
    out.join(" ")
}

/// Stage 6: replace hyphens with spaces, except in canonical hyphenated terms.
fn hyphen_policy(text: &str, lex: &LexiconSnapshot) -> String {
    map_words_with_punct(text, |core| {
        if core.contains('-') && !lex.canonical_hyphenated.contains(&core.to_lowercase()) {
            Some(core.replace('-', " "))
        } else {
            None
        }
    })
}

/// Stage 7: exact lexicon hit, else soundex-bucketed fuzzy match.
fn phonetic_match(text: &str, lex: &LexiconSnapshot) -> String {
    map_words(text, |core| {
        if core.is_empty() || core.chars().all(|c| c.is_ascii_digit() || c == '%') {
            return None;
        }
        let lower = core.to_lowercase();

        if lex.canonical_terms.contains(&lower) || lex.canonical_terms.iter().any(|t| t.to_lowercase() == lower) {
            return None; // already canonical; capitalization restored in stage 10
        }
        if let Some(canonical) = lex.variant_to_canonical.get(&lower) {
            return Some(canonical.clone());
        }
        if lex.protected_words.contains(&core.to_owned()) || core.chars().count() < 4 {
            return None;
        }

        let bucket = soundex::soundex(core);
        let candidates = lex.soundex_index.get(&bucket)?;

        let mut best: Option<(&str, f32)> = None;
        for candidate in candidates {
            if !same_suffix_group(core, candidate, lex) {
                continue;
            }
            let score = soundex::similarity(core, candidate);
            if best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((candidate.as_str(), score));
            }
        }

        match best {
            Some((candidate, score)) if score >= lex.min_similarity_threshold => Some(candidate.to_owned()),
            _ => None,
        }
    })
}

/// Morphological suffix class must match within a configured group (§4.2 step 7).
fn same_suffix_group(a: &str, b: &str, lex: &LexiconSnapshot) -> bool {
    if lex.suffix_groups.is_empty() {
        return true;
    }
    let group_of = |word: &str| -> Option<&String> {
        lex.suffix_groups
            .iter()
            .find(|(suffix, _)| word.to_lowercase().ends_with(suffix.as_str()))
            .map(|(_, group)| group)
    };
    match (group_of(a), group_of(b)) {
        (Some(ga), Some(gb)) => ga == gb,
        _ => true,
    }
}

/// Stage 8 (word form): `procent` → `%` with no intervening space.
fn compact_word_units(text: &str) -> String {
    let words: Vec<&str> = text.split(' ').collect();
    let mut out: Vec<String> = Vec::with_capacity(words.len());
    let mut i = 0;
    while i < words.len() {
        let is_number = words[i].chars().all(|c| c.is_ascii_digit());
        if is_number
            && words
                .get(i + 1)
                .is_some_and(|w| w.eq_ignore_ascii_case("procent"))
        {
            out.push(format!("{}%", words[i]));
            i += 2;
            continue;
        }
        out.push(words[i].to_owned());
        i += 1;
    }
    out.join(" ")
}

/// Stage 9: trailing `!`/`?`/`;` removal, a dangling trailing comma, and a
/// sentence-final period not adjacent to a digit.
///
/// These all apply only at the very end of the string — mid-sentence
/// punctuation (e.g. the commas in `"1, 2, 3"`) is left alone.
fn post_process_punctuation(text: &str) -> String {
    let trimmed = text.trim_end();
    let trimmed = trimmed.trim_end_matches(['!', '?', ';']);
    let trimmed = trimmed.strip_suffix(',').unwrap_or(trimmed);

    match trimmed.strip_suffix('.') {
        Some(rest) if !rest.chars().last().is_some_and(|c| c.is_ascii_digit()) => rest.to_owned(),
        _ => trimmed.to_owned(),
    }
}

/// Stage 10: restore exact case for tokens whose lowercase form is canonical.
fn canonical_capitalization(text: &str, lex: &LexiconSnapshot) -> String {
    if lex.canonical_terms.is_empty() {
        return text.to_owned();
    }
    map_words(text, |core| {
        let lower = core.to_lowercase();
        lex.canonical_terms
            .iter()
            .find(|t| t.to_lowercase() == lower)
            .filter(|&t| t != core)
            .cloned()
    })
}

/// Apply `f` to the alphanumeric core of each whitespace-delimited word,
/// replacing the whole word when `f` returns `Some`.
fn map_words(text: &str, f: impl Fn(&str) -> Option<String>) -> String {
    map_words_with_punct(text, f)
}

/// Like [`map_words`], but operates on the punctuation-stripped core and
/// re-attaches leading/trailing punctuation, so a trailing colon or comma
/// survives a word-level rewrite untouched.
fn map_words_with_punct(text: &str, f: impl Fn(&str) -> Option<String>) -> String {
    text.split(' ')
        .map(|word| {
            let (prefix, core, suffix) = split_punct(word);
            match f(core) {
                Some(replacement) => format!("{prefix}{replacement}{suffix}"),
                None => word.to_owned(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn split_punct(word: &str) -> (&str, &str, &str) {
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

    fn lex() -> LexiconSnapshot {
        LexiconSnapshot::with_defaults()
    }

    #[test]
    fn scenario_1_hyphenated_pair() {
        assert_eq!(normalize("1-4", &lex(), "nl"), "element 14");
    }

    #[test]
    fn scenario_2_article_and_prefix() {
        assert_eq!(
            normalize("cariës distaal van de 1-4", &lex(), "nl"),
            "cariës distaal van element 14"
        );
    }

    #[test]
    fn scenario_3_number_words_with_trigger() {
        assert_eq!(
            normalize("element een vier distaal", &lex(), "nl"),
            "element 14 distaal"
        );
    }

    #[test]
    fn scenario_4_custom_pattern_and_trigger() {
        assert_eq!(
            normalize("karius op kies twee zes", &lex(), "nl"),
            "cariës op kies 26"
        );
    }

    #[test]
    fn scenario_5_comma_separated_digits_untouched() {
        assert_eq!(normalize("1, 2, 3", &lex(), "nl"), "1, 2, 3");
    }

    #[test]
    fn scenario_6_unit_and_decimal() {
        assert_eq!(normalize("15 mm pocket", &lex(), "nl"), "15mm pocket");
        assert_eq!(normalize("1,5 jaar", &lex(), "nl"), "1,5 jaar");
    }

    #[test]
    fn normalize_is_idempotent() {
        let l = lex();
        let once = normalize("karius op kies twee zes", &l, "nl");
        let twice = normalize(&once, &l, "nl");
        assert_eq!(once, twice);
    }

    #[test]
    fn canonical_hyphenated_term_survives() {
        let l = lex();
        assert_eq!(normalize("zie peri-apicaal letsel", &l, "nl"), "zie peri-apicaal letsel");
    }

    #[test]
    fn multiword_variant_resolves_before_single_word_stages() {
        let mut l = lex();
        l.add_multiword_variant("wortel kanaal behandeling", "wortelkanaalbehandeling");
        assert_eq!(
            normalize("patiënt kreeg een Wortel Kanaal Behandeling", &l, "nl"),
            "patiënt kreeg een wortelkanaalbehandeling"
        );
    }

    #[test]
    fn protected_word_survives_fuzzy_stage() {
        let mut l = lex();
        l.protected_words.insert("implantaat".to_owned());
        assert_eq!(normalize("nieuw implantaat geplaatst", &l, "nl"), "nieuw implantaat geplaatst");
    }
}
