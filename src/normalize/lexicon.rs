//! [`LexiconSnapshot`]: the immutable, per-admin dataset the normalizer
//! pipeline reads. Snapshots are produced by [`crate::store::ConfigStore`]
//! and shared read-only via [`std::sync::Arc`]; admin edits replace the
//! `Arc` wholesale rather than mutating it in place.

use std::collections::{HashMap, HashSet};

/// FDI tooth-notation quadrant ranges that are valid element numbers (§4.2 step 5).
pub const VALID_ELEMENT_RANGES: &[(u8, u8)] = &[
    (11, 18),
    (21, 28),
    (31, 38),
    (41, 48),
    (51, 55),
    (61, 65),
    (71, 75),
    (81, 85),
];

/// Returns true if `n` falls in one of the FDI quadrant ranges.
#[must_use]
pub fn is_valid_element(n: u8) -> bool {
    VALID_ELEMENT_RANGES.iter().any(|&(lo, hi)| n >= lo && n <= hi)
}

/// Words that, near a digit pair, mark it as dental/tooth context (§4.2 step 4/5).
pub const DEFAULT_DENTAL_CONTEXT_TRIGGERS: &[&str] =
    &["element", "tand", "kies", "molaar", "premolaar"];

/// Units recognized by the unit-protection and unit-compaction stages.
pub const DEFAULT_UNITS: &[&str] = &["mm", "cm", "ml", "%", "procent"];

/// Immutable, per-admin normalization dataset (§3 `LexiconSnapshot`).
#[derive(Debug, Clone, Default)]
pub struct LexiconSnapshot {
    /// Canonical terms, exact case as configured by the admin.
    pub canonical_terms: HashSet<String>,
    /// Category name → canonical terms in that category.
    pub categories: HashMap<String, Vec<String>>,
    /// Category name → (lowercase variant → canonical term).
    pub variants_by_category: HashMap<String, HashMap<String, String>>,
    /// Words that must never be rewritten by fuzzy/phonetic stages.
    pub protected_words: HashSet<String>,
    /// Case-insensitive whole-word replacements applied early (e.g. `karius → cariës`).
    pub custom_patterns: HashMap<String, String>,
    /// Soundex bucket → candidate canonical terms.
    pub soundex_index: HashMap<String, Vec<String>>,
    /// Lowercase variant → canonical term, flattened across all categories.
    pub variant_to_canonical: HashMap<String, String>,
    /// Lowercase multi-word phrase → canonical replacement, matched whole
    /// before any single-word stage runs (§6 `/api/lexicon/add-multiword-variant`).
    pub multiword_variants: HashMap<String, String>,
    /// Dutch number words (`een` → 1, …) used by the Dutch number-word stage.
    pub number_words: HashMap<String, u8>,
    /// Hyphenated terms kept verbatim by the hyphen-policy stage.
    pub canonical_hyphenated: HashSet<String>,
    /// Dental-context trigger words (§4.2 step 4/5).
    pub dental_context_triggers: HashSet<String>,
    /// Recognized unit suffixes (§4.2 steps 1/8).
    pub units: HashSet<String>,
    /// Morphological suffix groups; fuzzy matches may not cross group boundaries.
    pub suffix_groups: HashMap<String, String>,
    /// Minimum normalized similarity score to accept a fuzzy/phonetic match.
    pub min_similarity_threshold: f32,
}

impl LexiconSnapshot {
    /// Build a snapshot with the built-in dental defaults and no learned terms.
    ///
    /// Used when an admin has no stored lexicon yet, and as the baseline for
    /// tests of the normalizer pipeline.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut number_words = HashMap::new();
        for (word, digit) in DEFAULT_DUTCH_NUMBER_WORDS {
            number_words.insert((*word).to_owned(), *digit);
        }

        let mut canonical_hyphenated = HashSet::new();
        for term in DEFAULT_CANONICAL_HYPHENATED {
            canonical_hyphenated.insert((*term).to_owned());
        }

        let mut dental_context_triggers = HashSet::new();
        for trigger in DEFAULT_DENTAL_CONTEXT_TRIGGERS {
            dental_context_triggers.insert((*trigger).to_owned());
        }

        let mut units = HashSet::new();
        for unit in DEFAULT_UNITS {
            units.insert((*unit).to_owned());
        }

        let mut custom_patterns = HashMap::new();
        custom_patterns.insert("karius".to_owned(), "cariës".to_owned());

        let mut canonical_terms = HashSet::new();
        canonical_terms.insert("cariës".to_owned());
        canonical_terms.insert("peri-apicaal".to_owned());
        canonical_terms.insert("mesio-occlusaal".to_owned());

        Self {
            canonical_terms,
            categories: HashMap::new(),
            variants_by_category: HashMap::new(),
            protected_words: HashSet::new(),
            custom_patterns,
            soundex_index: HashMap::new(),
            variant_to_canonical: HashMap::new(),
            multiword_variants: HashMap::new(),
            number_words,
            canonical_hyphenated,
            dental_context_triggers,
            units,
            suffix_groups: HashMap::new(),
            min_similarity_threshold: 0.8,
        }
    }

    /// Replace or add a canonical term in a category, keeping all indices
    /// (soundex bucket, flattened variant map) consistent.
    pub fn add_canonical(&mut self, category: &str, term: &str) {
        self.canonical_terms.insert(term.to_owned());
        self.categories
            .entry(category.to_owned())
            .or_default()
            .push(term.to_owned());
        self.index_term(term);
    }

    /// Remove a canonical term from a category and all derived indices.
    pub fn remove_canonical(&mut self, category: &str, term: &str) {
        self.canonical_terms.remove(term);
        if let Some(terms) = self.categories.get_mut(category) {
            terms.retain(|t| t != term);
        }
        let bucket = super::soundex::soundex(term);
        if let Some(candidates) = self.soundex_index.get_mut(&bucket) {
            candidates.retain(|c| c != term);
        }
    }

    /// Register a variant spelling that should resolve to `canonical` within `category`.
    pub fn add_variant(&mut self, category: &str, variant: &str, canonical: &str) {
        let variant_lower = variant.to_lowercase();
        self.variants_by_category
            .entry(category.to_owned())
            .or_default()
            .insert(variant_lower.clone(), canonical.to_owned());
        self.variant_to_canonical
            .insert(variant_lower, canonical.to_owned());
    }

    /// Register a multi-word phrase that resolves to `canonical` wherever it
    /// appears as a contiguous, case-insensitive run of words.
    pub fn add_multiword_variant(&mut self, phrase: &str, canonical: &str) {
        self.multiword_variants
            .insert(phrase.to_lowercase(), canonical.to_owned());
    }

    fn index_term(&mut self, term: &str) {
        let bucket = super::soundex::soundex(term);
        let candidates = self.soundex_index.entry(bucket).or_default();
        if !candidates.iter().any(|c| c == term) {
            candidates.push(term.to_owned());
        }
    }
}

/// Dutch number words 0–9 plus `tien` recognized by the number-word stage.
pub const DEFAULT_DUTCH_NUMBER_WORDS: &[(&str, u8)] = &[
    ("nul", 0),
    ("een", 1),
    ("één", 1),
    ("twee", 2),
    ("drie", 3),
    ("vier", 4),
    ("vijf", 5),
    ("zes", 6),
    ("zeven", 7),
    ("acht", 8),
    ("negen", 9),
];

/// Hyphenated dental terms kept verbatim by the hyphen-policy stage (§4.2 step 6).
pub const DEFAULT_CANONICAL_HYPHENATED: &[&str] = &["peri-apicaal", "mesio-occlusaal"];
