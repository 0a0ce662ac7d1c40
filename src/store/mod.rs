//! C1 — per-admin configuration and lexicon loading (§4.1).
//!
//! [`ConfigStore`] is the object-safe boundary to the external key/value
//! document store. The only production implementation (`HttpConfigStore`)
//! is a thin `reqwest` adapter; an in-memory implementation backs tests and
//! local/dev runs when no store URL is configured.

mod http_store;
mod memory_store;

pub use http_store::HttpConfigStore;
pub use memory_store::InMemoryConfigStore;

use crate::error::Result;
use crate::normalize::LexiconSnapshot;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Per-admin configuration document (§3, §6 `/api/ai/config/save`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Default ASR prompt passed to the provider for this admin's requests.
    pub asr_prompt: Option<String>,
    /// Default normalization language tag, e.g. `nl`.
    pub language: String,
    /// Punctuation stripping toggle consumed by Normalizer stage 9.
    pub strip_trailing_punctuation: bool,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            asr_prompt: None,
            language: "nl".to_owned(),
            strip_trailing_punctuation: true,
        }
    }
}

/// A versioned lexicon document as persisted in the external store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LexiconDocument {
    pub version: u64,
    pub categories: std::collections::HashMap<String, Vec<String>>,
    pub variants: std::collections::HashMap<String, std::collections::HashMap<String, String>>,
    pub protected_words: std::collections::HashSet<String>,
    pub custom_patterns: std::collections::HashMap<String, String>,
    pub multiword_variants: std::collections::HashMap<String, String>,
}

/// Object-safe contract for fetching and mutating per-admin config/lexicon
/// state (§4.1). Every mutation persists to the backing store and returns
/// the new version so callers can invalidate local caches.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Fetch the admin's configuration, or the default if none is stored.
    async fn get_config(&self, admin_id: &str) -> Result<AdminConfig>;

    /// Upsert the admin's configuration document.
    async fn save_config(&self, admin_id: &str, config: AdminConfig) -> Result<()>;

    /// Fetch the admin's lexicon snapshot, or the built-in defaults if none
    /// is stored yet.
    async fn get_lexicon(&self, admin_id: &str) -> Result<LexiconSnapshot>;

    /// Add (or replace) a canonical term within a category.
    async fn add_canonical(&self, admin_id: &str, category: &str, term: &str) -> Result<()>;

    /// Remove a canonical term from a category.
    async fn remove_canonical(&self, admin_id: &str, category: &str, term: &str) -> Result<()>;

    /// Register a variant spelling resolving to `canonical` within `category`.
    async fn add_variant(
        &self,
        admin_id: &str,
        category: &str,
        variant: &str,
        canonical: &str,
    ) -> Result<()>;

    /// Register a multi-word phrase resolving to `canonical`.
    async fn add_multiword_variant(&self, admin_id: &str, phrase: &str, canonical: &str) -> Result<()>;
}

#[async_trait]
impl<T: ConfigStore + ?Sized> ConfigStore for std::sync::Arc<T> {
    async fn get_config(&self, admin_id: &str) -> Result<AdminConfig> {
        (**self).get_config(admin_id).await
    }

    async fn save_config(&self, admin_id: &str, config: AdminConfig) -> Result<()> {
        (**self).save_config(admin_id, config).await
    }

    async fn get_lexicon(&self, admin_id: &str) -> Result<LexiconSnapshot> {
        (**self).get_lexicon(admin_id).await
    }

    async fn add_canonical(&self, admin_id: &str, category: &str, term: &str) -> Result<()> {
        (**self).add_canonical(admin_id, category, term).await
    }

    async fn remove_canonical(&self, admin_id: &str, category: &str, term: &str) -> Result<()> {
        (**self).remove_canonical(admin_id, category, term).await
    }

    async fn add_variant(
        &self,
        admin_id: &str,
        category: &str,
        variant: &str,
        canonical: &str,
    ) -> Result<()> {
        (**self).add_variant(admin_id, category, variant, canonical).await
    }

    async fn add_multiword_variant(&self, admin_id: &str, phrase: &str, canonical: &str) -> Result<()> {
        (**self).add_multiword_variant(admin_id, phrase, canonical).await
    }
}

/// Read-through cache in front of a [`ConfigStore`], keyed by admin id.
///
/// Entries carry no TTL; admin writes invalidate the entry directly so
/// memory is bounded by the number of distinct admins, per §4.1.
pub struct CachedConfigStore<S> {
    inner: S,
    lexicon_cache: parking_lot::RwLock<std::collections::HashMap<String, std::sync::Arc<LexiconSnapshot>>>,
}

impl<S: ConfigStore> CachedConfigStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            lexicon_cache: parking_lot::RwLock::new(std::collections::HashMap::new()),
        }
    }

    /// Fetch a shared, read-only lexicon snapshot, populating the cache on miss.
    pub async fn get_lexicon(&self, admin_id: &str) -> Result<std::sync::Arc<LexiconSnapshot>> {
        if let Some(cached) = self.lexicon_cache.read().get(admin_id) {
            return Ok(std::sync::Arc::clone(cached));
        }
        let snapshot = std::sync::Arc::new(self.inner.get_lexicon(admin_id).await?);
        self.lexicon_cache
            .write()
            .insert(admin_id.to_owned(), std::sync::Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Drop the cached snapshot for `admin_id`, forcing the next read to
    /// refetch from the backing store. Called after any admin mutation.
    pub fn invalidate(&self, admin_id: &str) {
        self.lexicon_cache.write().remove(admin_id);
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: ConfigStore> CachedConfigStore<S> {
    /// Config documents are not cached (writes are infrequent and always
    /// go through the admin API directly); this simply forwards to the
    /// backing store.
    pub async fn get_config(&self, admin_id: &str) -> Result<AdminConfig> {
        self.inner.get_config(admin_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cache_populates_on_first_read_and_reuses_arc() {
        let store = CachedConfigStore::new(InMemoryConfigStore::new());
        let first = store.get_lexicon("admin-1").await.expect("lexicon");
        let second = store.get_lexicon("admin-1").await.expect("lexicon");
        assert!(std::sync::Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let store = CachedConfigStore::new(InMemoryConfigStore::new());
        let first = store.get_lexicon("admin-1").await.expect("lexicon");
        store.invalidate("admin-1");
        let second = store.get_lexicon("admin-1").await.expect("lexicon");
        assert!(!std::sync::Arc::ptr_eq(&first, &second));
    }
}
