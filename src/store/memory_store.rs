//! In-memory [`ConfigStore`](super::ConfigStore), used by tests and by
//! local/dev runs when `STORE_URL` is unset.

use super::{AdminConfig, ConfigStore};
use crate::error::{RelayError, Result};
use crate::normalize::LexiconSnapshot;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
struct Documents {
    configs: HashMap<String, AdminConfig>,
    lexicons: HashMap<String, LexiconSnapshot>,
}

/// A process-local store backed by a single `parking_lot::Mutex` over two
/// maps, sufficient for the small number of distinct admins a deployment
/// actually has.
pub struct InMemoryConfigStore {
    docs: Mutex<Documents>,
}

impl InMemoryConfigStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            docs: Mutex::new(Documents::default()),
        }
    }
}

impl Default for InMemoryConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn get_config(&self, admin_id: &str) -> Result<AdminConfig> {
        Ok(self
            .docs
            .lock()
            .configs
            .get(admin_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_config(&self, admin_id: &str, config: AdminConfig) -> Result<()> {
        self.docs.lock().configs.insert(admin_id.to_owned(), config);
        Ok(())
    }

    async fn get_lexicon(&self, admin_id: &str) -> Result<LexiconSnapshot> {
        Ok(self
            .docs
            .lock()
            .lexicons
            .get(admin_id)
            .cloned()
            .unwrap_or_else(LexiconSnapshot::with_defaults))
    }

    async fn add_canonical(&self, admin_id: &str, category: &str, term: &str) -> Result<()> {
        let mut docs = self.docs.lock();
        let lex = docs
            .lexicons
            .entry(admin_id.to_owned())
            .or_insert_with(LexiconSnapshot::with_defaults);
        lex.add_canonical(category, term);
        Ok(())
    }

    async fn remove_canonical(&self, admin_id: &str, category: &str, term: &str) -> Result<()> {
        let mut docs = self.docs.lock();
        let Some(lex) = docs.lexicons.get_mut(admin_id) else {
            return Err(RelayError::NotFound(format!(
                "no lexicon for admin {admin_id}"
            )));
        };
        lex.remove_canonical(category, term);
        Ok(())
    }

    async fn add_variant(
        &self,
        admin_id: &str,
        category: &str,
        variant: &str,
        canonical: &str,
    ) -> Result<()> {
        let mut docs = self.docs.lock();
        let lex = docs
            .lexicons
            .entry(admin_id.to_owned())
            .or_insert_with(LexiconSnapshot::with_defaults);
        lex.add_variant(category, variant, canonical);
        Ok(())
    }

    async fn add_multiword_variant(&self, admin_id: &str, phrase: &str, canonical: &str) -> Result<()> {
        let mut docs = self.docs.lock();
        let lex = docs
            .lexicons
            .entry(admin_id.to_owned())
            .or_insert_with(LexiconSnapshot::with_defaults);
        lex.add_multiword_variant(phrase, canonical);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_admin_gets_default_config_and_lexicon() {
        let store = InMemoryConfigStore::new();
        let config = store.get_config("nobody").await.expect("config");
        assert_eq!(config.language, "nl");
        let lex = store.get_lexicon("nobody").await.expect("lexicon");
        assert!(lex.canonical_terms.contains("cariës"));
    }

    #[tokio::test]
    async fn remove_canonical_without_lexicon_is_not_found() {
        let store = InMemoryConfigStore::new();
        let result = store.remove_canonical("nobody", "dental", "cariës").await;
        assert!(matches!(result, Err(RelayError::NotFound(_))));
    }

    #[tokio::test]
    async fn add_then_remove_canonical_round_trips() {
        let store = InMemoryConfigStore::new();
        store
            .add_canonical("admin-1", "dental", "wortelkanaal")
            .await
            .expect("add");
        let lex = store.get_lexicon("admin-1").await.expect("lexicon");
        assert!(lex.canonical_terms.contains("wortelkanaal"));

        store
            .remove_canonical("admin-1", "dental", "wortelkanaal")
            .await
            .expect("remove");
        let lex = store.get_lexicon("admin-1").await.expect("lexicon");
        assert!(!lex.canonical_terms.contains("wortelkanaal"));
    }
}
