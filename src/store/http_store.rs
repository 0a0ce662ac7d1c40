//! `reqwest`-based [`ConfigStore`](super::ConfigStore) adapter to the
//! external key/value document store (§6 "Persisted state layout").

use super::{AdminConfig, ConfigStore, LexiconDocument};
use crate::error::{RelayError, Result};
use crate::normalize::LexiconSnapshot;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// Adapter to an external document store exposing one JSON document per
/// admin for `config` and `lexicon` (§6 persisted state layout).
pub struct HttpConfigStore {
    client: Client,
    base_url: String,
    service_key: String,
}

impl HttpConfigStore {
    /// # Errors
    ///
    /// Returns [`RelayError::Fatal`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, service_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| RelayError::Fatal(format!("cannot build store HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            service_key: service_key.into(),
        })
    }

    fn doc_url(&self, admin_id: &str, kind: &str) -> String {
        format!("{}/admins/{admin_id}/{kind}", self.base_url.trim_end_matches('/'))
    }

    async fn get_document<T: serde::de::DeserializeOwned + Default>(
        &self,
        admin_id: &str,
        kind: &str,
    ) -> Result<T> {
        let response = self
            .client
            .get(self.doc_url(admin_id, kind))
            .bearer_auth(&self.service_key)
            .send()
            .await
            .map_err(|e| RelayError::StoreUnavailable(format!("{kind} fetch failed: {e}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(T::default());
        }
        if !response.status().is_success() {
            return Err(RelayError::StoreUnavailable(format!(
                "{kind} fetch returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| RelayError::StoreUnavailable(format!("{kind} decode failed: {e}")))
    }

    async fn put_document<T: serde::Serialize + Sync>(
        &self,
        admin_id: &str,
        kind: &str,
        doc: &T,
    ) -> Result<()> {
        let response = self
            .client
            .put(self.doc_url(admin_id, kind))
            .bearer_auth(&self.service_key)
            .json(doc)
            .send()
            .await
            .map_err(|e| RelayError::StoreUnavailable(format!("{kind} upsert failed: {e}")))?;

        if !response.status().is_success() {
            return Err(RelayError::StoreUnavailable(format!(
                "{kind} upsert returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

fn document_to_snapshot(doc: LexiconDocument) -> LexiconSnapshot {
    let mut lex = LexiconSnapshot::with_defaults();
    for (category, terms) in doc.categories {
        for term in terms {
            lex.add_canonical(&category, &term);
        }
    }
    for (category, variants) in doc.variants {
        for (variant, canonical) in variants {
            lex.add_variant(&category, &variant, &canonical);
        }
    }
    lex.protected_words.extend(doc.protected_words);
    lex.custom_patterns.extend(doc.custom_patterns);
    lex.multiword_variants.extend(doc.multiword_variants);
    lex
}

#[async_trait]
impl ConfigStore for HttpConfigStore {
    async fn get_config(&self, admin_id: &str) -> Result<AdminConfig> {
        self.get_document(admin_id, "config").await
    }

    async fn save_config(&self, admin_id: &str, config: AdminConfig) -> Result<()> {
        self.put_document(admin_id, "config", &config).await
    }

    async fn get_lexicon(&self, admin_id: &str) -> Result<LexiconSnapshot> {
        let doc: LexiconDocument = self.get_document(admin_id, "lexicon").await?;
        Ok(document_to_snapshot(doc))
    }

    async fn add_canonical(&self, admin_id: &str, category: &str, term: &str) -> Result<()> {
        let mut doc: LexiconDocument = self.get_document(admin_id, "lexicon").await?;
        doc.categories
            .entry(category.to_owned())
            .or_default()
            .push(term.to_owned());
        self.put_document(admin_id, "lexicon", &doc).await
    }

    async fn remove_canonical(&self, admin_id: &str, category: &str, term: &str) -> Result<()> {
        let mut doc: LexiconDocument = self.get_document(admin_id, "lexicon").await?;
        let Some(terms) = doc.categories.get_mut(category) else {
            return Err(RelayError::NotFound(format!(
                "no category {category} for admin {admin_id}"
            )));
        };
        terms.retain(|t| t != term);
        self.put_document(admin_id, "lexicon", &doc).await
    }

    async fn add_variant(
        &self,
        admin_id: &str,
        category: &str,
        variant: &str,
        canonical: &str,
    ) -> Result<()> {
        let mut doc: LexiconDocument = self.get_document(admin_id, "lexicon").await?;
        doc.variants
            .entry(category.to_owned())
            .or_default()
            .insert(variant.to_lowercase(), canonical.to_owned());
        self.put_document(admin_id, "lexicon", &doc).await
    }

    async fn add_multiword_variant(&self, admin_id: &str, phrase: &str, canonical: &str) -> Result<()> {
        let mut doc: LexiconDocument = self.get_document(admin_id, "lexicon").await?;
        doc.multiword_variants.insert(phrase.to_lowercase(), canonical.to_owned());
        self.put_document(admin_id, "lexicon", &doc).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_to_snapshot_carries_categories_and_variants() {
        let mut doc = LexiconDocument::default();
        doc.categories
            .insert("dental".to_owned(), vec!["wortelkanaal".to_owned()]);
        doc.variants.insert(
            "dental".to_owned(),
            [("wortel kanaal".to_owned(), "wortelkanaal".to_owned())]
                .into_iter()
                .collect(),
        );
        doc.protected_words.insert("implantaat".to_owned());

        let lex = document_to_snapshot(doc);
        assert!(lex.canonical_terms.contains("wortelkanaal"));
        assert_eq!(
            lex.variant_to_canonical.get("wortel kanaal"),
            Some(&"wortelkanaal".to_owned())
        );
        assert!(lex.protected_words.contains("implantaat"));
    }

    #[tokio::test]
    async fn get_document_against_unreachable_host_is_store_unavailable() {
        let store = HttpConfigStore::new("http://127.0.0.1:1", "key").expect("client builds");
        let result = store.get_config("admin-1").await;
        assert!(matches!(result, Err(RelayError::StoreUnavailable(_))));
    }
}
