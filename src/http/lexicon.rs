//! `/api/lexicon/*` and `/api/ai/{normalization/config,config/*}` (§6, §4.1).
//!
//! Every mutation goes through the `CachedConfigStore`'s inner store and
//! then invalidates the cached snapshot.

use super::AppState;
use super::auth::require_session;
use crate::error::{RelayError, Result};
use crate::store::{AdminConfig, ConfigStore};
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::Json;
use axum_extra::extract::cookie::SignedCookieJar;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/lexicon/full", get(full))
        .route("/api/lexicon/categories", get(categories))
        .route("/api/lexicon/terms/{category}", get(terms))
        .route("/api/lexicon/add-canonical", post(add_canonical))
        .route("/api/lexicon/remove-canonical", delete(remove_canonical))
        .route("/api/lexicon/add-variant", post(add_variant))
        .route("/api/lexicon/add-multiword-variant", post(add_multiword_variant))
        .route("/api/lexicon/search", get(search))
        .route("/api/ai/normalization/config", get(normalization_config))
        .route("/api/ai/config/save", post(config_save))
        .route("/api/ai/config/backup", get(config_backup))
        .route("/api/ai/config/restore", post(config_restore))
}

#[derive(Serialize)]
struct LexiconView {
    canonical_terms: Vec<String>,
    categories: HashMap<String, Vec<String>>,
    variants_by_category: HashMap<String, HashMap<String, String>>,
    multiword_variants: HashMap<String, String>,
    protected_words: Vec<String>,
    custom_patterns: HashMap<String, String>,
}

async fn full(State(state): State<AppState>, jar: SignedCookieJar) -> Result<Json<LexiconView>> {
    let admin_id = require_session(&jar)?;
    let lexicon = state.store.get_lexicon(&admin_id).await?;
    Ok(Json(LexiconView {
        canonical_terms: lexicon.canonical_terms.iter().cloned().collect(),
        categories: lexicon.categories.clone(),
        variants_by_category: lexicon.variants_by_category.clone(),
        multiword_variants: lexicon.multiword_variants.clone(),
        protected_words: lexicon.protected_words.iter().cloned().collect(),
        custom_patterns: lexicon.custom_patterns.clone(),
    }))
}

#[derive(Serialize)]
struct CategoriesResponse {
    categories: Vec<String>,
}

async fn categories(State(state): State<AppState>, jar: SignedCookieJar) -> Result<Json<CategoriesResponse>> {
    let admin_id = require_session(&jar)?;
    let lexicon = state.store.get_lexicon(&admin_id).await?;
    Ok(Json(CategoriesResponse { categories: lexicon.categories.keys().cloned().collect() }))
}

#[derive(Serialize)]
struct TermsResponse {
    category: String,
    terms: Vec<String>,
}

async fn terms(State(state): State<AppState>, jar: SignedCookieJar, Path(category): Path<String>) -> Result<Json<TermsResponse>> {
    let admin_id = require_session(&jar)?;
    let lexicon = state.store.get_lexicon(&admin_id).await?;
    let terms = lexicon
        .categories
        .get(&category)
        .cloned()
        .ok_or_else(|| RelayError::NotFound(format!("no such lexicon category: {category}")))?;
    Ok(Json(TermsResponse { category, terms }))
}

#[derive(Deserialize)]
struct AddCanonicalBody {
    category: String,
    term: String,
}

async fn add_canonical(State(state): State<AppState>, jar: SignedCookieJar, Json(body): Json<AddCanonicalBody>) -> Result<Json<serde_json::Value>> {
    let admin_id = require_session(&jar)?;
    state.store.inner().add_canonical(&admin_id, &body.category, &body.term).await?;
    state.store.invalidate(&admin_id);
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Deserialize)]
struct RemoveCanonicalBody {
    category: String,
    term: String,
}

async fn remove_canonical(State(state): State<AppState>, jar: SignedCookieJar, Json(body): Json<RemoveCanonicalBody>) -> Result<Json<serde_json::Value>> {
    let admin_id = require_session(&jar)?;
    state.store.inner().remove_canonical(&admin_id, &body.category, &body.term).await?;
    state.store.invalidate(&admin_id);
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Deserialize)]
struct AddVariantBody {
    category: String,
    variant: String,
    canonical: String,
}

async fn add_variant(State(state): State<AppState>, jar: SignedCookieJar, Json(body): Json<AddVariantBody>) -> Result<Json<serde_json::Value>> {
    let admin_id = require_session(&jar)?;
    state.store.inner().add_variant(&admin_id, &body.category, &body.variant, &body.canonical).await?;
    state.store.invalidate(&admin_id);
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Deserialize)]
struct AddMultiwordVariantBody {
    phrase: String,
    canonical: String,
}

async fn add_multiword_variant(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Json(body): Json<AddMultiwordVariantBody>,
) -> Result<Json<serde_json::Value>> {
    let admin_id = require_session(&jar)?;
    state.store.inner().add_multiword_variant(&admin_id, &body.phrase, &body.canonical).await?;
    state.store.invalidate(&admin_id);
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
}

#[derive(Serialize)]
struct SearchResponse {
    matches: Vec<String>,
}

async fn search(State(state): State<AppState>, jar: SignedCookieJar, Query(query): Query<SearchQuery>) -> Result<Json<SearchResponse>> {
    let admin_id = require_session(&jar)?;
    let lexicon = state.store.get_lexicon(&admin_id).await?;
    let needle = query.q.to_lowercase();
    let mut matches: HashSet<String> = lexicon
        .canonical_terms
        .iter()
        .filter(|term| term.to_lowercase().contains(&needle))
        .cloned()
        .collect();
    matches.extend(lexicon.variant_to_canonical.keys().filter(|v| v.contains(&needle)).cloned());
    let mut matches: Vec<String> = matches.into_iter().collect();
    matches.sort();
    Ok(Json(SearchResponse { matches }))
}

async fn normalization_config(State(state): State<AppState>, jar: SignedCookieJar) -> Result<Json<AdminConfig>> {
    let admin_id = require_session(&jar)?;
    let config = state.store.get_config(&admin_id).await?;
    Ok(Json(config))
}

async fn config_save(State(state): State<AppState>, jar: SignedCookieJar, Json(config): Json<AdminConfig>) -> Result<Json<serde_json::Value>> {
    let admin_id = require_session(&jar)?;
    state.store.inner().save_config(&admin_id, config).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

/// Bundle restored/backed up by `/api/ai/config/{backup,restore}`.
///
/// `protected_words` and `custom_patterns` are not round-tripped: the store
/// has no mutator for either, so a restore cannot replay them. Both are
/// included in the backup for inspection but ignored on restore.
#[derive(Serialize, Deserialize)]
struct ConfigBundle {
    config: AdminConfig,
    categories: HashMap<String, Vec<String>>,
    variants_by_category: HashMap<String, HashMap<String, String>>,
    multiword_variants: HashMap<String, String>,
    protected_words: Vec<String>,
    custom_patterns: HashMap<String, String>,
}

async fn config_backup(State(state): State<AppState>, jar: SignedCookieJar) -> Result<Json<ConfigBundle>> {
    let admin_id = require_session(&jar)?;
    let config = state.store.get_config(&admin_id).await?;
    let lexicon = state.store.get_lexicon(&admin_id).await?;
    Ok(Json(ConfigBundle {
        config,
        categories: lexicon.categories.clone(),
        variants_by_category: lexicon.variants_by_category.clone(),
        multiword_variants: lexicon.multiword_variants.clone(),
        protected_words: lexicon.protected_words.iter().cloned().collect(),
        custom_patterns: lexicon.custom_patterns.clone(),
    }))
}

async fn config_restore(State(state): State<AppState>, jar: SignedCookieJar, Json(bundle): Json<ConfigBundle>) -> Result<Json<serde_json::Value>> {
    let admin_id = require_session(&jar)?;
    let inner = state.store.inner();
    inner.save_config(&admin_id, bundle.config).await?;

    for (category, terms) in bundle.categories {
        for term in terms {
            inner.add_canonical(&admin_id, &category, &term).await?;
        }
    }
    for (category, variants) in bundle.variants_by_category {
        for (variant, canonical) in variants {
            inner.add_variant(&admin_id, &category, &variant, &canonical).await?;
        }
    }
    for (phrase, canonical) in bundle.multiword_variants {
        inner.add_multiword_variant(&admin_id, &phrase, &canonical).await?;
    }

    state.store.invalidate(&admin_id);
    Ok(Json(serde_json::json!({ "success": true })))
}
