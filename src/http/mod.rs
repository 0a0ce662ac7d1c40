//! C10 — the HTTP/WebSocket surface (§4.10, §6).
//!
//! Composed from nested routers per concern
//! (`Router::new().route(...).with_state(state)`), with `tower-http`'s
//! trace/CORS layers and a body-size limit for uploads.

mod ai;
mod auth;
mod lexicon;
mod pairing;

use crate::asr::AsrBackend;
use crate::auth::{AdminDirectory, TokenService};
use crate::pairing::PairingRegistry;
use crate::scheduler::SchedulerHandle;
use crate::store::{CachedConfigStore, ConfigStore};
use crate::ws;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{HeaderMap, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use axum_extra::extract::cookie::Key;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Store type shared across the process: any [`ConfigStore`] impl, erased
/// behind an `Arc<dyn _>` so the HTTP layer doesn't need to be generic over
/// which backing store was chosen at startup.
pub type SharedStore = CachedConfigStore<Arc<dyn ConfigStore>>;

/// All state reachable from a route handler via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<ws::Hub>,
    pub tokens: Arc<TokenService>,
    pub pairing: Arc<PairingRegistry>,
    pub store: Arc<SharedStore>,
    pub asr: Arc<dyn AsrBackend>,
    pub admins: Arc<AdminDirectory>,
    pub scheduler: SchedulerHandle,
    pub cookie_key: Key,
    pub max_upload_bytes: usize,
}

impl axum::extract::FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

/// Assemble the full application router (§4.10).
pub fn build_router(state: AppState) -> Router {
    let max_upload_bytes = state.max_upload_bytes;
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_upgrade))
        .merge(auth::router())
        .merge(pairing::router())
        .merge(ai::router())
        .merge(lexicon::router())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Upgrade handler for the single `/ws` endpoint (§6). The bearer token is
/// carried as a `Bearer.<token>` WebSocket subprotocol value; the server
/// echoes back whichever offered subprotocol it recognized, per RFC 6455.
async fn ws_upgrade(State(state): State<AppState>, headers: HeaderMap, ws: WebSocketUpgrade) -> impl IntoResponse {
    let offered: Vec<String> = headers
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').map(|p| p.trim().to_owned()).collect())
        .unwrap_or_default();
    let subprotocol_token = offered.iter().find_map(|p| p.strip_prefix("Bearer.").map(str::to_owned));

    let hub = Arc::clone(&state.hub);
    let tokens = Arc::clone(&state.tokens);
    ws.protocols(offered)
        .on_upgrade(move |socket| ws::handle_socket(socket, hub, tokens, subprotocol_token))
}
