//! `/api/generate-pair-code` and `/api/pair-device` (§6, §4.7).

use super::AppState;
use super::auth::require_session;
use crate::error::{RelayError, Result};
use axum::Router;
use axum::extract::State;
use axum::routing::post;
use axum::Json;
use axum_extra::extract::cookie::SignedCookieJar;
use serde::{Deserialize, Serialize};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/generate-pair-code", post(generate_pair_code))
        .route("/api/pair-device", post(pair_device))
}

#[derive(Deserialize)]
struct GeneratePairCodeBody {
    desktop_session_id: String,
}

#[derive(Serialize)]
struct GeneratePairCodeResponse {
    code: String,
    channel_id: String,
    expires_at: chrono::DateTime<chrono::Utc>,
}

async fn generate_pair_code(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Json(body): Json<GeneratePairCodeBody>,
) -> Result<Json<GeneratePairCodeResponse>> {
    require_session(&jar)?;
    let pair_code = state.pairing.issue(&body.desktop_session_id);
    let ttl = pair_code.expires_at.duration_since(pair_code.issued_at);
    let expires_at = chrono::Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default();
    Ok(Json(GeneratePairCodeResponse { code: pair_code.code, channel_id: pair_code.channel_id, expires_at }))
}

#[derive(Deserialize)]
struct PairDeviceBody {
    code: String,
    mobile_session_id: String,
}

#[derive(Serialize)]
struct PairDeviceResponse {
    success: bool,
    channel_id: String,
}

async fn pair_device(State(state): State<AppState>, Json(body): Json<PairDeviceBody>) -> Result<Json<PairDeviceResponse>> {
    let result = state
        .pairing
        .claim(&body.code, &body.mobile_session_id, |desktop_id| state.hub.has_session(desktop_id))
        .map_err(|e| RelayError::Validation(e.to_string()))?;
    Ok(Json(PairDeviceResponse { success: true, channel_id: result.channel_id }))
}
