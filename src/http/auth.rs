//! `/api/auth/*` routes (§6, §4.9).

use super::AppState;
use crate::auth::{SESSION_COOKIE_NAME, session_cookie};
use crate::error::{RelayError, Result};
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use axum_extra::extract::cookie::SignedCookieJar;
use serde::{Deserialize, Serialize};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/ws-token", post(ws_token))
        .route("/api/auth/ws-token-mobile", post(ws_token_mobile))
}

#[derive(Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

#[derive(Serialize)]
struct UserProfile {
    email: String,
}

async fn login(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Json(body): Json<LoginBody>,
) -> Result<(SignedCookieJar, Json<UserProfile>)> {
    let principal_id = state.admins.authenticate(&body.email, &body.password)?;
    let jar = jar.add(session_cookie(&principal_id));
    Ok((jar, Json(UserProfile { email: principal_id })))
}

#[derive(Serialize)]
struct TokenResponse {
    token: String,
    expires_in: u64,
}

async fn ws_token(State(state): State<AppState>, jar: SignedCookieJar) -> Result<Json<TokenResponse>> {
    let principal_id = require_session(&jar)?;
    let (token, ttl) = state.tokens.issue_desktop_token(&principal_id)?;
    Ok(Json(TokenResponse { token, expires_in: ttl.as_secs() }))
}

#[derive(Deserialize)]
struct MobileTokenBody {
    pair_code: String,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Serialize)]
struct MobileTokenResponse {
    token: String,
    expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    inherited_from: Option<String>,
}

async fn ws_token_mobile(
    State(state): State<AppState>,
    Json(body): Json<MobileTokenBody>,
) -> Result<Json<MobileTokenResponse>> {
    let desktop_principal = state.pairing.peek(&body.pair_code).map_err(|e| RelayError::Validation(e.to_string()))?;
    let mobile_principal = body.username.unwrap_or_else(|| format!("mobile-{}", uuid::Uuid::new_v4()));
    let (token, ttl) = state.tokens.issue_mobile_token(&desktop_principal, &mobile_principal)?;
    Ok(Json(MobileTokenResponse { token, expires_in: ttl.as_secs(), inherited_from: Some(desktop_principal) }))
}

/// Resolve the authenticated admin principal id from the session cookie.
pub(super) fn require_session(jar: &SignedCookieJar) -> Result<String> {
    jar.get(SESSION_COOKIE_NAME)
        .map(|c| c.value().to_owned())
        .ok_or_else(|| RelayError::AuthFailed("no session cookie".to_owned()))
}
