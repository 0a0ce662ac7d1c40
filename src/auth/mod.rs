//! C9 — session cookies for desktops, short-lived bearer tokens for
//! WebSocket and mobile-inherited auth (§4.9).

use axum_extra::extract::cookie::Cookie;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cookie carrying the desktop's authenticated principal id.
pub const SESSION_COOKIE_NAME: &str = "relay_session";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    /// Reduced role granted to mobile-inherited tokens (§9 Open Question:
    /// production deployments prefer a bound, non-full-privilege token).
    Mobile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Desktop,
    Mobile,
}

/// Bearer token payload (§3/§9 "Token content").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub device_type: DeviceType,
    pub iat: i64,
    pub exp: i64,
    /// Present on mobile-inherited tokens: the desktop principal the pair
    /// code belonged to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inherited_from: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    InvalidToken,
    Expired,
    InvalidCredentials,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::InvalidToken => write!(f, "invalid or malformed token"),
            AuthError::Expired => write!(f, "token has expired"),
            AuthError::InvalidCredentials => write!(f, "invalid email or password"),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<AuthError> for crate::error::RelayError {
    fn from(e: AuthError) -> Self {
        crate::error::RelayError::AuthFailed(e.to_string())
    }
}

/// Issues and verifies HS256 bearer tokens against a single symmetric key.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
}

impl TokenService {
    #[must_use]
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }

    /// Issue a token for an authenticated desktop session (§6 `/api/auth/ws-token`).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidToken`] if the underlying JWT encoder fails.
    pub fn issue_desktop_token(&self, principal_id: &str) -> Result<(String, Duration), AuthError> {
        self.issue(principal_id, Role::Admin, DeviceType::Desktop, None)
    }

    /// Issue a mobile-inherited token bound to the desktop identity behind a
    /// pair code (§6 `/api/auth/ws-token-mobile`). Carries a reduced role.
    pub fn issue_mobile_token(&self, desktop_principal_id: &str, mobile_principal_id: &str) -> Result<(String, Duration), AuthError> {
        self.issue(
            mobile_principal_id,
            Role::Mobile,
            DeviceType::Mobile,
            Some(desktop_principal_id.to_owned()),
        )
    }

    fn issue(
        &self,
        principal_id: &str,
        role: Role,
        device_type: DeviceType,
        inherited_from: Option<String>,
    ) -> Result<(String, Duration), AuthError> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: principal_id.to_owned(),
            role,
            device_type,
            iat: now,
            exp: now + i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX),
            inherited_from,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|_| AuthError::InvalidToken)?;
        Ok((token, self.ttl))
    }

    /// Verify a bearer token's signature and expiry, returning its claims.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidToken`] if the signature or shape is
    /// invalid, or [`AuthError::Expired`] if `exp` has passed.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);
        validation.leeway = 0;
        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            use jsonwebtoken::errors::ErrorKind;
            match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken,
            }
        })?;
        Ok(data.claims)
    }
}

/// Single-admin credential check for `/api/auth/login` (§6, §4.9).
///
/// There is no multi-user store backing this relay; exactly one admin
/// account is configured via environment variables and checked with a
/// constant-time comparison.
pub struct AdminDirectory {
    email: String,
    password: String,
}

impl AdminDirectory {
    #[must_use]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self { email: email.into(), password: password.into() }
    }

    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCredentials`] if either field is blank,
    /// unconfigured, or does not match.
    pub fn authenticate(&self, email: &str, password: &str) -> Result<String, AuthError> {
        if self.email.is_empty() || self.password.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }
        let email_ok = constant_time_eq(email.trim(), &self.email);
        let password_ok = constant_time_eq(password, &self.password);
        if email_ok && password_ok {
            Ok(self.email.clone())
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }
}

/// Constant-time comparison so a failed login does not leak length/prefix
/// information through response timing.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Build the HTTP-only, `Secure` session cookie for a logged-in desktop
/// principal. Signing is performed by the caller's `SignedCookieJar` layer.
#[must_use]
pub fn session_cookie(principal_id: &str) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE_NAME, principal_id.to_owned()))
        .http_only(true)
        .secure(true)
        .path("/")
        .same_site(axum_extra::extract::cookie::SameSite::Lax)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn desktop_token_round_trips_with_admin_role() {
        let service = TokenService::new("secret", Duration::from_secs(60));
        let (token, _) = service.issue_desktop_token("admin-1").unwrap();
        let claims = service.verify(&token).unwrap();
        assert_eq!(claims.sub, "admin-1");
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.device_type, DeviceType::Desktop);
        assert!(claims.inherited_from.is_none());
    }

    #[test]
    fn mobile_token_carries_reduced_role_and_inherited_from() {
        let service = TokenService::new("secret", Duration::from_secs(60));
        let (token, _) = service.issue_mobile_token("admin-1", "mobile-guest-7").unwrap();
        let claims = service.verify(&token).unwrap();
        assert_eq!(claims.sub, "mobile-guest-7");
        assert_eq!(claims.role, Role::Mobile);
        assert_eq!(claims.inherited_from.as_deref(), Some("admin-1"));
    }

    #[test]
    fn tampered_token_fails_verification() {
        let service = TokenService::new("secret", Duration::from_secs(60));
        let (mut token, _) = service.issue_desktop_token("admin-1").unwrap();
        token.push('x');
        assert_eq!(service.verify(&token).unwrap_err(), AuthError::InvalidToken);
    }

    #[test]
    fn wrong_key_fails_verification() {
        let issuer = TokenService::new("secret-a", Duration::from_secs(60));
        let verifier = TokenService::new("secret-b", Duration::from_secs(60));
        let (token, _) = issuer.issue_desktop_token("admin-1").unwrap();
        assert_eq!(verifier.verify(&token).unwrap_err(), AuthError::InvalidToken);
    }

    #[test]
    fn admin_directory_accepts_matching_credentials() {
        let directory = AdminDirectory::new("admin@practice.nl", "hunter2");
        assert_eq!(directory.authenticate("admin@practice.nl", "hunter2").unwrap(), "admin@practice.nl");
    }

    #[test]
    fn admin_directory_rejects_wrong_password() {
        let directory = AdminDirectory::new("admin@practice.nl", "hunter2");
        assert_eq!(directory.authenticate("admin@practice.nl", "wrong").unwrap_err(), AuthError::InvalidCredentials);
    }

    #[test]
    fn admin_directory_unconfigured_always_rejects() {
        let directory = AdminDirectory::new("", "");
        assert_eq!(directory.authenticate("", "").unwrap_err(), AuthError::InvalidCredentials);
    }

    #[test]
    fn expired_token_is_rejected() {
        let service = TokenService::new("secret", Duration::from_secs(0));
        let (token, _) = service.issue_desktop_token("admin-1").unwrap();
        std::thread::sleep(Duration::from_millis(1100));
        assert_eq!(service.verify(&token).unwrap_err(), AuthError::Expired);
    }
}
