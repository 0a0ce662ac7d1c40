//! Error types for the relay server.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Top-level error type for the relay server.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Malformed or out-of-range caller input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing or invalid credential.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Referenced resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Conflicting state (e.g. duplicate canonical term).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Uploaded payload exceeded the configured limit.
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    /// The external configuration/lexicon store could not be reached.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The ASR circuit breaker is open, or the backend is otherwise down.
    #[error("ASR unavailable: {0}")]
    Unavailable(String),

    /// Misconfiguration that prevents a provider from initializing.
    #[error("fatal configuration error: {0}")]
    Fatal(String),

    /// Audio buffer / WAV framing error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Normalizer pipeline error (should not occur; the pipeline is total).
    #[error("normalization error: {0}")]
    Normalize(String),

    /// WebSocket protocol violation.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, RelayError>;

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match &self {
            RelayError::Validation(_) | RelayError::Protocol(_) => StatusCode::BAD_REQUEST,
            RelayError::AuthFailed(_) => StatusCode::UNAUTHORIZED,
            RelayError::NotFound(_) => StatusCode::NOT_FOUND,
            RelayError::Conflict(_) => StatusCode::CONFLICT,
            RelayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            RelayError::Unavailable(_) | RelayError::StoreUnavailable(_) | RelayError::Fatal(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            RelayError::Audio(_) | RelayError::Normalize(_) | RelayError::Io(_) | RelayError::Channel(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
