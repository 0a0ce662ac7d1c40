//! C4 — uniform adapter to a cloud transcription endpoint (§4.4).

mod cloud;

pub use cloud::CloudAsr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One recognized span within a [`TranscriptionResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: u32,
    pub text: String,
    pub start: f64,
    pub end: f64,
}

/// Provenance attached to a transcription (§3 `TranscriptionResult`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionMetadata {
    pub provider: String,
    pub model: String,
    pub prompt: Option<String>,
}

/// Immutable result of a single ASR call (§3 `TranscriptionResult`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub segments: Vec<Segment>,
    pub text: String,
    pub language: String,
    pub duration_secs: f64,
    pub metadata: TranscriptionMetadata,
}

/// Error classification consumed by the circuit breaker (§4.4, §7).
#[derive(Debug, Clone)]
pub enum AsrError {
    /// Fatal for the configured admin — do not retry.
    AuthFailed(String),
    /// Provider is throttling; retry with backoff.
    RateLimited(String),
    /// Input audio is malformed; drop, never retry.
    InvalidAudio(String),
    /// Network or upstream 5xx; retry a bounded number of times.
    Transient(String),
    /// Provider is down; the circuit breaker should open.
    Unavailable(String),
}

impl AsrError {
    /// Whether a caller should retry this error at all (§7 retry policy).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, AsrError::RateLimited(_) | AsrError::Transient(_))
    }

    /// Whether this error should count against the circuit breaker's
    /// consecutive-failure count (§4.5): invalid input is the caller's
    /// fault, not the provider's, so it is excluded.
    #[must_use]
    pub fn counts_as_failure(&self) -> bool {
        !matches!(self, AsrError::InvalidAudio(_))
    }
}

impl fmt::Display for AsrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsrError::AuthFailed(m) => write!(f, "ASR auth failed: {m}"),
            AsrError::RateLimited(m) => write!(f, "ASR rate limited: {m}"),
            AsrError::InvalidAudio(m) => write!(f, "invalid audio: {m}"),
            AsrError::Transient(m) => write!(f, "ASR transient error: {m}"),
            AsrError::Unavailable(m) => write!(f, "ASR unavailable: {m}"),
        }
    }
}

impl std::error::Error for AsrError {}

impl From<AsrError> for crate::error::RelayError {
    fn from(e: AsrError) -> Self {
        match e {
            AsrError::AuthFailed(m) => crate::error::RelayError::AuthFailed(m),
            AsrError::InvalidAudio(m) => crate::error::RelayError::Validation(m),
            AsrError::RateLimited(m) | AsrError::Transient(m) | AsrError::Unavailable(m) => {
                crate::error::RelayError::Unavailable(m)
            }
        }
    }
}

/// Options threaded through to the provider for a single `transcribe` call.
#[derive(Debug, Clone, Default)]
pub struct TranscribeOptions {
    pub prompt: Option<String>,
}

/// Uniform interface to a transcription provider (§4.4, §9 tagged variant).
///
/// Providers that lack a native streaming API may implement
/// [`stream_transcribe`](AsrBackend::stream_transcribe) as batch-over-windows;
/// the default implementation does exactly that by calling
/// [`transcribe`](AsrBackend::transcribe) once over the whole buffer.
#[async_trait]
pub trait AsrBackend: Send + Sync {
    /// Provider name, for metrics and `TranscriptionMetadata`.
    fn name(&self) -> &str;

    /// Batch transcription of a complete audio payload.
    async fn transcribe(
        &self,
        audio: &[u8],
        language: &str,
        options: &TranscribeOptions,
    ) -> Result<TranscriptionResult, AsrError>;

    /// Streaming transcription over a sequence of frames.
    async fn stream_transcribe(
        &self,
        frames: &[Vec<u8>],
        language: &str,
        options: &TranscribeOptions,
    ) -> Result<Vec<TranscriptionResult>, AsrError> {
        let combined: Vec<u8> = frames.iter().flatten().copied().collect();
        let result = self.transcribe(&combined, language, options).await?;
        Ok(vec![result])
    }
}

#[async_trait]
impl<T: AsrBackend + ?Sized> AsrBackend for std::sync::Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn transcribe(
        &self,
        audio: &[u8],
        language: &str,
        options: &TranscribeOptions,
    ) -> Result<TranscriptionResult, AsrError> {
        (**self).transcribe(audio, language, options).await
    }

    async fn stream_transcribe(
        &self,
        frames: &[Vec<u8>],
        language: &str,
        options: &TranscribeOptions,
    ) -> Result<Vec<TranscriptionResult>, AsrError> {
        (**self).stream_transcribe(frames, language, options).await
    }
}

/// Jittered exponential backoff: `base * 2^attempt`, capped at `cap`, plus up
/// to 50% jitter. Hand-rolled rather than pulling in a generic retry crate.
#[must_use]
pub fn backoff_delay(attempt: u32, base: std::time::Duration, cap: std::time::Duration) -> std::time::Duration {
    let exp = base.saturating_mul(1u32 << attempt.min(16));
    let capped = exp.min(cap);
    let jitter_fraction = pseudo_random_fraction(attempt);
    capped.mul_f64(1.0 + 0.5 * jitter_fraction)
}

/// Deterministic, allocation-free jitter source. Not cryptographically
/// random; backoff jitter only needs to avoid thundering-herd retries.
fn pseudo_random_fraction(seed: u32) -> f64 {
    let mut x = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    x ^= x << 13;
    x ^= x >> 17;
    x ^= x << 5;
    f64::from(x % 1000) / 1000.0
}
