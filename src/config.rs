//! Process-wide configuration for the relay server.
//!
//! Loaded once at startup from the environment (see [`ServerConfig::from_env`])
//! and handed around as an immutable [`std::sync::Arc`].

use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level process configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP/WebSocket bind address, e.g. `0.0.0.0:8080`.
    pub bind_addr: String,
    /// Symmetric signing key for session/bearer tokens.
    pub jwt_secret: String,
    /// Email of the single configured admin account (§6 `/api/auth/login`).
    pub admin_email: String,
    /// Password of the single configured admin account.
    pub admin_password: String,
    /// ASR provider model id, e.g. `openai/gpt-4o-transcribe`.
    pub model_id: String,
    /// API key for the configured ASR provider.
    pub asr_api_key: Option<String>,
    /// Base URL of the external config/lexicon key-value store.
    pub store_url: Option<String>,
    /// Service key for the external store.
    pub store_service_key: Option<String>,
    /// Selects the SPSC scheduler over a simple sequential fallback.
    pub use_spsc_transcriber: bool,
    /// Pairing code time-to-live.
    pub pair_code_ttl: Duration,
    /// Bearer token (`/api/auth/ws-token*`) time-to-live.
    pub ws_token_ttl: Duration,
    /// Duration of client silence after which a WS connection is considered stale.
    pub heartbeat_stale: Duration,
    /// SPSC scheduler tunables.
    pub scheduler: SchedulerConfig,
    /// Audio buffer tunables (admin-overridable defaults).
    pub audio_buffer: AudioBufferConfig,
    /// Aggregator tunables.
    pub aggregator: AggregatorConfig,
    /// Maximum accepted upload size for `transcribe-file`, in bytes.
    pub max_upload_bytes: usize,
}

impl ServerConfig {
    /// Build configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Fatal`] if a required variable is missing or a
    /// numeric variable fails to parse.
    pub fn from_env() -> Result<Self> {
        let host = std::env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_owned());
        let port = std::env::var("SERVER_PORT").unwrap_or_else(|_| "8080".to_owned());
        let jwt_secret = std::env::var("JWT_SECRET")
            .map_err(|_| RelayError::Fatal("JWT_SECRET is required".into()))?;
        if jwt_secret.trim().is_empty() {
            return Err(RelayError::Fatal("JWT_SECRET must not be empty".into()));
        }

        let pair_ttl_secs = parse_env_u64("PAIR_CODE_TTL_SECS", 600)?;
        let heartbeat_stale_secs = parse_env_u64("HEARTBEAT_STALE_SECS", 60)?;
        let ws_token_ttl_secs = parse_env_u64("WS_TOKEN_TTL_SECS", 3600)?;

        Ok(Self {
            bind_addr: format!("{host}:{port}"),
            jwt_secret,
            admin_email: std::env::var("ADMIN_EMAIL").unwrap_or_default(),
            admin_password: std::env::var("ADMIN_PASSWORD").unwrap_or_default(),
            model_id: std::env::var("MODEL_ID")
                .unwrap_or_else(|_| "openai/gpt-4o-transcribe".to_owned()),
            asr_api_key: std::env::var("ASR_API_KEY").ok(),
            store_url: std::env::var("STORE_URL").ok(),
            store_service_key: std::env::var("STORE_SERVICE_KEY").ok(),
            use_spsc_transcriber: std::env::var("USE_SPSC_TRANSCRIBER")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
            pair_code_ttl: Duration::from_secs(pair_ttl_secs),
            ws_token_ttl: Duration::from_secs(ws_token_ttl_secs),
            heartbeat_stale: Duration::from_secs(heartbeat_stale_secs),
            scheduler: SchedulerConfig::default(),
            audio_buffer: AudioBufferConfig::default(),
            aggregator: AggregatorConfig::default(),
            max_upload_bytes: 25 * 1024 * 1024,
        })
    }
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map_err(|e| RelayError::Fatal(format!("{name} must be a positive integer: {e}"))),
        Err(_) => Ok(default),
    }
}

/// SPSC scheduler tunables (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Bounded queue capacity per priority class.
    pub queue_size: usize,
    /// Maximum chunks collected per batch window.
    pub batch_size: usize,
    /// Batch collection window.
    pub batch_wait: Duration,
    /// Maximum concurrent ASR calls per sub-batch.
    pub parallel_workers: usize,
    /// Maximum wait when enqueueing a chunk before it is dropped.
    pub enqueue_timeout: Duration,
    /// Per-call ASR timeout.
    pub asr_call_timeout: Duration,
    /// Consecutive failures before the circuit breaker opens.
    pub failure_threshold: u32,
    /// Time the circuit breaker stays open before probing again.
    pub recovery_timeout: Duration,
    /// Bound on the shutdown drain.
    pub shutdown_drain: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_size: 50,
            batch_size: 10,
            batch_wait: Duration::from_millis(50),
            parallel_workers: 4,
            enqueue_timeout: Duration::from_millis(100),
            asr_call_timeout: Duration::from_secs(30),
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            shutdown_drain: Duration::from_secs(2),
        }
    }
}

/// Audio buffer tunables (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioBufferConfig {
    /// Frames at or below this size are candidates for accumulation.
    pub small_threshold_bytes: usize,
    /// Number of small frames to accumulate before flushing.
    pub accumulate_count: usize,
    /// Maximum time a prefix may sit pending before a forced flush.
    pub max_duration: Duration,
    /// Sample rate of incoming PCM, in Hz.
    pub sample_rate: u32,
    /// Channel count (mono = 1).
    pub channels: u16,
    /// Bytes per sample.
    pub sample_width: u16,
}

impl Default for AudioBufferConfig {
    fn default() -> Self {
        Self {
            small_threshold_bytes: 2048,
            accumulate_count: 3,
            max_duration: Duration::from_millis(500),
            sample_rate: 16_000,
            channels: 1,
            sample_width: 2,
        }
    }
}

/// Aggregator tunables (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Silence gap that closes the current paragraph.
    pub silence_threshold: Duration,
    /// Whether incoming text accumulates in a sentence buffer before
    /// joining the current paragraph (vs. appending directly).
    pub sentence_breaks: bool,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            silence_threshold: Duration::from_millis(2000),
            sentence_breaks: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_config_matches_spec_defaults() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.queue_size, 50);
        assert_eq!(cfg.batch_size, 10);
        assert_eq!(cfg.batch_wait, Duration::from_millis(50));
        assert_eq!(cfg.parallel_workers, 4);
        assert_eq!(cfg.failure_threshold, 5);
        assert_eq!(cfg.recovery_timeout, Duration::from_secs(60));
    }

    #[test]
    fn audio_buffer_config_matches_spec_defaults() {
        let cfg = AudioBufferConfig::default();
        assert_eq!(cfg.small_threshold_bytes, 2048);
        assert_eq!(cfg.accumulate_count, 3);
        assert_eq!(cfg.max_duration, Duration::from_millis(500));
    }

    #[test]
    fn from_env_requires_jwt_secret() {
        // SAFETY: single-threaded test process; no concurrent env readers.
        unsafe { std::env::remove_var("JWT_SECRET") };
        let result = ServerConfig::from_env();
        assert!(result.is_err());
    }
}
