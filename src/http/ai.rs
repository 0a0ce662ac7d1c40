//! `/api/ai/transcribe*` and `/api/ai/status` (§6, §4.4, §4.1).
//!
//! These are one-shot synchronous calls against C4 directly — audio arriving
//! over the WebSocket goes through the SPSC Scheduler (C5) instead; the
//! circuit breaker it publishes is still consulted here so a degraded ASR
//! backend rejects ad hoc uploads the same way it stops streaming chunks.

use super::AppState;
use crate::asr::{Segment, TranscribeOptions, TranscriptionMetadata};
use crate::error::{RelayError, Result};
use crate::normalize;
use crate::scheduler::{CircuitSnapshot, MetricsSnapshot, CircuitState};
use axum::extract::{Multipart, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use serde::{Deserialize, Serialize};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/ai/transcribe", post(transcribe))
        .route("/api/ai/transcribe-file", post(transcribe_file))
        .route("/api/ai/status", get(status))
}

fn default_language() -> String {
    "nl".to_owned()
}

#[derive(Deserialize)]
struct TranscribeBody {
    audio_data: String,
    #[serde(default = "default_language")]
    language: String,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    format: Option<String>,
    #[serde(default)]
    admin_id: Option<String>,
}

#[derive(Serialize)]
struct TranscribeResponse {
    text: String,
    raw: String,
    normalized: String,
    segments: Vec<Segment>,
    language: String,
    duration: f64,
    metadata: TranscriptionMetadata,
}

fn check_circuit(state: &AppState) -> Result<()> {
    if state.scheduler.circuit_state().state == CircuitState::Open {
        return Err(RelayError::Unavailable("ASR circuit is open".to_owned()));
    }
    Ok(())
}

async fn transcribe(State(state): State<AppState>, Json(body): Json<TranscribeBody>) -> Result<Json<TranscribeResponse>> {
    check_circuit(&state)?;
    let audio = base64::engine::general_purpose::STANDARD
        .decode(&body.audio_data)
        .map_err(|e| RelayError::Validation(format!("invalid base64 audio_data: {e}")))?;
    let admin_id = body.admin_id.as_deref().unwrap_or("default");
    respond(&state, &audio, &body.language, body.prompt, admin_id).await
}

async fn transcribe_file(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<TranscribeResponse>> {
    check_circuit(&state)?;

    let mut audio: Option<Vec<u8>> = None;
    let mut language = default_language();
    let mut prompt: Option<String> = None;
    let mut admin_id = "default".to_owned();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| RelayError::Validation(format!("malformed multipart body: {e}")))?
    {
        match field.name().unwrap_or("") {
            "audio" | "file" => {
                let bytes = field.bytes().await.map_err(|e| RelayError::Validation(format!("cannot read audio field: {e}")))?;
                audio = Some(bytes.to_vec());
            }
            "language" => language = field.text().await.unwrap_or_else(|_| default_language()),
            "prompt" => prompt = field.text().await.ok(),
            "admin_id" => admin_id = field.text().await.unwrap_or_else(|_| "default".to_owned()),
            _ => {}
        }
    }

    let audio = audio.ok_or_else(|| RelayError::Validation("multipart body is missing an audio field".to_owned()))?;
    respond(&state, &audio, &language, prompt, &admin_id).await
}

async fn respond(
    state: &AppState,
    audio: &[u8],
    language: &str,
    prompt: Option<String>,
    admin_id: &str,
) -> Result<Json<TranscribeResponse>> {
    let options = TranscribeOptions { prompt };
    let result = state.asr.transcribe(audio, language, &options).await?;
    let lexicon = state.store.get_lexicon(admin_id).await?;
    let normalized = normalize::normalize(&result.text, &lexicon, language);
    Ok(Json(TranscribeResponse {
        text: normalized.clone(),
        raw: result.text,
        normalized,
        segments: result.segments,
        language: result.language,
        duration: result.duration_secs,
        metadata: result.metadata,
    }))
}

#[derive(Serialize)]
struct StatusResponse {
    circuit: CircuitSnapshot,
    metrics: MetricsSnapshot,
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse { circuit: state.scheduler.circuit_state(), metrics: state.scheduler.metrics() })
}
