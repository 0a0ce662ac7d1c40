//! `reqwest`-based adapter to an OpenAI-compatible cloud transcription API.

use super::{AsrBackend, AsrError, Segment, TranscribeOptions, TranscriptionMetadata, TranscriptionResult};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, multipart};
use serde::Deserialize;
use std::time::Duration;

/// Cloud ASR backend (§9 `AsrBackendKind::Cloud`).
pub struct CloudAsr {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
    #[serde(default)]
    segments: Vec<CloudSegment>,
    #[serde(default)]
    duration: Option<f64>,
}

#[derive(Deserialize)]
struct CloudSegment {
    id: u32,
    text: String,
    start: f64,
    end: f64,
}

impl CloudAsr {
    /// # Errors
    ///
    /// Returns [`AsrError::Unavailable`] if the HTTP client cannot be built.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, AsrError> {
        Self::with_base_url(api_key, model, "https://api.openai.com/v1")
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, AsrError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AsrError::Unavailable(format!("cannot build ASR HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    fn classify_status(status: StatusCode, body: String) -> AsrError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AsrError::AuthFailed(body),
            StatusCode::TOO_MANY_REQUESTS => AsrError::RateLimited(body),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => AsrError::InvalidAudio(body),
            s if s.is_server_error() => AsrError::Transient(body),
            _ => AsrError::Transient(body),
        }
    }
}

#[async_trait]
impl AsrBackend for CloudAsr {
    fn name(&self) -> &str {
        "cloud"
    }

    async fn transcribe(
        &self,
        audio: &[u8],
        language: &str,
        options: &TranscribeOptions,
    ) -> Result<TranscriptionResult, AsrError> {
        let part = multipart::Part::bytes(audio.to_vec())
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| AsrError::InvalidAudio(format!("cannot build multipart body: {e}")))?;

        let mut form = multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", language.to_owned());
        if let Some(prompt) = &options.prompt {
            form = form.text("prompt", prompt.clone());
        }

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| AsrError::Transient(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, body));
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| AsrError::Transient(format!("cannot decode response: {e}")))?;

        let segments = if parsed.segments.is_empty() {
            vec![Segment {
                id: 0,
                text: parsed.text.clone(),
                start: 0.0,
                end: parsed.duration.unwrap_or(0.0),
            }]
        } else {
            parsed
                .segments
                .into_iter()
                .map(|s| Segment {
                    id: s.id,
                    text: s.text,
                    start: s.start,
                    end: s.end,
                })
                .collect()
        };

        Ok(TranscriptionResult {
            segments,
            text: parsed.text,
            language: language.to_owned(),
            duration_secs: parsed.duration.unwrap_or(0.0),
            metadata: TranscriptionMetadata {
                provider: "cloud".to_owned(),
                model: self.model.clone(),
                prompt: options.prompt.clone(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_status_maps_auth_and_rate_limit_correctly() {
        assert!(matches!(
            CloudAsr::classify_status(StatusCode::UNAUTHORIZED, "x".into()),
            AsrError::AuthFailed(_)
        ));
        assert!(matches!(
            CloudAsr::classify_status(StatusCode::TOO_MANY_REQUESTS, "x".into()),
            AsrError::RateLimited(_)
        ));
        assert!(matches!(
            CloudAsr::classify_status(StatusCode::BAD_REQUEST, "x".into()),
            AsrError::InvalidAudio(_)
        ));
        assert!(matches!(
            CloudAsr::classify_status(StatusCode::BAD_GATEWAY, "x".into()),
            AsrError::Transient(_)
        ));
    }

    #[tokio::test]
    async fn transcribe_against_unreachable_host_is_transient() {
        let asr = CloudAsr::with_base_url("key", "model", "http://127.0.0.1:1")
            .expect("client builds");
        let result = asr
            .transcribe(&[0u8; 4], "nl", &TranscribeOptions::default())
            .await;
        assert!(matches!(result, Err(AsrError::Transient(_))));
    }
}
