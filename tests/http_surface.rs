#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Integration tests for the HTTP surface (§6, §4.10): login, pairing, and
//! lexicon admin routes driven end-to-end through the real router via
//! `tower::ServiceExt::oneshot`.

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum_extra::extract::cookie::Key;
use dental_relay::asr::{AsrBackend, AsrError, TranscribeOptions, TranscriptionMetadata, TranscriptionResult};
use dental_relay::auth::{AdminDirectory, TokenService};
use dental_relay::config::{AggregatorConfig, AudioBufferConfig, SchedulerConfig};
use dental_relay::http::{self, AppState};
use dental_relay::pairing::PairingRegistry;
use dental_relay::scheduler::Scheduler;
use dental_relay::store::{CachedConfigStore, InMemoryConfigStore};
use dental_relay::ws;
use http_body_util::BodyExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

struct EchoAsr;

#[async_trait]
impl AsrBackend for EchoAsr {
    fn name(&self) -> &str {
        "echo"
    }

    async fn transcribe(&self, audio: &[u8], language: &str, _options: &TranscribeOptions) -> Result<TranscriptionResult, AsrError> {
        Ok(TranscriptionResult {
            segments: Vec::new(),
            text: String::from_utf8_lossy(audio).into_owned(),
            language: language.to_owned(),
            duration_secs: 0.0,
            metadata: TranscriptionMetadata { provider: "echo".to_owned(), model: "echo".to_owned(), prompt: None },
        })
    }
}

fn test_router() -> Router {
    let store = Arc::new(CachedConfigStore::new(Arc::new(InMemoryConfigStore::new()) as Arc<dyn dental_relay::store::ConfigStore>));
    let asr: Arc<dyn AsrBackend> = Arc::new(EchoAsr);
    let pairing = Arc::new(PairingRegistry::new(Duration::from_secs(600)));
    let tokens = Arc::new(TokenService::new("test-secret-at-least-this-long", Duration::from_secs(3600)));
    let admins = Arc::new(AdminDirectory::new("admin@example.com", "hunter2"));
    let cookie_key = Key::derive_from(b"test-secret-at-least-this-long-enough-for-derive-from");
    let hub = ws::Hub::new(Arc::clone(&pairing), AudioBufferConfig::default(), Duration::from_secs(60));

    let cancel = CancellationToken::new();
    let (scheduler, _task) = Scheduler::spawn(
        SchedulerConfig::default(),
        AudioBufferConfig::default(),
        AggregatorConfig::default(),
        Arc::clone(&asr),
        Arc::clone(&store),
        Arc::clone(&hub) as Arc<dyn dental_relay::scheduler::ResultSink>,
        cancel,
    );
    hub.bind_scheduler(scheduler.clone());

    let state = AppState {
        hub,
        tokens,
        pairing,
        store,
        asr,
        admins,
        scheduler,
        cookie_key,
        max_upload_bytes: 1024 * 1024,
    };
    http::build_router(state)
}

fn session_cookie_header(set_cookie: &str) -> String {
    set_cookie.split(';').next().expect("cookie has at least one segment").to_owned()
}

#[tokio::test]
async fn health_check_returns_ok() {
    let app = test_router();
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn login_rejects_wrong_password() {
    let app = test_router();
    let body = serde_json::json!({ "email": "admin@example.com", "password": "wrong" });
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_then_lexicon_full_round_trip() {
    let app = test_router();

    let body = serde_json::json!({ "email": "admin@example.com", "password": "hunter2" });
    let login_response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(login_response.status(), StatusCode::OK);
    let set_cookie = login_response
        .headers()
        .get(header::SET_COOKIE)
        .expect("login sets a session cookie")
        .to_str()
        .unwrap()
        .to_owned();
    let cookie = session_cookie_header(&set_cookie);

    let lexicon_response = app
        .oneshot(
            Request::builder()
                .uri("/api/lexicon/full")
                .header(header::COOKIE, cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(lexicon_response.status(), StatusCode::OK);
    let bytes = lexicon_response.into_body().collect().await.unwrap().to_bytes();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert!(value.get("categories").is_some());
}

#[tokio::test]
async fn lexicon_full_without_session_is_unauthorized() {
    let app = test_router();
    let response = app
        .oneshot(Request::builder().uri("/api/lexicon/full").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn pair_device_without_live_desktop_session_fails() {
    let app = test_router();

    let login_body = serde_json::json!({ "email": "admin@example.com", "password": "hunter2" });
    let login_response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(login_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let cookie = session_cookie_header(login_response.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap());

    let generate_body = serde_json::json!({ "desktop_session_id": "desktop-1" });
    let generate_response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/generate-pair-code")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::COOKIE, cookie)
                .body(Body::from(generate_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(generate_response.status(), StatusCode::OK);
    let bytes = generate_response.into_body().collect().await.unwrap().to_bytes();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let code = value.get("code").and_then(|v| v.as_str()).expect("pair code present").to_owned();

    // "desktop-1" was never registered as a live `/ws` session (the request
    // above only asked the registry to issue a code), so the claim must be
    // rejected with `NoDesktop` rather than joining the mobile anyway.
    let pair_body = serde_json::json!({ "code": code, "mobile_session_id": "mobile-1" });
    let pair_response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/pair-device")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(pair_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(pair_response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn ai_status_reports_closed_circuit_initially() {
    let app = test_router();
    let response = app
        .oneshot(Request::builder().uri("/api/ai/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["circuit"]["state"], "closed");
}
