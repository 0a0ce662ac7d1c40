//! Relay server entry point.
//!
//! Reads process configuration from the environment, wires up the store,
//! ASR backend, scheduler, pairing registry and WebSocket hub, then serves
//! the HTTP surface until interrupted.

use dental_relay::asr::{AsrBackend, CloudAsr};
use dental_relay::auth::{AdminDirectory, TokenService};
use dental_relay::http::{self, AppState, SharedStore};
use dental_relay::pairing::PairingRegistry;
use dental_relay::scheduler::Scheduler;
use dental_relay::store::{CachedConfigStore, ConfigStore, HttpConfigStore, InMemoryConfigStore};
use dental_relay::ws;
use dental_relay::ServerConfig;
use axum_extra::extract::cookie::Key;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = ServerConfig::from_env()?;
    let _log_guard = dental_relay::diagnostics::init(std::env::var("LOG_DIR").ok().as_deref());

    tracing::info!(bind_addr = %config.bind_addr, "relay starting");

    let store: Arc<dyn ConfigStore> = match &config.store_url {
        Some(url) => {
            let service_key = config.store_service_key.clone().unwrap_or_default();
            Arc::new(HttpConfigStore::new(url.clone(), service_key)?)
        }
        None => {
            tracing::warn!("STORE_URL not set, using in-memory config store");
            Arc::new(InMemoryConfigStore::new())
        }
    };
    let store: Arc<SharedStore> = Arc::new(CachedConfigStore::new(store));

    let asr: Arc<dyn AsrBackend> = {
        let api_key = config
            .asr_api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("ASR_API_KEY is required"))?;
        Arc::new(CloudAsr::new(api_key, config.model_id.clone())?)
    };

    let pairing = Arc::new(PairingRegistry::new(config.pair_code_ttl));
    let tokens = Arc::new(TokenService::new(&config.jwt_secret, config.ws_token_ttl));
    let admins = Arc::new(AdminDirectory::new(config.admin_email.clone(), config.admin_password.clone()));
    let cookie_key = Key::derive_from(config.jwt_secret.as_bytes());

    let hub = ws::Hub::new(Arc::clone(&pairing), config.audio_buffer.clone(), config.heartbeat_stale);

    let cancel = CancellationToken::new();

    let (scheduler_handle, scheduler_task) = Scheduler::spawn(
        config.scheduler.clone(),
        config.audio_buffer.clone(),
        config.aggregator.clone(),
        Arc::clone(&asr),
        Arc::clone(&store),
        Arc::clone(&hub) as Arc<dyn dental_relay::scheduler::ResultSink>,
        cancel.clone(),
    );
    hub.bind_scheduler(scheduler_handle.clone());

    Arc::clone(&pairing).spawn_gc(std::time::Duration::from_secs(30), cancel.clone());
    spawn_heartbeat_reaper(Arc::clone(&hub), config.heartbeat_stale, cancel.clone());

    let state = AppState {
        hub,
        tokens,
        pairing,
        store,
        asr,
        admins,
        scheduler: scheduler_handle,
        cookie_key,
        max_upload_bytes: config.max_upload_bytes,
    };

    let router = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;

    let shutdown_cancel = cancel.clone();
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        shutdown_signal().await;
        shutdown_cancel.cancel();
    });

    if let Err(e) = server.await {
        tracing::error!(error = %e, "relay server exited with error");
        return Err(anyhow::anyhow!("relay server failed: {e}"));
    }

    cancel.cancel();
    let _ = scheduler_task.await;
    tracing::info!("relay shut down cleanly");
    Ok(())
}

fn spawn_heartbeat_reaper(hub: Arc<ws::Hub>, stale: std::time::Duration, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(stale);
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => hub.reap_stale_sessions(),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
