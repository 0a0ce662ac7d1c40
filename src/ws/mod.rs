//! C8 — WebSocket connection lifecycle, message routing, and heartbeat
//! tracking (§4.8).
//!
//! A `GatewayState`-style `Router::with_state` pattern, generalized from a
//! one-shot webhook handler to a long-lived bidirectional socket per
//! connection.

mod messages;

pub use messages::{InboundMessage, OutboundMessage};

use crate::audio::ClientAudioBuffer;
use crate::auth::{Claims, DeviceType as AuthDeviceType, TokenService};
use crate::config::AudioBufferConfig;
use crate::pairing::PairingRegistry;
use crate::scheduler::{AudioChunk, Priority, ResultSink, SchedulerHandle, TranscriptionOutcome};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use base64::Engine;
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

type Sink = Arc<tokio::sync::Mutex<SplitSink<WebSocket, Message>>>;

/// One connected WebSocket, identified by the id its client chose in its
/// `identify`/`mobile_init` message (§3 `Session`).
struct Session {
    device_type: DeviceType,
    principal_id: String,
    channel_id: parking_lot::Mutex<Option<String>>,
    last_activity: parking_lot::Mutex<Instant>,
    sink: Sink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceType {
    Desktop,
    Mobile,
}

/// Registry of live sessions plus the machinery to route audio and results
/// between them (§4.8, §5).
pub struct Hub {
    sessions: parking_lot::RwLock<HashMap<String, Arc<Session>>>,
    pairing: Arc<PairingRegistry>,
    scheduler: parking_lot::RwLock<Option<SchedulerHandle>>,
    audio_buffer_config: AudioBufferConfig,
    heartbeat_stale: Duration,
}

impl Hub {
    #[must_use]
    pub fn new(pairing: Arc<PairingRegistry>, audio_buffer_config: AudioBufferConfig, heartbeat_stale: Duration) -> Arc<Self> {
        Arc::new(Self {
            sessions: parking_lot::RwLock::new(HashMap::new()),
            pairing,
            scheduler: parking_lot::RwLock::new(None),
            audio_buffer_config,
            heartbeat_stale,
        })
    }

    /// Bind the scheduler handle once it is available (breaks the
    /// construction cycle: the Scheduler's `ResultSink` is this Hub).
    pub fn bind_scheduler(&self, handle: SchedulerHandle) {
        *self.scheduler.write() = Some(handle);
    }

    /// Reap sessions silent for longer than `heartbeat_stale` (§4.8).
    pub fn reap_stale_sessions(&self) {
        let now = Instant::now();
        let stale: Vec<String> = self
            .sessions
            .read()
            .iter()
            .filter(|(_, s)| now.duration_since(*s.last_activity.lock()) >= self.heartbeat_stale)
            .map(|(id, _)| id.clone())
            .collect();
        for id in stale {
            info!(session_id = %id, "reaping stale session");
            self.remove_session(&id);
        }
    }

    fn remove_session(&self, session_id: &str) {
        let Some(session) = self.sessions.write().remove(session_id) else {
            return;
        };
        let Some(channel_id) = session.channel_id.lock().clone() else {
            return;
        };
        if session.device_type == DeviceType::Mobile {
            self.pairing.clear_mobile(&channel_id);
            if let Some(channel) = self.pairing.channel(&channel_id) {
                if let Some(desktop) = self.sessions.read().get(&channel.desktop_session_id) {
                    let desktop = Arc::clone(desktop);
                    tokio::spawn(async move {
                        send(&desktop.sink, &OutboundMessage::MobileDisconnected).await;
                    });
                }
            }
        }
    }

    /// Whether `session_id` is currently registered (§3 `Session` liveness,
    /// used by `PairingRegistry::claim` to enforce `NoDesktop`).
    #[must_use]
    pub fn has_session(&self, session_id: &str) -> bool {
        self.sessions.read().contains_key(session_id)
    }

    fn admin_id_for_channel(&self, channel_id: &str) -> Option<String> {
        let channel = self.pairing.channel(channel_id)?;
        self.sessions.read().get(&channel.desktop_session_id).map(|s| s.principal_id.clone())
    }
}

#[async_trait]
impl ResultSink for Hub {
    async fn deliver(&self, outcome: TranscriptionOutcome) {
        let message = OutboundMessage::TranscriptionResult {
            text: outcome.normalized_text.clone(),
            raw: outcome.raw_text.clone(),
            normalized: outcome.normalized_text,
            session_text: None,
            language: "nl".to_owned(),
            duration: 0.0,
            chunk_id: Some(outcome.chunk_id),
            timestamp: chrono::Utc::now().timestamp(),
        };

        if let Some(desktop) = self.sessions.read().get(&outcome.desktop_session_id) {
            send(&desktop.sink, &message).await;
        }
        if let Some(mobile_id) = &outcome.mobile_session_id {
            if let Some(mobile) = self.sessions.read().get(mobile_id) {
                send(&mobile.sink, &message).await;
            }
        }
    }
}

/// Entry point from the `/ws` route handler, after the upgrade completes.
pub async fn handle_socket(socket: WebSocket, hub: Arc<Hub>, tokens: Arc<TokenService>, subprotocol_token: Option<String>) {
    let claims = match subprotocol_token.as_deref().map(|t| tokens.verify(t)) {
        Some(Ok(claims)) => claims,
        _ => {
            warn!("closing WS: missing or invalid bearer token");
            let _ = socket.close().await;
            return;
        }
    };

    let (raw_sink, mut stream) = socket.split();
    let sink: Sink = Arc::new(tokio::sync::Mutex::new(raw_sink));
    send(&sink, &OutboundMessage::Connected).await;

    let mut session_id: Option<String> = None;
    let mut buffer = ClientAudioBuffer::new(hub.audio_buffer_config.clone());

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(text) => {
                match serde_json::from_str::<InboundMessage>(&text) {
                    Ok(inbound) => {
                        handle_inbound(&hub, &sink, &claims, &mut session_id, &mut buffer, inbound).await;
                    }
                    Err(e) => {
                        send(&sink, &OutboundMessage::Error { message: format!("malformed message: {e}") }).await;
                    }
                }
            }
            Message::Binary(bytes) => {
                handle_audio_bytes(&hub, &sink, &claims, session_id.as_deref(), &mut buffer, bytes.to_vec(), false).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    if let Some(id) = session_id {
        hub.remove_session(&id);
    }
}

async fn handle_inbound(
    hub: &Arc<Hub>,
    sink: &Sink,
    claims: &Claims,
    session_id: &mut Option<String>,
    buffer: &mut ClientAudioBuffer,
    inbound: InboundMessage,
) {
    match inbound {
        InboundMessage::Identify { session_id: id, .. } => {
            register_session(hub, sink, claims, DeviceType::Desktop, id.clone());
            *session_id = Some(id);
            send(sink, &OutboundMessage::Identified { device_type: "desktop".to_owned() }).await;
        }
        InboundMessage::MobileInit { session_id: id, pairing_code, .. } => {
            register_session(hub, sink, claims, DeviceType::Mobile, id.clone());
            match hub.pairing.claim(&pairing_code, &id, |desktop_id| hub.has_session(desktop_id)) {
                Ok(result) => {
                    if let Some(session) = hub.sessions.read().get(&id) {
                        *session.channel_id.lock() = Some(result.channel_id.clone());
                    }
                    *session_id = Some(id);
                    send(sink, &OutboundMessage::ChannelJoined { channel: result.channel_id }).await;
                }
                Err(e) => {
                    hub.remove_session(&id);
                    send(sink, &OutboundMessage::Error { message: e.to_string() }).await;
                }
            }
        }
        InboundMessage::Ping { sequence } => {
            if let Some(id) = session_id.as_deref() {
                touch(hub, id);
            }
            send(sink, &OutboundMessage::Pong { sequence }).await;
        }
        InboundMessage::ChannelMessage { payload, .. } => {
            if let Some(id) = session_id.as_deref() {
                relay_channel_message(hub, id, payload).await;
            }
        }
        InboundMessage::AudioData { audio_data, .. } => {
            match base64::engine::general_purpose::STANDARD.decode(audio_data) {
                Ok(bytes) => handle_audio_bytes(hub, sink, claims, session_id.as_deref(), buffer, bytes, false).await,
                Err(_) => send(sink, &OutboundMessage::Error { message: "invalid base64 audio_data".to_owned() }).await,
            }
        }
        InboundMessage::FlushAudio => {
            if let Some(payload) = buffer.force_flush() {
                enqueue_chunk(hub, session_id.as_deref(), payload, Priority::Batch, true).await;
            }
        }
    }
}

async fn handle_audio_bytes(
    hub: &Arc<Hub>,
    sink: &Sink,
    _claims: &Claims,
    session_id: Option<&str>,
    buffer: &mut ClientAudioBuffer,
    bytes: Vec<u8>,
    is_final: bool,
) {
    if session_id.is_none() {
        send(sink, &OutboundMessage::Error { message: "audio received before identify".to_owned() }).await;
        return;
    }
    touch(hub, session_id.unwrap());
    if let Some(payload) = buffer.add_chunk(bytes) {
        enqueue_chunk(hub, session_id, payload, Priority::Realtime, is_final).await;
    }
}

/// Fan `payload` out to the other member of `sender_id`'s channel verbatim
/// (§4.8 `channel_message`).
async fn relay_channel_message(hub: &Arc<Hub>, sender_id: &str, payload: serde_json::Value) {
    let Some(channel_id) = hub.sessions.read().get(sender_id).and_then(|s| s.channel_id.lock().clone()) else {
        return;
    };
    let Some(channel) = hub.pairing.channel(&channel_id) else { return };
    let target_id = if channel.desktop_session_id == sender_id {
        channel.mobile_session_id
    } else {
        Some(channel.desktop_session_id)
    };
    let Some(target_id) = target_id else { return };
    if let Some(target) = hub.sessions.read().get(&target_id) {
        let target = Arc::clone(target);
        send(&target.sink, &OutboundMessage::ChannelMessage { payload }).await;
    }
}

async fn enqueue_chunk(hub: &Arc<Hub>, session_id: Option<&str>, payload: Vec<u8>, priority: Priority, is_final: bool) {
    let Some(client_id) = session_id else { return };
    let Some(channel_id) = hub.sessions.read().get(client_id).and_then(|s| s.channel_id.lock().clone()) else {
        return;
    };
    let Some(channel) = hub.pairing.channel(&channel_id) else { return };
    let Some(admin_id) = hub.admin_id_for_channel(&channel_id) else { return };

    let Some(scheduler) = hub.scheduler.read().clone() else { return };
    static NEXT_CHUNK_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);
    let chunk = AudioChunk {
        chunk_id: NEXT_CHUNK_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
        client_id: client_id.to_owned(),
        desktop_session_id: channel.desktop_session_id,
        mobile_session_id: channel.mobile_session_id,
        admin_id,
        language: "nl".to_owned(),
        priority,
        payload,
        is_final,
        enqueued_at: Instant::now(),
    };
    scheduler.enqueue(chunk).await;
}

fn register_session(hub: &Arc<Hub>, sink: &Sink, claims: &Claims, device_type: DeviceType, id: String) {
    let principal_id = match claims.device_type {
        AuthDeviceType::Desktop => claims.sub.clone(),
        AuthDeviceType::Mobile => claims.inherited_from.clone().unwrap_or_else(|| claims.sub.clone()),
    };
    let session = Arc::new(Session {
        device_type,
        principal_id,
        channel_id: parking_lot::Mutex::new(None),
        last_activity: parking_lot::Mutex::new(Instant::now()),
        sink: Arc::clone(sink),
    });
    hub.sessions.write().insert(id, session);
}

fn touch(hub: &Arc<Hub>, session_id: &str) {
    if let Some(session) = hub.sessions.read().get(session_id) {
        *session.last_activity.lock() = Instant::now();
    }
}

async fn send(sink: &Sink, message: &OutboundMessage) {
    let Ok(text) = serde_json::to_string(message) else { return };
    let mut guard = sink.lock().await;
    if guard.send(Message::Text(text.into())).await.is_err() {
        debug!("dropping write to a closed connection");
    }
}
