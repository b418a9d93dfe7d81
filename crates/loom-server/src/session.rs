//! The per-connection wire-relay loop (spec §4.9): SRP handshake, the
//! binary envelope, path-request dispatch, and subscription/upload
//! bookkeeping for one client.
//!
//! Handles an authenticated, optionally encrypted, optionally compressed
//! binary protocol end to end for a single `WebSocket` upgrade.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use loom_core::ids::{ConnectionId, SubscriptionId, UploadId};
use loom_rpc::context::RpcContext;
use loom_rpc::registry::PathRegistry;
use loom_wire::srp_auth::resume as srp_resume;
use loom_wire::{compression, envelope, frame, AuthMessage, CredentialStore, FrameFormat, RelayMessage, ResumableSessionStore, SrpHandshake};

use crate::connection::{AuthPhase, ClientConnection};
use crate::metrics;
use crate::subscription::{run_activity_subscription, run_session_subscription, SubscriptionEnd};
use crate::upload::UploadManager;

/// Shared, immutable-for-the-connection's-lifetime dependencies a session
/// task needs, bundled so `run_connection`'s signature stays manageable.
pub struct SessionDeps {
    /// Path dispatcher shared across all connections.
    pub registry: Arc<PathRegistry>,
    /// Shared handler context (Supervisor, transcript reader, stores).
    pub rpc_context: Arc<RpcContext>,
    /// SRP credential lookup.
    pub credentials: Arc<dyn CredentialStore>,
    /// Resumable-session registry.
    pub resumable_sessions: Arc<dyn ResumableSessionStore>,
    /// Registers a freshly-authenticated session as resumable.
    pub register_resumable: Arc<dyn Fn(String, String, loom_wire::SessionKey) + Send + Sync>,
    /// Chunked upload staging.
    pub uploads: Arc<UploadManager>,
    /// Filesystem/status event bus backing `activity`-channel subscriptions.
    pub event_bus: loom_watch::EventBus,
    /// Default per-subscription outbound buffer (`TimeoutSettings::outbound_buffer_capacity`).
    pub subscription_buffer: usize,
    /// Heartbeat interval/timeout for this connection.
    pub heartbeat_interval: Duration,
    /// Deadline for the SRP handshake to complete (spec §4.9: close code 4001
    /// past this point).
    pub srp_handshake_timeout: Duration,
    /// Shutdown/cancellation signal shared by the whole server.
    pub shutdown: CancellationToken,
}

struct ActiveSubscription {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<SubscriptionEnd>,
}

/// Outcome of handling one inbound message: keep the loop going, or close
/// the connection with a specific wire close code (spec §4.9/§8).
enum ConnSignal {
    Continue,
    Close(u16, &'static str),
}

/// Close an upgraded socket immediately, before any application message is
/// processed (spec §8 S6: a disallowed Origin gets 4003 and nothing else).
pub async fn reject_origin(socket: WebSocket) {
    let (mut sink, _stream) = socket.split();
    let _ = sink.send(WsMessage::Close(Some(CloseFrame { code: 4003, reason: "forbidden origin".into() }))).await;
}

/// Drive one WebSocket connection end to end until it closes.
pub async fn run_connection(socket: WebSocket, deps: Arc<SessionDeps>) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Vec<u8>>(256);
    let (close_tx, mut close_rx) = oneshot::channel::<(u16, &'static str)>();
    let connection = Arc::new(ClientConnection::new(ConnectionId::new(), outbound_tx, SrpHandshake::new()));

    metrics::gauge_step(metrics::CONNECTIONS_ACTIVE, true);
    metrics::counter_inc(metrics::CONNECTIONS_TOTAL);

    let write_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                close = &mut close_rx => {
                    if let Ok((code, reason)) = close {
                        let _ = sink.send(WsMessage::Close(Some(CloseFrame { code, reason: reason.into() }))).await;
                    }
                    break;
                }
                frame = outbound_rx.recv() => {
                    let Some(bytes) = frame else { break };
                    if sink.send(WsMessage::Binary(bytes)).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let heartbeat_cancel = CancellationToken::new();
    let heartbeat_handle = tokio::spawn(crate::heartbeat::run_heartbeat(
        Arc::clone(&connection),
        deps.heartbeat_interval,
        deps.heartbeat_interval * 2,
        heartbeat_cancel.clone(),
    ));

    let mut subscriptions: HashMap<String, ActiveSubscription> = HashMap::new();
    let mut in_flight_uploads: HashSet<UploadId> = HashSet::new();
    let handshake_deadline = tokio::time::Instant::now() + deps.srp_handshake_timeout;
    let mut close_signal = None;

    loop {
        tokio::select! {
            biased;
            () = deps.shutdown.cancelled() => break,
            () = tokio::time::sleep_until(handshake_deadline), if !connection.is_authenticated() => {
                close_signal = Some((4001, "authentication required"));
                break;
            }
            incoming = stream.next() => {
                let Some(incoming) = incoming else { break };
                let Ok(incoming) = incoming else { break };
                connection.mark_alive();
                match incoming {
                    WsMessage::Close(_) => break,
                    WsMessage::Ping(_) | WsMessage::Pong(_) => {}
                    WsMessage::Text(text) => handle_text(&connection, &deps, &text).await,
                    WsMessage::Binary(bytes) => {
                        if let ConnSignal::Close(code, reason) =
                            handle_binary(&connection, &deps, &bytes, &mut subscriptions, &mut in_flight_uploads).await
                        {
                            close_signal = Some((code, reason));
                            break;
                        }
                    }
                }
            }
        }
    }

    if let Some(signal) = close_signal {
        let _ = close_tx.send(signal);
    }
    for (_, sub) in subscriptions.drain() {
        sub.cancel.cancel();
        let _ = sub.handle.await;
    }
    for upload_id in in_flight_uploads.drain() {
        let _ = deps.uploads.cancel_upload(&upload_id);
    }
    heartbeat_cancel.cancel();
    let _ = heartbeat_handle.await;
    let _ = write_task.await;
    metrics::gauge_step(metrics::CONNECTIONS_ACTIVE, false);
    metrics::counter_inc(metrics::DISCONNECTIONS_TOTAL);
}

/// Pre-authentication messages travel as plain-text JSON frames (spec §4.9:
/// the SRP handshake itself is never encrypted, since no key exists yet).
async fn handle_text(connection: &Arc<ClientConnection>, deps: &Arc<SessionDeps>, text: &str) {
    let Ok(message) = serde_json::from_str::<AuthMessage>(text) else {
        warn!(connection = %connection.id, "unparseable auth-phase message");
        return;
    };
    let reply = drive_auth_message(connection, deps, message);
    if let Some(reply) = reply {
        send_json(connection, &reply);
    }
}

fn send_json(connection: &ClientConnection, value: &impl serde::Serialize) {
    if let Ok(text) = serde_json::to_string(value) {
        let _ = connection.send(text.into_bytes());
    }
}

fn drive_auth_message(connection: &Arc<ClientConnection>, deps: &Arc<SessionDeps>, message: AuthMessage) -> Option<AuthMessage> {
    let mut auth = connection.auth.lock();
    match message {
        AuthMessage::SrpHello { identity } => {
            let AuthPhase::Handshaking(handshake) = &mut *auth else {
                return Some(AuthMessage::SrpError { code: "ALREADY_AUTHENTICATED".into() });
            };
            match handshake.hello(&identity, deps.credentials.as_ref()) {
                Ok((salt, b_pub)) => Some(AuthMessage::challenge(&salt, &b_pub)),
                Err(e) => {
                    metrics::counter_inc(metrics::HANDSHAKE_FAILURES_TOTAL);
                    Some(AuthMessage::SrpError { code: e.code.to_owned() })
                }
            }
        }
        AuthMessage::SrpProof { a_pub, m1 } => {
            let AuthPhase::Handshaking(handshake) = &mut *auth else {
                return Some(AuthMessage::SrpError { code: "ALREADY_AUTHENTICATED".into() });
            };
            let (Ok(a_pub), Ok(m1)) = (loom_wire::decode_b64(&a_pub), loom_wire::decode_b64(&m1)) else {
                return Some(AuthMessage::SrpError { code: "MALFORMED_FRAME".into() });
            };
            match handshake.verify_proof(&a_pub, &m1) {
                Ok(m2) => {
                    let identity = handshake.identity().unwrap_or_default().to_owned();
                    let session_key = *handshake.session_key().expect("just authenticated");
                    let session_id = connection.id.to_string();
                    (deps.register_resumable)(session_id.clone(), identity.clone(), session_key);
                    *auth = AuthPhase::Authenticated { identity, session_key };
                    Some(AuthMessage::verify(&m2, Some(session_id)))
                }
                Err(e) => {
                    metrics::counter_inc(metrics::HANDSHAKE_FAILURES_TOTAL);
                    Some(AuthMessage::SrpError { code: e.code.to_owned() })
                }
            }
        }
        AuthMessage::SrpSessionResume { session_id, identity, proof } => {
            let Ok(proof_bytes) = loom_wire::decode_b64(&proof) else {
                return Some(AuthMessage::SrpSessionInvalid { reason: "malformed proof".into() });
            };
            match srp_resume(&session_id, &identity, &proof_bytes, deps.resumable_sessions.as_ref()) {
                Ok(session_key) => {
                    *auth = AuthPhase::Authenticated { identity, session_key };
                    Some(AuthMessage::SrpSessionResumed { session_id })
                }
                Err(e) => Some(AuthMessage::SrpSessionInvalid { reason: e.message }),
            }
        }
        _ => None,
    }
}

async fn handle_binary(
    connection: &Arc<ClientConnection>,
    deps: &Arc<SessionDeps>,
    bytes: &[u8],
    subscriptions: &mut HashMap<String, ActiveSubscription>,
    in_flight_uploads: &mut HashSet<UploadId>,
) -> ConnSignal {
    let authenticated = connection.is_authenticated();
    if !authenticated {
        warn!(connection = %connection.id, "binary frame received before authentication");
        return ConnSignal::Close(4001, "authentication required");
    }

    let decoded = if frame::looks_like_encrypted_envelope(authenticated, bytes) {
        let Some(key) = connection.session_key() else {
            return ConnSignal::Close(4001, "authentication required");
        };
        match envelope::decrypt(&key, bytes) {
            Ok(plaintext) => frame::decode_frame(&plaintext).map(|(f, p)| (f, p.to_vec())),
            Err(e) => {
                warn!(connection = %connection.id, error = %e, "envelope failed to decrypt");
                return ConnSignal::Close(4002, "unsupported format");
            }
        }
    } else {
        frame::decode_frame(bytes).map(|(f, p)| (f, p.to_vec()))
    };

    let Ok((format, payload)) = decoded else {
        warn!(connection = %connection.id, "malformed binary frame");
        return ConnSignal::Close(4002, "unsupported format");
    };

    match format {
        FrameFormat::Json => {
            if let Ok(text) = std::str::from_utf8(&payload) {
                dispatch_relay_message(connection, deps, text, subscriptions, in_flight_uploads).await;
            }
        }
        FrameFormat::CompressedJson => match compression::decompress(&payload).ok().and_then(|bytes| String::from_utf8(bytes).ok()) {
            Some(text) => dispatch_relay_message(connection, deps, &text, subscriptions, in_flight_uploads).await,
            None => warn!(connection = %connection.id, "failed to decompress frame"),
        },
        FrameFormat::BinaryUpload => handle_upload_chunk(connection, deps, &payload),
    }
    ConnSignal::Continue
}

async fn dispatch_relay_message(
    connection: &Arc<ClientConnection>,
    deps: &Arc<SessionDeps>,
    text: &str,
    subscriptions: &mut HashMap<String, ActiveSubscription>,
    in_flight_uploads: &mut HashSet<UploadId>,
) {
    let Ok(message) = serde_json::from_str::<RelayMessage>(text) else {
        warn!(connection = %connection.id, "unparseable relay message");
        return;
    };

    match message {
        RelayMessage::Request { id, method, path, body, .. } => {
            let (route, query) = split_path_query(&path);
            let (status, response_body) = deps.registry.dispatch(&method, route, query, body, &deps.rpc_context).await;
            send_encoded(connection, &RelayMessage::Response { id, status, headers: None, body: response_body });
        }
        RelayMessage::Subscribe { subscription_id, channel, session_id } => {
            start_subscription(connection, deps, subscription_id, channel, session_id, subscriptions);
        }
        RelayMessage::Unsubscribe { subscription_id } => {
            if let Some(sub) = subscriptions.remove(&subscription_id) {
                sub.cancel.cancel();
                let _ = sub.handle.await;
            }
        }
        RelayMessage::UploadStart { upload_id, project_id, session_id, filename, size, .. } => {
            let Ok(id) = parse_upload_id(&upload_id) else { return };
            match deps.uploads.start_upload(id.clone(), project_id, session_id, filename, size) {
                Ok(()) => {
                    in_flight_uploads.insert(id);
                    send_encoded(connection, &RelayMessage::UploadProgress { upload_id, bytes_received: 0 });
                }
                Err(e) => send_encoded(connection, &RelayMessage::UploadError { upload_id, code: e.code.to_owned(), message: e.message }),
            }
        }
        RelayMessage::UploadEnd { upload_id } => {
            let Ok(id) = parse_upload_id(&upload_id) else { return };
            in_flight_uploads.remove(&id);
            match deps.uploads.complete_upload(&id) {
                Ok(file_ref) => send_encoded(
                    connection,
                    &RelayMessage::UploadComplete { upload_id, file_ref: file_ref.path.to_string_lossy().into_owned() },
                ),
                Err(e) => send_encoded(connection, &RelayMessage::UploadError { upload_id, code: e.code.to_owned(), message: e.message }),
            }
        }
        RelayMessage::ClientCapabilities { formats } => {
            if let Some(preferred) = preferred_format(&formats) {
                *connection.format.lock() = preferred;
            }
        }
        _ => {}
    }
}

fn handle_upload_chunk(connection: &Arc<ClientConnection>, deps: &Arc<SessionDeps>, payload: &[u8]) {
    let Ok(chunk) = loom_wire::upload::parse_chunk(payload) else {
        warn!(connection = %connection.id, "malformed upload chunk");
        return;
    };
    let upload_id = UploadId::from_string(uuid::Uuid::from_bytes(chunk.upload_id).to_string());
    match deps.uploads.write_chunk(&upload_id, chunk.offset, chunk.bytes) {
        Ok(bytes_received) => send_encoded(
            connection,
            &RelayMessage::UploadProgress { upload_id: upload_id.to_string(), bytes_received },
        ),
        Err(e) => send_encoded(
            connection,
            &RelayMessage::UploadError { upload_id: upload_id.to_string(), code: e.code.to_owned(), message: e.message },
        ),
    }
}

fn start_subscription(
    connection: &Arc<ClientConnection>,
    deps: &Arc<SessionDeps>,
    subscription_id: String,
    channel: String,
    session_id: Option<String>,
    subscriptions: &mut HashMap<String, ActiveSubscription>,
) {
    let (event_tx, mut event_rx) = mpsc::channel::<RelayMessage>(deps.subscription_buffer);
    let cancel = CancellationToken::new();
    let sub_id = SubscriptionId::from_string(subscription_id.clone());
    let buffer = deps.subscription_buffer;
    let run_cancel = cancel.clone();

    let join_handle = match crate::subscription::SubscribeChannel::parse(&channel) {
        Some(crate::subscription::SubscribeChannel::Session) => {
            let Some(session_id) = session_id else {
                warn!(connection = %connection.id, %subscription_id, "session channel subscribe missing sessionId");
                return;
            };
            let Some(process) = deps.rpc_context.supervisor.get_process_for_session(&loom_core::ids::SessionId::from_string(session_id)) else {
                return;
            };
            tokio::spawn(run_session_subscription(sub_id, process, event_tx, buffer, run_cancel))
        }
        Some(crate::subscription::SubscribeChannel::Activity) => {
            let bus_rx = deps.event_bus.subscribe();
            tokio::spawn(run_activity_subscription(sub_id, bus_rx, event_tx, run_cancel))
        }
        None => {
            warn!(connection = %connection.id, %subscription_id, %channel, "unknown subscribe channel");
            return;
        }
    };

    let forward_connection = Arc::clone(connection);
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            send_encoded(&forward_connection, &event);
        }
    });

    subscriptions.insert(subscription_id, ActiveSubscription { cancel, handle: join_handle });
}

fn send_encoded(connection: &ClientConnection, message: &RelayMessage) {
    let Ok(text) = serde_json::to_string(message) else { return };
    let declared_format = *connection.format.lock();
    let (format, payload) = match declared_format {
        FrameFormat::CompressedJson => match compression::compress(text.as_bytes()) {
            Ok(bytes) => (FrameFormat::CompressedJson, bytes),
            Err(_) => (FrameFormat::Json, text.into_bytes()),
        },
        _ => (FrameFormat::Json, text.into_bytes()),
    };
    let framed = frame::encode_frame(format, &payload);
    let outgoing = match connection.session_key() {
        Some(key) => envelope::encrypt(&key, &framed),
        None => framed,
    };
    let _ = connection.send(outgoing);
}

fn preferred_format(declared: &[String]) -> Option<FrameFormat> {
    [FrameFormat::CompressedJson, FrameFormat::Json]
        .into_iter()
        .find(|format| declared.iter().any(|name| name == format.name()))
}

fn split_path_query(path: &str) -> (&str, &str) {
    match path.split_once('?') {
        Some((route, query)) => (route, query),
        None => (path, ""),
    }
}

fn parse_upload_id(raw: &str) -> Result<UploadId, ()> {
    if raw.is_empty() {
        return Err(());
    }
    Ok(UploadId::from_string(raw.to_owned()))
}
