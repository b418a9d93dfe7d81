//! Per-connection wire-relay state.
//!
//! `ClientConnection` bundles an outbound mpsc sender, a liveness flag, and
//! a dropped-message counter with the authentication phase: the
//! `loom_wire::srp_auth::SrpHandshake` state and, once authenticated, the
//! derived `SessionKey` every outgoing frame is encrypted under (spec
//! §4.9).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use loom_core::ids::ConnectionId;
use loom_wire::{FrameFormat, SessionKey};

/// One wire-relay connection's authentication progress.
pub enum AuthPhase {
    /// Handshake not yet complete.
    Handshaking(loom_wire::SrpHandshake),
    /// SRP verified; every frame from here on is encrypted under this key.
    Authenticated {
        /// Identity the client proved ownership of.
        identity: String,
        /// Session key derived by the handshake.
        session_key: SessionKey,
    },
}

/// A connected wire-relay client.
pub struct ClientConnection {
    /// Unique connection id.
    pub id: ConnectionId,
    /// Bound session id (set when a `Subscribe`/request first names one).
    session_id: Mutex<Option<String>>,
    /// Raw outbound byte frames to the client's write task (already
    /// encoded per [`FrameFormat`]; see `session.rs`).
    tx: mpsc::Sender<Vec<u8>>,
    /// Authentication state machine.
    pub auth: Mutex<AuthPhase>,
    /// Wire format the client declared via `ClientCapabilities` (defaults
    /// to plain JSON until a capability message arrives).
    pub format: Mutex<FrameFormat>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the client has shown activity since the last heartbeat tick.
    pub is_alive: AtomicBool,
    last_activity: Mutex<Instant>,
    /// Count of messages dropped due to a full outbound channel.
    pub dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new, unauthenticated connection.
    #[must_use]
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Vec<u8>>, handshake: loom_wire::SrpHandshake) -> Self {
        let now = Instant::now();
        Self {
            id,
            session_id: Mutex::new(None),
            tx,
            auth: Mutex::new(AuthPhase::Handshaking(handshake)),
            format: Mutex::new(FrameFormat::Json),
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_activity: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Bind this connection to a session (the last one it subscribed to or
    /// issued a request against — used for `/healthz`'s connection count,
    /// not for routing).
    pub fn bind_session(&self, session_id: String) {
        *self.session_id.lock() = Some(session_id);
    }

    /// The currently bound session id, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    /// Whether the SRP handshake has completed.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(&*self.auth.lock(), AuthPhase::Authenticated { .. })
    }

    /// The derived session key, once authenticated.
    #[must_use]
    pub fn session_key(&self) -> Option<SessionKey> {
        match &*self.auth.lock() {
            AuthPhase::Authenticated { session_key, .. } => Some(*session_key),
            AuthPhase::Handshaking(_) => None,
        }
    }

    /// Send a raw byte frame to the client's write task.
    ///
    /// Returns `false` if the channel is full or closed, incrementing the
    /// dropped-message counter.
    pub fn send(&self, frame: Vec<u8>) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Record activity (any inbound message, not just a pong).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_activity.lock() = Instant::now();
    }

    /// Duration since the last recorded activity.
    #[must_use]
    pub fn last_activity_elapsed(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Check and reset the alive flag for the heartbeat loop.
    #[must_use]
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

pub(crate) type SharedConnection = Arc<ClientConnection>;

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection() -> (ClientConnection, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(32);
        let conn = ClientConnection::new(ConnectionId::new(), tx, loom_wire::SrpHandshake::new());
        (conn, rx)
    }

    #[test]
    fn new_connection_is_unauthenticated() {
        let (conn, _rx) = make_connection();
        assert!(!conn.is_authenticated());
        assert!(conn.session_id().is_none());
    }

    #[tokio::test]
    async fn send_success_delivers_frame() {
        let (conn, mut rx) = make_connection();
        assert!(conn.send(vec![1, 2, 3]));
        assert_eq!(rx.recv().await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn send_to_closed_channel_returns_false_and_counts_drop() {
        let (tx, rx) = mpsc::channel(32);
        let conn = ClientConnection::new(ConnectionId::new(), tx, loom_wire::SrpHandshake::new());
        drop(rx);
        assert!(!conn.send(vec![1]));
        assert_eq!(conn.dropped_messages.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn bind_and_rebind_session() {
        let (conn, _rx) = make_connection();
        conn.bind_session("s1".into());
        assert_eq!(conn.session_id().as_deref(), Some("s1"));
        conn.bind_session("s2".into());
        assert_eq!(conn.session_id().as_deref(), Some("s2"));
    }

    #[test]
    fn mark_alive_and_check_alive_toggle() {
        let (conn, _rx) = make_connection();
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
    }
}
