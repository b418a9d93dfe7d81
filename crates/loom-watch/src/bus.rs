//! Event bus (spec §4.2): a single-producer broadcast of filesystem and
//! session-status events. "Single-threaded dispatch guarantees a
//! subscriber observes events in the order they were published" — only
//! the watcher task (or an explicit `publish` caller, e.g. the Supervisor)
//! ever sends, so `tokio::sync::broadcast`'s per-sender ordering is
//! sufficient.

use std::path::PathBuf;

use tokio::sync::broadcast;

use crate::classify::PathKind;

/// How a path changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    /// The path was created.
    Created,
    /// The path's contents changed (also the coalesced result of
    /// create+write bursts within the debounce window).
    Modified,
    /// The path was removed.
    Removed,
}

/// One event published on the bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchEvent {
    /// A filesystem change, already classified and coalesced.
    FileChange {
        /// What kind of path this is.
        kind: PathKind,
        /// The affected path.
        path: PathBuf,
        /// How it changed.
        change: ChangeKind,
    },
    /// Synthesized by the Supervisor when a session's ownership changes
    /// (e.g. this process takes over, or releases, a session).
    SessionStatusChange {
        /// The affected session id.
        session_id: String,
        /// Whether this process now owns the session.
        owned: bool,
    },
}

/// Default channel capacity. A slow subscriber that falls this far behind
/// starts missing events (`broadcast::Receiver::recv` returns `Lagged`);
/// callers should resync from disk when that happens, since the transcript
/// on disk is always authoritative (spec §1).
const CHANNEL_CAPACITY: usize = 1024;

/// A process-wide publish point for [`WatchEvent`]s. Created explicitly by
/// [`crate::init`], never as an ambient singleton (spec §9 "own them
/// explicitly").
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WatchEvent>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        let (sender, _receiver) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish an event to every current subscriber.
    pub fn publish(&self, event: WatchEvent) {
        // No receivers is a normal, not an error, state (nobody's
        // subscribed yet at startup).
        let _ = self.sender.send(event);
    }

    /// Subscribe to the event stream from this point forward. Subscribers
    /// created after events were published do not see history; callers
    /// needing catch-up re-read from disk (the Subscription layer's job).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(WatchEvent::SessionStatusChange {
            session_id: "s1".into(),
            owned: true,
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            WatchEvent::SessionStatusChange {
                session_id: "s1".into(),
                owned: true
            }
        );
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_in_order() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        bus.publish(WatchEvent::SessionStatusChange { session_id: "a".into(), owned: true });
        bus.publish(WatchEvent::SessionStatusChange { session_id: "b".into(), owned: false });

        for rx in [&mut rx1, &mut rx2] {
            let first = rx.recv().await.unwrap();
            let second = rx.recv().await.unwrap();
            assert!(matches!(first, WatchEvent::SessionStatusChange { session_id, .. } if session_id == "a"));
            assert!(matches!(second, WatchEvent::SessionStatusChange { session_id, .. } if session_id == "b"));
        }
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(WatchEvent::SessionStatusChange { session_id: "s1".into(), owned: true });
    }
}
