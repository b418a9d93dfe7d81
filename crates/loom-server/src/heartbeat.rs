//! Liveness monitoring for one wire-relay connection.
//!
//! `run_heartbeat` counts missed ticks over `timeout / interval` and closes
//! the connection once the budget runs out. Interval/timeout come from
//! `TimeoutSettings::heartbeat_interval_ms` (spec §4.7's "30s heartbeat
//! timer" channel event and §5's connection idle-timeout are the same knob).

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::connection::ClientConnection;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The client stopped responding within the timeout window.
    TimedOut,
    /// The heartbeat was cancelled externally (connection closed).
    Cancelled,
}

/// Run heartbeat checks for a connection until it times out or `cancel`
/// fires. `max_missed` is `timeout / interval`, clamped to at least 1.
pub async fn run_heartbeat(
    connection: Arc<ClientConnection>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut ticker = time::interval(interval);
    let mut missed = 0u32;
    let interval_secs = interval.as_secs().max(1);
    #[allow(clippy::cast_possible_truncation)]
    let max_missed = (timeout.as_secs() / interval_secs).max(1) as u32;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if connection.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        return HeartbeatResult::TimedOut;
                    }
                }
                connection.is_alive.store(false, Ordering::Relaxed);
            }
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_core::ids::ConnectionId;
    use tokio::sync::mpsc;

    fn make_connection() -> Arc<ClientConnection> {
        let (tx, _rx) = mpsc::channel(32);
        Arc::new(ClientConnection::new(ConnectionId::new(), tx, loom_wire::SrpHandshake::new()))
    }

    #[tokio::test]
    async fn cancelled_returns_cancelled() {
        let conn = make_connection();
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(run_heartbeat(conn, Duration::from_secs(100), Duration::from_secs(300), cancel2));
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test]
    async fn silent_connection_times_out() {
        let conn = make_connection();
        conn.is_alive.store(false, Ordering::Relaxed);
        let result = run_heartbeat(conn, Duration::from_millis(10), Duration::from_millis(10), CancellationToken::new()).await;
        assert_eq!(result, HeartbeatResult::TimedOut);
    }

    #[tokio::test]
    async fn periodic_activity_prevents_timeout() {
        let conn = make_connection();
        let conn2 = conn.clone();
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(run_heartbeat(conn2, Duration::from_millis(20), Duration::from_millis(100), cancel2));
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(15)).await;
            conn.mark_alive();
        }
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }
}
