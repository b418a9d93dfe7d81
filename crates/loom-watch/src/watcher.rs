//! Notify-based watcher with a 50 ms coalescing window (spec §4.2).
//!
//! Grounded on the recommended-watcher-plus-mpsc-forwarder shape used for
//! agent log watching elsewhere in the corpus: `notify`'s callback runs on
//! its own thread and can only do a blocking send, so it forwards into an
//! mpsc channel that a tokio task drains.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use notify::{RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::bus::{ChangeKind, EventBus, WatchEvent};
use crate::classify::ClassifyRoots;

/// How long a path must go quiet before its coalesced event is published.
const COALESCE_WINDOW: Duration = Duration::from_millis(50);
/// How often the coalescing loop checks for paths ready to flush.
const TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Handles returned by [`crate::init`]. Keep alive for as long as watching
/// should continue; pass to [`crate::shutdown`] to stop.
pub struct WatchHandles {
    pub(crate) bus: EventBus,
    _watcher: Option<RecommendedWatcher>,
    shutdown_tx: oneshot::Sender<()>,
}

impl WatchHandles {
    /// The event bus subscribers should use to receive published events.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }
}

/// Start watching `root` recursively, classifying and coalescing events,
/// publishing to a freshly created [`EventBus`]. Explicit construction, no
/// ambient singleton (spec §9).
pub fn init(root: PathBuf, roots: ClassifyRoots) -> WatchHandles {
    let bus = EventBus::new();
    let (raw_tx, raw_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let watcher = match create_watcher(&root, raw_tx) {
        Ok(w) => Some(w),
        Err(e) => {
            warn!(error = %e, root = %root.display(), "failed to start filesystem watcher");
            None
        }
    };

    tokio::spawn(coalesce_loop(raw_rx, shutdown_rx, bus.clone(), roots));

    WatchHandles {
        bus,
        _watcher: watcher,
        shutdown_tx,
    }
}

/// Stop watching and release the underlying OS watch handle.
pub fn shutdown(handles: WatchHandles) {
    let _ = handles.shutdown_tx.send(());
}

fn create_watcher(
    root: &std::path::Path,
    raw_tx: mpsc::UnboundedSender<(PathBuf, ChangeKind)>,
) -> Result<RecommendedWatcher, notify::Error> {
    let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
        let Ok(event) = res else { return };
        let Some(change) = classify_event_kind(&event) else {
            return;
        };
        for path in event.paths {
            let _ = raw_tx.send((path, change));
        }
    })?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    Ok(watcher)
}

fn classify_event_kind(event: &notify::Event) -> Option<ChangeKind> {
    use notify::EventKind;
    match event.kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        EventKind::Remove(_) => Some(ChangeKind::Removed),
        _ => None,
    }
}

async fn coalesce_loop(
    mut raw_rx: mpsc::UnboundedReceiver<(PathBuf, ChangeKind)>,
    mut shutdown_rx: oneshot::Receiver<()>,
    bus: EventBus,
    roots: ClassifyRoots,
) {
    let mut pending: HashMap<PathBuf, (ChangeKind, Instant)> = HashMap::new();
    let mut ticker = tokio::time::interval(TICK_INTERVAL);

    loop {
        tokio::select! {
            Some((path, change)) = raw_rx.recv() => {
                // A later event for the same path within the window wins
                // (e.g. Created then Modified coalesces to Modified), and
                // resets the quiet timer.
                let _ = pending.insert(path, (change, Instant::now()));
            }
            _ = ticker.tick() => {
                flush_ready(&mut pending, &bus, &roots);
            }
            _ = &mut shutdown_rx => {
                flush_ready(&mut pending, &bus, &roots);
                break;
            }
            else => break,
        }
    }
}

fn flush_ready(pending: &mut HashMap<PathBuf, (ChangeKind, Instant)>, bus: &EventBus, roots: &ClassifyRoots) {
    let ready: Vec<PathBuf> = pending
        .iter()
        .filter(|(_, (_, seen))| seen.elapsed() >= COALESCE_WINDOW)
        .map(|(path, _)| path.clone())
        .collect();

    for path in ready {
        if let Some((change, _)) = pending.remove(&path) {
            let kind = roots.classify(&path);
            bus.publish(WatchEvent::FileChange { kind, path, change });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::WatchEvent;

    fn roots_for(dir: &std::path::Path) -> ClassifyRoots {
        ClassifyRoots {
            sessions_dir: dir.join("sessions"),
            agent_sessions_dir: dir.join("sessions/agents"),
            settings_path: dir.join("settings.json"),
            credentials_dir: dir.join("credentials"),
        }
    }

    #[tokio::test]
    async fn rapid_events_on_same_path_coalesce_to_one() {
        let dir = tempfile::tempdir().unwrap();
        let roots = roots_for(dir.path());
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(coalesce_loop(raw_rx, shutdown_rx, bus.clone(), roots));

        let path = dir.path().join("sessions/s1.jsonl");
        for _ in 0..5 {
            raw_tx.send((path.clone(), ChangeKind::Modified)).unwrap();
        }

        let event = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("event published within timeout")
            .unwrap();
        assert!(matches!(event, WatchEvent::FileChange { path: p, .. } if p == path));

        // No second event should follow from the burst.
        let second = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(second.is_err(), "burst should have coalesced to a single event");
    }

    #[tokio::test]
    async fn distinct_paths_each_get_their_own_event() {
        let dir = tempfile::tempdir().unwrap();
        let roots = roots_for(dir.path());
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(coalesce_loop(raw_rx, shutdown_rx, bus.clone(), roots));

        raw_tx.send((dir.path().join("sessions/s1.jsonl"), ChangeKind::Modified)).unwrap();
        raw_tx.send((dir.path().join("sessions/s2.jsonl"), ChangeKind::Modified)).unwrap();

        let mut seen = std::collections::HashSet::new();
        for _ in 0..2 {
            let event = tokio::time::timeout(Duration::from_millis(500), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if let WatchEvent::FileChange { path, .. } = event {
                let _ = seen.insert(path);
            }
        }
        assert_eq!(seen.len(), 2);
    }
}
