//! Per-client live views over a `Process` (spec §4.7).
//!
//! One addressable live view per `(connectionId, subscriptionId)`, each
//! owning its own monotonic `eventId` counter, [`Augmenter`], and bounded
//! outbound channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use loom_core::ids::SubscriptionId;
use loom_core::message::Message;
use loom_runtime::{AugmentedBlock, Augmenter, Process, ProcessEvent, ProcessState};
use loom_watch::{ChangeKind, PathKind, WatchEvent};
use loom_wire::RelayMessage;

use crate::metrics;

/// Default heartbeat period (spec.md §5: "30s; a subscriber that hasn't
/// received anything in 30s gets a synthetic `heartbeat`").
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// The two channels a client may subscribe to (spec §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscribeChannel {
    /// Events scoped to one session's `Process`.
    Session,
    /// Filesystem/status events not scoped to a session.
    Activity,
}

impl SubscribeChannel {
    /// Parse the wire channel name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "session" => Some(Self::Session),
            "activity" => Some(Self::Activity),
            _ => None,
        }
    }
}

/// Why a subscription ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionEnd {
    /// The client sent `unsubscribe`.
    ClientRequested,
    /// The connection closed.
    ConnectionClosed,
    /// The outbound buffer filled up (spec.md §5 backpressure).
    SlowConsumer,
}

/// One live view over a `Process`, forwarding its events as framed
/// `RelayMessage::Event` wire messages until unsubscribed.
pub struct Subscription {
    subscription_id: SubscriptionId,
    session_id: String,
    process: Arc<Process>,
    event_id: AtomicU64,
    outbound: mpsc::Sender<RelayMessage>,
}

impl Subscription {
    fn next_event_id(&self) -> u64 {
        self.event_id.fetch_add(1, Ordering::SeqCst)
    }

    fn emit(&self, event_type: &str, data: Value) -> bool {
        let message = RelayMessage::Event {
            subscription_id: self.subscription_id.to_string(),
            event_id: self.next_event_id(),
            event_type: event_type.to_owned(),
            data,
        };
        self.outbound.try_send(message).is_ok()
    }
}

/// Attach a new `session`-channel subscription and run it to completion.
///
/// Implements spec §4.7's subscribe protocol in order: send `connected`,
/// replay history, synthesize `pending` catch-up if a block is mid-stream,
/// attach to the Process's live fan-out, then forward events until the
/// subscription is dropped, the process completes and cleanup happens, or
/// the outbound buffer overflows.
pub async fn run_session_subscription(
    subscription_id: SubscriptionId,
    process: Arc<Process>,
    outbound: mpsc::Sender<RelayMessage>,
    buffer: usize,
    cancel: CancellationToken,
) -> SubscriptionEnd {
    let session_id = process.session_id().to_string();
    let sub = Subscription { subscription_id: subscription_id.clone(), session_id, process: Arc::clone(&process), event_id: AtomicU64::new(0), outbound };

    metrics::gauge_step(metrics::SUBSCRIPTIONS_ACTIVE, true);
    let _guard = scopeguard(|| metrics::gauge_step(metrics::SUBSCRIPTIONS_ACTIVE, false));

    let (mode, mode_version) = process.permission_mode();
    if !sub.emit(
        "connected",
        json!({
            "processId": process.id().to_string(),
            "sessionId": sub.session_id,
            "state": process.state(),
            "permissionMode": mode,
            "modeVersion": mode_version,
        }),
    ) {
        return SubscriptionEnd::SlowConsumer;
    }

    for message in process.message_history() {
        if !emit_message(&sub, &message) {
            return SubscriptionEnd::SlowConsumer;
        }
    }

    let mut augmenter = Augmenter::new();
    if let Some((message_id, accumulated)) = process.streaming_content() {
        let AugmentedBlock::Pending { html } = Augmenter::process_catch_up(&accumulated, &message_id) else { unreachable!() };
        if !sub.emit("pending", json!({ "html": html })) {
            return SubscriptionEnd::SlowConsumer;
        }
    }

    let mut events = process.subscribe(subscription_id.clone(), buffer);
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.reset();

    let end = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break SubscriptionEnd::ConnectionClosed,
            event = events.recv() => {
                let Some(event) = event else { break SubscriptionEnd::ConnectionClosed };
                heartbeat.reset();
                if !forward_process_event(&sub, &mut augmenter, event) {
                    break SubscriptionEnd::SlowConsumer;
                }
            }
            _ = heartbeat.tick() => {
                if !sub.emit("heartbeat", json!({})) {
                    break SubscriptionEnd::SlowConsumer;
                }
            }
        }
    };

    process.unsubscribe(subscription_id);
    if end == SubscriptionEnd::SlowConsumer {
        metrics::counter_inc(metrics::SUBSCRIPTION_SLOW_CONSUMER_TOTAL);
    }
    end
}

/// Attach a new `activity`-channel subscription and run it to completion
/// (spec §6: "`activity` emits filesystem and status events"). No
/// catch-up replay — the transcript on disk is always authoritative, so a
/// subscriber that needs history re-reads it rather than relying on the
/// bus (see `loom-watch::bus`'s own doc comment on this point).
pub async fn run_activity_subscription(
    subscription_id: SubscriptionId,
    mut events: tokio::sync::broadcast::Receiver<WatchEvent>,
    outbound: mpsc::Sender<RelayMessage>,
    cancel: CancellationToken,
) -> SubscriptionEnd {
    let event_id = AtomicU64::new(0);
    let emit = |event_type: &str, data: Value| -> bool {
        let id = event_id.fetch_add(1, Ordering::SeqCst);
        outbound
            .try_send(RelayMessage::Event { subscription_id: subscription_id.to_string(), event_id: id, event_type: event_type.to_owned(), data })
            .is_ok()
    };

    metrics::gauge_step(metrics::SUBSCRIPTIONS_ACTIVE, true);
    let _guard = scopeguard(|| metrics::gauge_step(metrics::SUBSCRIPTIONS_ACTIVE, false));

    if !emit("connected", json!({})) {
        return SubscriptionEnd::SlowConsumer;
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.reset();

    let end = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break SubscriptionEnd::ConnectionClosed,
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        heartbeat.reset();
                        if !emit_watch_event(&emit, event) {
                            break SubscriptionEnd::SlowConsumer;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break SubscriptionEnd::ConnectionClosed,
                }
            }
            _ = heartbeat.tick() => {
                if !emit("heartbeat", json!({})) {
                    break SubscriptionEnd::SlowConsumer;
                }
            }
        }
    };

    if end == SubscriptionEnd::SlowConsumer {
        metrics::counter_inc(metrics::SUBSCRIPTION_SLOW_CONSUMER_TOTAL);
    }
    end
}

fn emit_watch_event(emit: &impl Fn(&str, Value) -> bool, event: WatchEvent) -> bool {
    match event {
        WatchEvent::FileChange { kind, path, change } => emit(
            "file-change",
            json!({
                "pathKind": path_kind_name(kind),
                "path": path.to_string_lossy(),
                "change": change_kind_name(change),
            }),
        ),
        WatchEvent::SessionStatusChange { session_id, owned } => {
            emit("session-status-change", json!({ "sessionId": session_id, "owned": owned }))
        }
    }
}

fn path_kind_name(kind: PathKind) -> &'static str {
    match kind {
        PathKind::Session => "session",
        PathKind::AgentSession => "agent-session",
        PathKind::Settings => "settings",
        PathKind::Credentials => "credentials",
        PathKind::Other => "other",
    }
}

fn change_kind_name(change: ChangeKind) -> &'static str {
    match change {
        ChangeKind::Created => "created",
        ChangeKind::Modified => "modified",
        ChangeKind::Removed => "removed",
    }
}

fn emit_message(sub: &Subscription, message: &Message) -> bool {
    sub.emit("message", serde_json::to_value(message).unwrap_or(Value::Null))
}

fn forward_process_event(sub: &Subscription, augmenter: &mut Augmenter, event: ProcessEvent) -> bool {
    match event {
        ProcessEvent::Message { message } => {
            if let Some(block) = augment_if_text(augmenter, &message) {
                let (event_type, data) = block_to_wire(block);
                if !sub.emit(event_type, data) {
                    return false;
                }
            }
            emit_message(sub, &message)
        }
        ProcessEvent::StateChange { state } => sub.emit("status", json!({ "state": state_name(state) })),
        ProcessEvent::ModeChange { mode, mode_version } => {
            sub.emit("mode-change", json!({ "mode": mode, "modeVersion": mode_version }))
        }
        ProcessEvent::Error { message } => sub.emit("error", json!({ "message": message })),
        ProcessEvent::SessionIdChanged { session_id } => sub.emit("session-id-changed", json!({ "sessionId": session_id })),
        ProcessEvent::Complete => sub.emit("complete", json!({})),
        ProcessEvent::ClaudeLogin { data } => sub.emit("claude-login", data),
    }
}

fn state_name(state: ProcessState) -> &'static str {
    match state {
        ProcessState::Starting => "starting",
        ProcessState::Running => "running",
        ProcessState::WaitingInput => "waiting-input",
        ProcessState::Hold => "hold",
        ProcessState::Idle => "idle",
        ProcessState::Terminated => "terminated",
    }
}

fn augment_if_text(augmenter: &mut Augmenter, message: &Message) -> Option<AugmentedBlock> {
    use loom_core::message::{MessageContent, MessageType};

    let MessageContent::Blocks(blocks) = &message.content else { return None };
    match message.r#type {
        MessageType::StreamEvent => {
            let block = blocks.iter().find(|b| b.text.is_some())?;
            let text = block.text.as_deref()?;
            augmenter.process_partial(&message.id, 0, text)
        }
        MessageType::Assistant => {
            let (index, text) = blocks.iter().enumerate().find_map(|(i, b)| b.text.as_deref().map(|t| (i, t)))?;
            Some(augmenter.process_final(Some(message.id.clone()), Some(index as u32), text))
        }
        _ => None,
    }
}

fn block_to_wire(block: AugmentedBlock) -> (&'static str, Value) {
    match block {
        AugmentedBlock::Pending { html } => ("pending", json!({ "html": html })),
        AugmentedBlock::MarkdownAugment { message_id, block_index, html } => {
            ("markdown-augment", json!({ "messageId": message_id, "blockIndex": block_index, "html": html }))
        }
    }
}

/// RAII helper so a metric decrement runs on every exit path, including
/// early returns, without duplicating the call at each `return`.
fn scopeguard(f: impl FnOnce()) -> impl Drop {
    struct Guard<F: FnOnce()>(Option<F>);
    impl<F: FnOnce()> Drop for Guard<F> {
        fn drop(&mut self) {
            if let Some(f) = self.0.take() {
                f();
            }
        }
    }
    Guard(Some(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_core::ids::{ProcessId, SessionId};

    fn spawn_test_process() -> Arc<Process> {
        Process::new_detached(ProcessId::new(), SessionId::new(), "test-provider".into(), Default::default())
    }

    #[test]
    fn parses_known_channels() {
        assert_eq!(SubscribeChannel::parse("session"), Some(SubscribeChannel::Session));
        assert_eq!(SubscribeChannel::parse("activity"), Some(SubscribeChannel::Activity));
        assert_eq!(SubscribeChannel::parse("bogus"), None);
    }

    #[tokio::test]
    async fn sends_connected_then_completes_on_cancel() {
        let process = spawn_test_process();
        let (tx, mut rx) = mpsc::channel(32);
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(run_session_subscription(SubscriptionId::new(), process, tx, 32, cancel2));

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, RelayMessage::Event { event_type, .. } if event_type == "connected"));

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), SubscriptionEnd::ConnectionClosed);
    }

    #[tokio::test]
    async fn slow_consumer_is_dropped() {
        let process = spawn_test_process();
        let (tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        // Fill the channel so even the `connected` event can't be enqueued.
        drop(rx);
        let end = run_session_subscription(SubscriptionId::new(), process, tx, 32, cancel).await;
        assert_eq!(end, SubscriptionEnd::SlowConsumer);
    }

    #[tokio::test]
    async fn activity_subscription_forwards_watch_events() {
        let (bus_tx, bus_rx) = tokio::sync::broadcast::channel(32);
        let (tx, mut rx) = mpsc::channel(32);
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(run_activity_subscription(SubscriptionId::new(), bus_rx, tx, cancel2));

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, RelayMessage::Event { event_type, .. } if event_type == "connected"));

        bus_tx
            .send(WatchEvent::FileChange { kind: PathKind::Session, path: "/tmp/foo".into(), change: ChangeKind::Modified })
            .unwrap();
        let second = rx.recv().await.unwrap();
        let RelayMessage::Event { event_type, data, .. } = second else { panic!("expected Event") };
        assert_eq!(event_type, "file-change");
        assert_eq!(data["pathKind"], "session");
        assert_eq!(data["change"], "modified");

        bus_tx.send(WatchEvent::SessionStatusChange { session_id: "abc".into(), owned: true }).unwrap();
        let third = rx.recv().await.unwrap();
        let RelayMessage::Event { event_type, data, .. } = third else { panic!("expected Event") };
        assert_eq!(event_type, "session-status-change");
        assert_eq!(data["sessionId"], "abc");
        assert_eq!(data["owned"], true);

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), SubscriptionEnd::ConnectionClosed);
    }

    #[tokio::test]
    async fn activity_subscription_slow_consumer_is_dropped() {
        let (_bus_tx, bus_rx) = tokio::sync::broadcast::channel(32);
        let (tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        // Fill the channel so even the `connected` event can't be enqueued.
        drop(rx);
        let end = run_activity_subscription(SubscriptionId::new(), bus_rx, tx, cancel).await;
        assert_eq!(end, SubscriptionEnd::SlowConsumer);
    }

    fn text_message(r#type: loom_core::message::MessageType, text: &str) -> Message {
        Message {
            id: "m1".into(),
            r#type,
            parent_id: None,
            role: None,
            content: loom_core::message::MessageContent::Blocks(vec![loom_core::message::ContentBlock::text(text)]),
            timestamp: "2026-01-01T00:00:00Z".into(),
            is_subagent: None,
            parent_tool_use_id: None,
            source: loom_core::message::MessageSource::Live,
        }
    }

    #[test]
    fn augment_if_text_throttles_stream_events_but_always_finalizes_assistant() {
        use loom_core::message::MessageType;
        let mut augmenter = Augmenter::new();

        let partial = augment_if_text(&mut augmenter, &text_message(MessageType::StreamEvent, "a"));
        assert!(matches!(partial, Some(AugmentedBlock::Pending { .. })));

        let final_block = augment_if_text(&mut augmenter, &text_message(MessageType::Assistant, "ab"));
        match final_block {
            Some(AugmentedBlock::MarkdownAugment { message_id, block_index, html }) => {
                assert_eq!(message_id.as_deref(), Some("m1"));
                assert_eq!(block_index, Some(0));
                assert!(html.contains("ab"));
            }
            other => panic!("expected MarkdownAugment, got {other:?}"),
        }
    }

    #[test]
    fn augment_if_text_ignores_non_text_message_types() {
        use loom_core::message::MessageType;
        let mut augmenter = Augmenter::new();
        assert!(augment_if_text(&mut augmenter, &text_message(MessageType::ToolUse, "x")).is_none());
    }

    #[tokio::test]
    async fn forward_process_event_emits_markdown_augment_for_finalized_assistant_message() {
        let process = spawn_test_process();
        let (tx, mut rx) = mpsc::channel(32);
        let sub = Subscription { subscription_id: SubscriptionId::new(), session_id: "s1".into(), process, event_id: AtomicU64::new(0), outbound: tx };
        let mut augmenter = Augmenter::new();

        use loom_core::message::MessageType;
        let message = text_message(MessageType::Assistant, "final text");
        assert!(forward_process_event(&sub, &mut augmenter, ProcessEvent::Message { message }));

        let first = rx.recv().await.unwrap();
        let RelayMessage::Event { event_type, data, .. } = first else { panic!("expected Event") };
        assert_eq!(event_type, "markdown-augment");
        assert!(data["html"].as_str().unwrap().contains("final text"));

        let second = rx.recv().await.unwrap();
        assert!(matches!(second, RelayMessage::Event { event_type, .. } if event_type == "message"));
    }

    #[tokio::test]
    async fn activity_subscription_ends_when_bus_closed() {
        let (bus_tx, bus_rx) = tokio::sync::broadcast::channel(32);
        let (tx, mut rx) = mpsc::channel(32);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_activity_subscription(SubscriptionId::new(), bus_rx, tx, cancel));

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, RelayMessage::Event { event_type, .. } if event_type == "connected"));

        drop(bus_tx);
        assert_eq!(handle.await.unwrap(), SubscriptionEnd::ConnectionClosed);
    }
}
