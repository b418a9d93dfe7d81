//! The Process state machine and single-writer operation contract (spec
//! §4.5).
//!
//! `ProcessShared` holds every mutable field and is the unit of locking;
//! each lock's critical section is short (a field update and a fan-out
//! publish), matching the "millisecond-scale" discipline spec §5 asks of
//! the Supervisor and extends here. Client-facing operations
//! (`queue_message`, `respond_to_input`, `set_permission_mode`, `set_hold`,
//! `abort`, `interrupt`) all acquire `Process`'s single `writer` mutex
//! before touching state or the child's stdin, which is what makes them
//! "funnelled through a single cooperative worker" (spec's single-writer
//! invariant) — concurrent callers queue on that one lock rather than
//! racing on state.
//!
//! Child-driven mutation (stdout lines arriving asynchronously) runs on its
//! own reader task and goes through the same `ProcessShared` methods, which
//! lock only the specific field being touched; it does not contend with
//! the writer mutex because the spec's invariant is about ordering explicit
//! operations relative to each other, not about excluding the child's own
//! stream.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use loom_core::errors::{ProcessError, ProcessErrorKind};
use loom_core::ids::{InputRequestId, ProcessId, SessionId, SubscriptionId};
use loom_core::message::{ContentBlock, Message, MessageContent, MessageSource, MessageType};
use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::warn;

use crate::capabilities::ProviderCapabilities;
use crate::child::{self, ChildHandle, SpawnSpec};
use crate::errors::ProcessResult;

/// Default cap on `message_history` before ring-rotation (spec §9 Open
/// Question decision: 10,000).
pub const DEFAULT_MAX_HISTORY: usize = 10_000;

/// A permission mode controlling how aggressively the agent may act.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionMode {
    /// Prompts for approval on side-effecting tool use.
    #[serde(rename = "default")]
    Default,
    /// Read-only planning; no side-effecting tools execute.
    #[serde(rename = "plan")]
    Plan,
    /// Side-effecting edits auto-approved, other tools still prompt.
    #[serde(rename = "accept-edits")]
    AcceptEdits,
    /// Nothing prompts.
    #[serde(rename = "bypass-permissions")]
    BypassPermissions,
}

/// The Process state machine (spec §4.5).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessState {
    /// Child spawned, no message observed yet.
    #[serde(rename = "starting")]
    Starting,
    /// Actively producing output.
    #[serde(rename = "running")]
    Running,
    /// Paused on a tool-approval or question, awaiting `respond_to_input`.
    #[serde(rename = "waiting-input")]
    WaitingInput,
    /// Soft-paused by `set_hold(true)`; queued input is not consumed.
    #[serde(rename = "hold")]
    Hold,
    /// Child reported `complete` with an empty queue.
    #[serde(rename = "idle")]
    Idle,
    /// Idle and additionally past the idle-eviction grace period, kept
    /// alive in a warm pool awaiting either new input or eviction.
    #[serde(rename = "warm-pool")]
    WarmPool,
    /// Terminal. No further transitions.
    #[serde(rename = "terminated")]
    Terminated,
}

/// What the Process is waiting on while in `waiting-input`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingInputKind {
    /// The child wants approval to invoke a tool.
    ToolApproval {
        /// The tool the child wants to run.
        tool_name: String,
        /// The tool's proposed input.
        tool_input: Value,
    },
    /// The child is asking the user a free-form question.
    Question {
        /// The question text.
        prompt: String,
    },
}

/// A pending input request the Process is blocked on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingInputRequest {
    /// Correlates with the `respond_to_input` call that resolves this.
    pub request_id: InputRequestId,
    /// What's being asked.
    pub kind: PendingInputKind,
}

/// How a client responded to a pending input request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputDecision {
    /// Approve as asked.
    Approve,
    /// Approve and additionally switch to `accept-edits` mode.
    ApproveAcceptEdits,
    /// Deny.
    Deny,
}

/// A user-authored message to enqueue (spec §4.5 `queueMessage`).
#[derive(Clone, Debug, Default)]
pub struct UserMessageInput {
    /// The message body.
    pub text: String,
    /// Upload references, if any were attached.
    pub attachments: Vec<String>,
    /// A permission-mode override for this message only.
    pub mode: Option<PermissionMode>,
    /// Client-assigned id for optimistic-UI reconciliation.
    pub temp_id: Option<String>,
}

/// Result of `queue_message`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueAck {
    /// Always true; kept for parity with the spec's `{queued, position}` shape.
    pub queued: bool,
    /// Position in the inbound queue at the moment of enqueue.
    pub position: usize,
}

/// Result of `interrupt`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct InterruptResult {
    /// Whether the child was actually signalled.
    pub interrupted: bool,
    /// Whether this provider's protocol supports interrupt at all.
    pub supported: bool,
}

/// One fan-out event a subscriber receives (spec §4.5 "Fan-out").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ProcessEvent {
    /// A new or updated transcript message.
    Message {
        /// The message.
        message: Message,
    },
    /// `state` changed.
    StateChange {
        /// The new state.
        state: ProcessState,
    },
    /// `permissionMode` changed.
    ModeChange {
        /// The new mode.
        mode: PermissionMode,
        /// The version stamped on this change.
        mode_version: u64,
    },
    /// A recoverable error (state unchanged).
    Error {
        /// Human-readable description.
        message: String,
    },
    /// The provider assigned or changed its own session id (e.g. on first
    /// `System` event with `--resume` support).
    SessionIdChanged {
        /// The provider's own session id.
        session_id: String,
    },
    /// The run completed and the queue was empty.
    Complete,
    /// The provider emitted an auth/login prompt.
    ClaudeLogin {
        /// Provider-specific payload.
        data: Value,
    },
}

/// A raw line from the child's stdout, tagged the way the documented stdio
/// protocol requires (spec §1 Glossary "Agent"; concretely grounded on the
/// `stream-json` shape other agent CLIs use: `system`/`assistant`/
/// `tool_use`/`tool_result`/`result`/`question`/`error`).
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ChildLine {
    System {
        session_id: Option<String>,
    },
    Assistant {
        message: AssistantPayload,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    Question {
        prompt: String,
    },
    Result {
        #[serde(default)]
        is_error: bool,
        result: Option<String>,
    },
    ClaudeLogin {
        #[serde(flatten)]
        data: Value,
    },
    Error {
        message: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Debug, Deserialize)]
struct AssistantPayload {
    #[serde(default)]
    id: Option<String>,
    content: Vec<ContentBlock>,
}

/// Shared, lock-protected state. See module docs for the locking
/// discipline.
pub(crate) struct ProcessShared {
    pub id: ProcessId,
    pub session_id: SessionId,
    pub provider: String,
    pub model: SyncMutex<Option<String>>,
    pub capabilities: ProviderCapabilities,
    state: SyncMutex<ProcessState>,
    permission_mode: SyncMutex<PermissionMode>,
    mode_version: AtomicU64,
    queue_depth: AtomicUsize,
    idle_since: SyncMutex<Option<String>>,
    hold_since: SyncMutex<Option<String>>,
    termination_reason: SyncMutex<Option<String>>,
    history: SyncMutex<VecDeque<Message>>,
    max_history: usize,
    streaming: SyncMutex<HashMap<(String, u32), String>>,
    current_streaming_message_id: SyncMutex<Option<String>>,
    pending_input: SyncMutex<Option<PendingInputRequest>>,
    subscribers: DashMap<SubscriptionId, mpsc::Sender<ProcessEvent>>,
}

impl ProcessShared {
    fn new(id: ProcessId, session_id: SessionId, provider: String, capabilities: ProviderCapabilities) -> Self {
        Self {
            id,
            session_id,
            provider,
            model: SyncMutex::new(None),
            capabilities,
            state: SyncMutex::new(ProcessState::Starting),
            permission_mode: SyncMutex::new(PermissionMode::Default),
            mode_version: AtomicU64::new(0),
            queue_depth: AtomicUsize::new(0),
            idle_since: SyncMutex::new(None),
            hold_since: SyncMutex::new(None),
            termination_reason: SyncMutex::new(None),
            history: SyncMutex::new(VecDeque::new()),
            max_history: DEFAULT_MAX_HISTORY,
            streaming: SyncMutex::new(HashMap::new()),
            current_streaming_message_id: SyncMutex::new(None),
            pending_input: SyncMutex::new(None),
            subscribers: DashMap::new(),
        }
    }

    fn state(&self) -> ProcessState {
        *self.state.lock()
    }

    fn set_state(&self, state: ProcessState) {
        *self.state.lock() = state;
        self.publish(ProcessEvent::StateChange { state });
    }

    /// Publish to every subscriber without blocking on any of them (spec:
    /// "subscribers MUST NOT block that section"). A full outbound buffer
    /// means a slow subscriber; drop and warn rather than stall the
    /// Process.
    fn publish(&self, event: ProcessEvent) {
        for entry in &self.subscribers {
            if let Err(mpsc::error::TrySendError::Full(_)) = entry.value().try_send(event.clone()) {
                warn!(process_id = %self.id, subscription_id = %entry.key(), "subscriber outbound buffer full, dropping event");
            }
        }
    }

    fn push_history(&self, message: Message) {
        let mut history = self.history.lock();
        if history.len() >= self.max_history {
            let _ = history.pop_front();
        }
        history.push_back(message.clone());
        drop(history);
        self.publish(ProcessEvent::Message { message });
    }

    fn apply_child_line(&self, line: &str) {
        let parsed: ChildLine = match serde_json::from_str(line) {
            Ok(l) => l,
            Err(e) => {
                warn!(process_id = %self.id, error = %e, "unparseable child stdout line");
                return;
            }
        };

        if self.state() == ProcessState::Starting {
            self.set_state(ProcessState::Running);
        }

        match parsed {
            ChildLine::System { session_id } => {
                if let Some(sid) = session_id {
                    self.publish(ProcessEvent::SessionIdChanged { session_id: sid });
                }
            }
            ChildLine::Assistant { message } => {
                let message_id = message.id.unwrap_or_else(|| self.id.to_string());
                for (index, block) in message.content.iter().enumerate() {
                    if block.r#type == "text" {
                        if let Some(text) = &block.text {
                            let key = (message_id.clone(), u32::try_from(index).unwrap_or(u32::MAX));
                            let _ = self.streaming.lock().insert(key, text.clone());
                        }
                    }
                }
                *self.current_streaming_message_id.lock() = Some(message_id.clone());
                self.push_history(Message {
                    id: message_id,
                    r#type: MessageType::Assistant,
                    parent_id: None,
                    role: Some("assistant".into()),
                    content: MessageContent::Blocks(message.content),
                    timestamp: now_rfc3339(),
                    is_subagent: None,
                    parent_tool_use_id: None,
                    source: MessageSource::Live,
                });
            }
            ChildLine::ToolUse { id, name, input } => {
                let request_id = InputRequestId::new();
                *self.pending_input.lock() = Some(PendingInputRequest {
                    request_id,
                    kind: PendingInputKind::ToolApproval { tool_name: name.clone(), tool_input: input.clone() },
                });
                self.push_history(Message {
                    id,
                    r#type: MessageType::ToolUse,
                    parent_id: None,
                    role: Some("assistant".into()),
                    content: MessageContent::Blocks(vec![ContentBlock {
                        r#type: "tool_use".into(),
                        tool_name: Some(name),
                        tool_input: Some(input),
                        ..ContentBlock::default()
                    }]),
                    timestamp: now_rfc3339(),
                    is_subagent: None,
                    parent_tool_use_id: None,
                    source: MessageSource::Live,
                });
                self.set_state(ProcessState::WaitingInput);
            }
            ChildLine::ToolResult { tool_use_id, content, is_error } => {
                self.push_history(Message {
                    id: format!("{tool_use_id}-result"),
                    r#type: MessageType::ToolResult,
                    parent_id: Some(tool_use_id.clone()),
                    role: None,
                    content: MessageContent::Blocks(vec![ContentBlock {
                        r#type: "tool_result".into(),
                        tool_use_id: Some(tool_use_id),
                        tool_result: Some(content),
                        is_error: Some(is_error),
                        ..ContentBlock::default()
                    }]),
                    timestamp: now_rfc3339(),
                    is_subagent: None,
                    parent_tool_use_id: None,
                    source: MessageSource::Live,
                });
            }
            ChildLine::Question { prompt } => {
                let request_id = InputRequestId::new();
                *self.pending_input.lock() = Some(PendingInputRequest {
                    request_id,
                    kind: PendingInputKind::Question { prompt },
                });
                self.set_state(ProcessState::WaitingInput);
            }
            ChildLine::Result { is_error, result } => {
                *self.current_streaming_message_id.lock() = None;
                self.streaming.lock().clear();
                if is_error {
                    self.publish(ProcessEvent::Error {
                        message: result.unwrap_or_else(|| "child reported an error result".into()),
                    });
                } else {
                    self.publish(ProcessEvent::Complete);
                    if self.queue_depth.load(Ordering::SeqCst) == 0 {
                        *self.idle_since.lock() = Some(now_rfc3339());
                        self.set_state(ProcessState::Idle);
                    }
                }
            }
            ChildLine::ClaudeLogin { data } => {
                self.publish(ProcessEvent::ClaudeLogin { data });
            }
            ChildLine::Error { message } => {
                self.publish(ProcessEvent::Error { message });
            }
            ChildLine::Unknown => {}
        }
    }

    /// Terminate with a reason, denying any pending input synthetically
    /// (spec: "unresolved pending input is denied synthetically").
    fn terminate(&self, reason: impl Into<String>) {
        *self.termination_reason.lock() = Some(reason.into());
        *self.pending_input.lock() = None;
        self.set_state(ProcessState::Terminated);
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// A handle to one running agent subprocess and its state machine.
pub struct Process {
    shared: Arc<ProcessShared>,
    writer: AsyncMutex<Option<ChildHandle>>,
}

impl Process {
    /// Spawn a fresh child and return the handle. `Supervisor::start_session`
    /// is the intended caller; tests may construct a `Process` without a
    /// live child via [`Process::new_detached`] to exercise the state
    /// machine directly.
    pub async fn spawn(
        id: ProcessId,
        session_id: SessionId,
        provider: String,
        capabilities: ProviderCapabilities,
        spec: SpawnSpec,
    ) -> ProcessResult<Arc<Self>> {
        let shared = Arc::new(ProcessShared::new(id, session_id, provider, capabilities));
        let mut child = child::spawn(spec).await?;
        let lines = child.take_lines().expect("freshly spawned child always has a line receiver");

        let process = Arc::new(Self {
            shared: shared.clone(),
            writer: AsyncMutex::new(Some(child)),
        });

        tokio::spawn(reader_loop(shared, lines));
        Ok(process)
    }

    /// Construct a `Process` with no live child, for driving the state
    /// machine and fan-out logic in isolation.
    #[must_use]
    pub fn new_detached(id: ProcessId, session_id: SessionId, provider: String, capabilities: ProviderCapabilities) -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(ProcessShared::new(id, session_id, provider, capabilities)),
            writer: AsyncMutex::new(None),
        })
    }

    /// Feed a raw child stdout line directly; used by tests standing in for
    /// `new_detached` processes, and by the real reader task.
    pub fn apply_child_line_for_test(&self, line: &str) {
        self.shared.apply_child_line(line);
    }

    /// Stable identity.
    #[must_use]
    pub fn id(&self) -> ProcessId {
        self.shared.id.clone()
    }

    /// The session this Process owns.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.shared.session_id.clone()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ProcessState {
        self.shared.state()
    }

    /// Current permission mode and its version.
    #[must_use]
    pub fn permission_mode(&self) -> (PermissionMode, u64) {
        (*self.shared.permission_mode.lock(), self.shared.mode_version.load(Ordering::SeqCst))
    }

    /// `getMessageHistory()`.
    #[must_use]
    pub fn message_history(&self) -> Vec<Message> {
        self.shared.history.lock().iter().cloned().collect()
    }

    /// `getStreamingContent()`.
    #[must_use]
    pub fn streaming_content(&self) -> Option<(String, String)> {
        let message_id = self.shared.current_streaming_message_id.lock().clone()?;
        let streaming = self.shared.streaming.lock();
        let mut blocks: Vec<(u32, &String)> = streaming
            .iter()
            .filter(|(key, _)| key.0 == message_id)
            .map(|(key, text)| (key.1, text))
            .collect();
        blocks.sort_by_key(|(index, _)| *index);
        let text: String = blocks.into_iter().map(|(_, text)| text.as_str()).collect();
        Some((message_id, text))
    }

    /// Pending input request, if the Process is in `waiting-input`.
    #[must_use]
    pub fn pending_input(&self) -> Option<PendingInputRequest> {
        self.shared.pending_input.lock().clone()
    }

    /// Subscribe to this Process's fan-out. Returns a receiver; drop it (or
    /// call [`Process::unsubscribe`]) to stop receiving.
    pub fn subscribe(&self, subscription_id: SubscriptionId, buffer: usize) -> mpsc::Receiver<ProcessEvent> {
        let (tx, rx) = mpsc::channel(buffer);
        let _ = self.shared.subscribers.insert(subscription_id, tx);
        rx
    }

    /// Detach a subscriber. Also clears any per-subscription streaming
    /// state held elsewhere — this Process holds none itself (the
    /// streaming accumulator is per-message, not per-subscription), so
    /// this is just the subscriber-map removal.
    pub fn unsubscribe(&self, subscription_id: SubscriptionId) {
        let _ = self.shared.subscribers.remove(&subscription_id);
    }

    /// `queueMessage`.
    pub async fn queue_message(&self, message: UserMessageInput) -> ProcessResult<QueueAck> {
        let mut guard = self.writer.lock().await;
        if self.state() == ProcessState::Terminated {
            return Err(ProcessError::new(ProcessErrorKind::Terminated, "process has terminated"));
        }

        let position = self.shared.queue_depth.fetch_add(1, Ordering::SeqCst) + 1;

        if let Some(mode) = message.mode {
            self.apply_permission_mode(mode);
        }

        self.shared.push_history(Message {
            id: message.temp_id.clone().unwrap_or_else(|| loom_core::ids::ProcessId::new().to_string()),
            r#type: MessageType::User,
            parent_id: None,
            role: Some("user".into()),
            content: MessageContent::Text(message.text.clone()),
            timestamp: now_rfc3339(),
            is_subagent: None,
            parent_tool_use_id: None,
            source: MessageSource::Live,
        });

        if self.state() == ProcessState::Idle || self.state() == ProcessState::WarmPool {
            self.shared.set_state(ProcessState::Running);
        }

        if let Some(child) = guard.as_mut() {
            let payload = serde_json::json!({ "type": "user", "text": message.text, "attachments": message.attachments });
            let line = serde_json::to_string(&payload).map_err(|e| ProcessError::new(ProcessErrorKind::StdioError, "serialize queued message").with_source(e))?;
            child.write_line(&line).await?;
        }

        let _ = self.shared.queue_depth.fetch_sub(1, Ordering::SeqCst);
        Ok(QueueAck { queued: true, position })
    }

    /// `respondToInput`.
    pub async fn respond_to_input(
        &self,
        request_id: InputRequestId,
        decision: InputDecision,
        answers: Option<Value>,
        feedback: Option<String>,
    ) -> ProcessResult<()> {
        let mut guard = self.writer.lock().await;

        let pending = self.shared.pending_input.lock().clone();
        let Some(pending) = pending else {
            return Err(ProcessError::new(ProcessErrorKind::NoPendingRequest, "no pending input request"));
        };
        if pending.request_id != request_id {
            return Err(ProcessError::new(ProcessErrorKind::RequestIdMismatch, "stale input request id"));
        }

        if matches!(decision, InputDecision::ApproveAcceptEdits) {
            self.apply_permission_mode(PermissionMode::AcceptEdits);
        }

        *self.shared.pending_input.lock() = None;
        self.shared.set_state(ProcessState::Running);

        if let Some(child) = guard.as_mut() {
            let payload = serde_json::json!({
                "type": "input_response",
                "requestId": request_id.to_string(),
                "decision": decision,
                "answers": answers,
                "feedback": feedback,
            });
            let line = serde_json::to_string(&payload).map_err(|e| ProcessError::new(ProcessErrorKind::StdioError, "serialize input response").with_source(e))?;
            child.write_line(&line).await?;
        }
        Ok(())
    }

    fn apply_permission_mode(&self, mode: PermissionMode) {
        *self.shared.permission_mode.lock() = mode;
        let version = self.shared.mode_version.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.publish(ProcessEvent::ModeChange { mode, mode_version: version });
    }

    /// `setPermissionMode`.
    pub async fn set_permission_mode(&self, mode: PermissionMode) -> (PermissionMode, u64) {
        let _guard = self.writer.lock().await;
        self.apply_permission_mode(mode);
        self.permission_mode()
    }

    /// `setHold`.
    pub async fn set_hold(&self, hold: bool) -> ProcessResult<(ProcessState, Option<String>)> {
        let mut guard = self.writer.lock().await;
        let current = self.state();
        if hold {
            if current != ProcessState::Running {
                return Err(ProcessError::new(ProcessErrorKind::NotActive, "process is not running"));
            }
            let since = now_rfc3339();
            *self.shared.hold_since.lock() = Some(since.clone());
            if let Some(child) = guard.as_mut() {
                child.suspend();
            }
            self.shared.set_state(ProcessState::Hold);
            Ok((ProcessState::Hold, Some(since)))
        } else {
            if current != ProcessState::Hold {
                return Err(ProcessError::new(ProcessErrorKind::NotActive, "process is not on hold"));
            }
            *self.shared.hold_since.lock() = None;
            if let Some(child) = guard.as_mut() {
                child.resume();
            }
            self.shared.set_state(ProcessState::Running);
            Ok((ProcessState::Running, None))
        }
    }

    /// `abort`.
    pub async fn abort(&self) -> bool {
        let mut guard = self.writer.lock().await;
        if let Some(child) = guard.take() {
            child.kill().await;
        }
        self.shared.terminate("aborted");
        true
    }

    /// `interrupt`.
    pub async fn interrupt(&self) -> InterruptResult {
        let guard = self.writer.lock().await;
        if !self.shared.capabilities.supports_interrupt {
            return InterruptResult { interrupted: false, supported: false };
        }
        if let Some(child) = guard.as_ref() {
            if let Some(pid) = child.pid() {
                #[cfg(unix)]
                {
                    #[allow(unsafe_code)]
                    unsafe {
                        libc::kill(i32::try_from(pid).unwrap_or(0), libc::SIGINT);
                    }
                }
                let _ = pid;
                return InterruptResult { interrupted: true, supported: true };
            }
        }
        InterruptResult { interrupted: false, supported: true }
    }

    /// `idleSince`, when the process has been sitting idle or in the warm
    /// pool.
    #[must_use]
    pub fn idle_since(&self) -> Option<String> {
        self.shared.idle_since.lock().clone()
    }

    /// Supervisor-only transition: `idle -> warm-pool`, entered once a
    /// process has sat idle long enough to start its eviction countdown.
    /// A no-op if the process isn't currently idle.
    pub fn enter_warm_pool(&self) {
        if self.shared.state() == ProcessState::Idle {
            self.shared.set_state(ProcessState::WarmPool);
        }
    }

    /// Evict this process from the warm pool: terminate the child and
    /// publish a final `complete` event so any still-attached subscribers
    /// know to release (spec §4.4: "evictions emit complete events").
    pub async fn evict(&self) {
        let mut guard = self.writer.lock().await;
        if let Some(child) = guard.take() {
            child.kill().await;
        }
        self.shared.publish(ProcessEvent::Complete);
        self.shared.terminate("idle-evicted");
    }
}

async fn reader_loop(shared: Arc<ProcessShared>, mut lines: mpsc::Receiver<String>) {
    while let Some(line) = lines.recv().await {
        shared.apply_child_line(&line);
    }
    // Stdout closed: the child exited. Crash vs. clean exit both land here
    // since the documented protocol always emits a terminal `result` line
    // first when the child is well-behaved; either way the Process cannot
    // keep running.
    if shared.state() != ProcessState::Terminated {
        shared.terminate("crash");
    }
}
