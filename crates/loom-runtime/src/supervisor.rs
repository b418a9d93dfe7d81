//! The Process registry: routes sessions to their owning Process, enforces
//! single ownership, and runs idle eviction (spec §4.4).
//!
//! A `DashMap<String, Arc<Process>>` active-session registry: one entry per
//! live subprocess, looked up by session id, mutated without a global lock.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use loom_core::ids::{ProcessId, SessionId};
use tracing::{info, warn};

use crate::capabilities::ProviderCapabilities;
use crate::child::SpawnSpec;
use crate::errors::SupervisorResult;
use crate::process::{PermissionMode, Process, ProcessState, UserMessageInput};
use loom_core::errors::{SupervisorError, SupervisorErrorKind};

/// Default grace period a process is kept alive after going idle before
/// eviction (spec §4.4).
pub const DEFAULT_IDLE_GRACE: Duration = Duration::from_secs(30);
/// Default quiet period before an externally-modified session is no
/// longer considered actively external (spec §4.4).
pub const DEFAULT_EXTERNAL_QUIET: Duration = Duration::from_secs(5);

/// Tunables for [`Supervisor`].
#[derive(Clone, Copy, Debug)]
pub struct SupervisorConfig {
    /// How long an idle process is kept warm before eviction.
    pub idle_grace: Duration,
    /// How long a session must go unmodified before it stops being
    /// reported as `external`.
    pub external_quiet: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self { idle_grace: DEFAULT_IDLE_GRACE, external_quiet: DEFAULT_EXTERNAL_QUIET }
    }
}

/// Inputs needed to spawn or resume a session's child.
pub struct SpawnContext<'a> {
    /// The session being started or resumed.
    pub session_id: &'a SessionId,
    /// The project's absolute working directory.
    pub project_path: &'a Path,
    /// Whether this spawn should pass the provider's resume flag.
    pub resume: bool,
}

/// Builds a [`SpawnSpec`] for a session. Factored out of `Supervisor` itself
/// since the concrete agent CLI (binary name, flag conventions) is a
/// deployment concern, not a registry concern.
pub type SpawnBuilder = Arc<dyn Fn(&SpawnContext<'_>) -> SpawnSpec + Send + Sync>;

/// Per-session options threaded through to a freshly spawned `Process`.
#[derive(Clone)]
pub struct SessionOptions {
    /// The provider name (`"claude"`, `"codex"`, ...) recorded on the Process.
    pub provider: String,
    /// Static capability flags for that provider.
    pub capabilities: ProviderCapabilities,
    /// Starting permission mode.
    pub permission_mode: PermissionMode,
}

/// Whether `resume_session` found an existing owner or had to spawn.
#[derive(Debug)]
pub enum ResumeOutcome {
    /// The session was already owned; the message was enqueued onto the
    /// existing Process.
    Enqueued(Arc<Process>),
    /// No owner existed; a fresh child was spawned with the resume flag.
    Spawned(Arc<Process>),
}

impl ResumeOutcome {
    /// The Process either case resolved to.
    #[must_use]
    pub fn process(&self) -> &Arc<Process> {
        match self {
            Self::Enqueued(p) | Self::Spawned(p) => p,
        }
    }
}

/// Registry of live Processes keyed by session and process id.
pub struct Supervisor {
    by_process_id: DashMap<ProcessId, Arc<Process>>,
    by_session_id: DashMap<SessionId, ProcessId>,
    ever_owned: DashSet<SessionId>,
    external_tracker: DashMap<SessionId, String>,
    config: SupervisorConfig,
    spawn_builder: SpawnBuilder,
}

impl Supervisor {
    /// Construct a registry with the given eviction tunables and a
    /// spawn-spec builder for the concrete agent CLI in use.
    #[must_use]
    pub fn new(config: SupervisorConfig, spawn_builder: SpawnBuilder) -> Self {
        Self {
            by_process_id: DashMap::new(),
            by_session_id: DashMap::new(),
            ever_owned: DashSet::new(),
            external_tracker: DashMap::new(),
            config,
            spawn_builder,
        }
    }

    /// `startSession`: mints a fresh session id, spawns a child, registers
    /// it, and enqueues the opening message. Two concurrent calls for the
    /// same project are allowed and produce distinct sessions.
    pub async fn start_session(
        &self,
        project_path: &Path,
        user_message: UserMessageInput,
        opts: SessionOptions,
    ) -> SupervisorResult<Arc<Process>> {
        let session_id = SessionId::new();
        let process_id = ProcessId::new();
        let ctx = SpawnContext { session_id: &session_id, project_path, resume: false };
        let spec = (self.spawn_builder)(&ctx);

        let process = Process::spawn(process_id.clone(), session_id.clone(), opts.provider, opts.capabilities, spec)
            .await
            .map_err(|e| { let msg = e.message.clone(); SupervisorError::new(SupervisorErrorKind::SpawnFailed, msg).with_source(e) })?;

        self.by_process_id.insert(process_id.clone(), process.clone());
        self.by_session_id.insert(session_id.clone(), process_id);
        let _ = self.ever_owned.insert(session_id.clone());
        let _ = self.external_tracker.remove(&session_id);

        if opts.permission_mode != PermissionMode::Default {
            let _ = process.set_permission_mode(opts.permission_mode).await;
        }
        process
            .queue_message(user_message)
            .await
            .map_err(|e| { let msg = e.message.clone(); SupervisorError::new(SupervisorErrorKind::SpawnFailed, msg).with_source(e) })?;

        info!(%session_id, "started session");
        Ok(process)
    }

    /// `resumeSession`: enqueues onto an existing owner, or atomically
    /// claims ownership and spawns with the resume flag so two concurrent
    /// resumes of the same session never both spawn.
    pub async fn resume_session(
        &self,
        session_id: SessionId,
        project_path: &Path,
        user_message: UserMessageInput,
        opts: SessionOptions,
    ) -> SupervisorResult<ResumeOutcome> {
        if let Some(process) = self.lookup_owner(&session_id) {
            if process.state() == ProcessState::Terminated {
                self.release(&process.id(), &session_id);
            } else {
                process
                    .queue_message(user_message)
                    .await
                    .map_err(|e| { let msg = e.message.clone(); SupervisorError::new(SupervisorErrorKind::SpawnFailed, msg).with_source(e) })?;
                return Ok(ResumeOutcome::Enqueued(process));
            }
        }

        let process_id = ProcessId::new();
        let claimed = match self.by_session_id.entry(session_id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(process_id.clone());
                true
            }
        };

        if !claimed {
            // Lost the race between our lookup and the entry attempt.
            let process = self
                .lookup_owner(&session_id)
                .ok_or_else(|| SupervisorError::new(SupervisorErrorKind::NotFound, "owner vanished mid-resume"))?;
            process
                .queue_message(user_message)
                .await
                .map_err(|e| { let msg = e.message.clone(); SupervisorError::new(SupervisorErrorKind::SpawnFailed, msg).with_source(e) })?;
            return Ok(ResumeOutcome::Enqueued(process));
        }

        let ctx = SpawnContext { session_id: &session_id, project_path, resume: true };
        let spec = (self.spawn_builder)(&ctx);
        let spawn_result =
            Process::spawn(process_id.clone(), session_id.clone(), opts.provider, opts.capabilities, spec).await;

        let process = match spawn_result {
            Ok(process) => process,
            Err(e) => {
                let _ = self.by_session_id.remove(&session_id);
                return Err({ let msg = e.message.clone(); SupervisorError::new(SupervisorErrorKind::SpawnFailed, msg).with_source(e) });
            }
        };

        self.by_process_id.insert(process_id, process.clone());
        let _ = self.ever_owned.insert(session_id.clone());
        let _ = self.external_tracker.remove(&session_id);

        if opts.permission_mode != PermissionMode::Default {
            let _ = process.set_permission_mode(opts.permission_mode).await;
        }
        process
            .queue_message(user_message)
            .await
            .map_err(|e| { let msg = e.message.clone(); SupervisorError::new(SupervisorErrorKind::SpawnFailed, msg).with_source(e) })?;

        info!(%session_id, "resumed session");
        Ok(ResumeOutcome::Spawned(process))
    }

    /// `getProcessForSession`.
    #[must_use]
    pub fn get_process_for_session(&self, session_id: &SessionId) -> Option<Arc<Process>> {
        self.lookup_owner(session_id)
    }

    fn lookup_owner(&self, session_id: &SessionId) -> Option<Arc<Process>> {
        let process_id = self.by_session_id.get(session_id)?.value().clone();
        self.by_process_id.get(&process_id).map(|entry| entry.value().clone())
    }

    /// `abort(processId)`.
    pub async fn abort(&self, process_id: &ProcessId) -> SupervisorResult<()> {
        let process = self
            .by_process_id
            .get(process_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| SupervisorError::new(SupervisorErrorKind::NotFound, "no such process"))?;
        process.abort().await;
        self.release(process_id, &process.session_id());
        Ok(())
    }

    /// `interrupt(processId)`.
    pub async fn interrupt(&self, process_id: &ProcessId) -> SupervisorResult<crate::process::InterruptResult> {
        let process = self
            .by_process_id
            .get(process_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| SupervisorError::new(SupervisorErrorKind::NotFound, "no such process"))?;
        Ok(process.interrupt().await)
    }

    fn release(&self, process_id: &ProcessId, session_id: &SessionId) {
        let _ = self.by_process_id.remove(process_id);
        let _ = self.by_session_id.remove(session_id);
    }

    /// A session's transcript file changed underneath us without us owning
    /// it — called from the Watcher's dispatch loop (spec §4.4 "external-
    /// session detection").
    pub fn note_external_modification(&self, session_id: SessionId, observed_at: impl Into<String>) {
        if self.by_session_id.contains_key(&session_id) {
            return;
        }
        self.external_tracker.insert(session_id, observed_at.into());
    }

    /// Whether a session is currently flagged `external` (modified by
    /// something other than this Supervisor and not yet quiet for
    /// `external_quiet`). Quiet-window expiry itself is the caller's
    /// concern (it compares the recorded timestamp against now); this just
    /// reports whether anything's tracked at all.
    #[must_use]
    pub fn is_tracked_external(&self, session_id: &SessionId) -> bool {
        self.external_tracker.contains_key(session_id)
    }

    /// Clear a session's external-tracking entry once its quiet window has
    /// elapsed.
    pub fn clear_external(&self, session_id: &SessionId) {
        let _ = self.external_tracker.remove(session_id);
    }

    /// Whether this Supervisor has ever owned this session (orphan
    /// detection per spec §4.5).
    #[must_use]
    pub fn has_ever_owned(&self, session_id: &SessionId) -> bool {
        self.ever_owned.contains(session_id)
    }

    /// One sweep of idle eviction: processes sitting `idle` move to
    /// `warm-pool`; processes already in `warm-pool` past `idle_grace`
    /// are evicted and dropped from the registry.
    pub async fn run_idle_eviction_tick(&self) {
        let snapshot: Vec<(ProcessId, Arc<Process>)> =
            self.by_process_id.iter().map(|e| (e.key().clone(), e.value().clone())).collect();

        for (process_id, process) in snapshot {
            match process.state() {
                ProcessState::Idle => process.enter_warm_pool(),
                ProcessState::WarmPool => {
                    let Some(since) = process.idle_since() else { continue };
                    if idle_duration_exceeds(&since, self.config.idle_grace) {
                        let session_id = process.session_id();
                        process.evict().await;
                        self.release(&process_id, &session_id);
                        warn!(%process_id, "evicted idle process from warm pool");
                    }
                }
                _ => {}
            }
        }
    }

    /// Spawn a background task that calls [`Self::run_idle_eviction_tick`]
    /// on a fixed interval until `shutdown` resolves.
    pub fn spawn_idle_eviction_loop(self: &Arc<Self>, interval: Duration, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => supervisor.run_idle_eviction_tick().await,
                    _ = &mut shutdown => break,
                }
            }
        });
    }
}

fn idle_duration_exceeds(since_rfc3339: &str, grace: Duration) -> bool {
    match chrono::DateTime::parse_from_rfc3339(since_rfc3339) {
        Ok(since) => {
            let elapsed = chrono::Utc::now().signed_duration_since(since.with_timezone(&chrono::Utc));
            elapsed.to_std().map(|d| d >= grace).unwrap_or(false)
        }
        Err(e) => {
            warn!(error = %e, "unparseable idleSince timestamp, treating as not yet due");
            false
        }
    }
}
