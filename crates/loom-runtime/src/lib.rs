//! Process lifecycle, the Supervisor registry, and the markdown augmenter.
//!
//! An agent CLI is spawned and driven as an opaque subprocess ([`child`]);
//! [`process`] turns its stdout protocol into the typed state machine and
//! event fan-out clients subscribe to; [`supervisor`] owns the registry of
//! live processes and enforces single ownership per session; [`augmenter`]
//! renders accumulated markdown to HTML for display.

#![warn(missing_docs)]

mod augmenter;
mod capabilities;
mod child;
pub mod errors;
mod process;
mod supervisor;

pub use augmenter::{render_markdown, AugmentedBlock, Augmenter};
pub use capabilities::ProviderCapabilities;
pub use child::{spawn as spawn_child, ChildHandle, SpawnSpec};
pub use process::{
    InputDecision, InterruptResult, PendingInputKind, PendingInputRequest, PermissionMode, Process, ProcessEvent, ProcessState,
    QueueAck, UserMessageInput, DEFAULT_MAX_HISTORY,
};
pub use supervisor::{
    ResumeOutcome, SessionOptions, SpawnBuilder, SpawnContext, Supervisor, SupervisorConfig, DEFAULT_EXTERNAL_QUIET,
    DEFAULT_IDLE_GRACE,
};
