//! Per-provider capability flags (spec §9 "Open Question: interrupt
//! support").

use serde::{Deserialize, Serialize};

/// What a given agent CLI's stdio protocol supports. Populated once per
/// provider at startup; never inferred per-message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCapabilities {
    /// Whether transcript messages carry a `parentId` DAG worth sorting on.
    /// When false, [`loom_transcript::order_messages`] is a no-op.
    pub supports_dag: bool,
    /// Whether the provider's stdio protocol understands an interrupt
    /// signal distinct from a hard kill. `Process::interrupt` reports
    /// `supported: false` and falls back to nothing when this is false —
    /// it never silently escalates to `abort`.
    pub supports_interrupt: bool,
}
