//! Domain types returned by path handlers that don't already live in
//! `loom-core` or `loom-runtime` — per-session metadata and the summarized
//! views `GET /sessions` and `GET /inbox` return (spec §6).

use serde::{Deserialize, Serialize};

use loom_core::ids::{ProjectId, SessionId};

/// The title/starred/archived KV a session carries independently of its
/// transcript (spec §6 `/projects/:id/sessions/:sid/metadata`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    /// User- or agent-assigned display title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Pinned to the top of listings.
    #[serde(default)]
    pub starred: bool,
    /// Hidden from the default `/sessions` listing.
    #[serde(default)]
    pub archived: bool,
}

/// One row of the global session index (spec §6 `GET /sessions`,
/// `GET /inbox`) — enough to render a list without loading a transcript.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// The session this row describes.
    pub session_id: SessionId,
    /// The project it belongs to.
    pub project_id: ProjectId,
    /// Display title, if set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Pinned flag, mirrored from [`SessionMetadata`].
    #[serde(default)]
    pub starred: bool,
    /// Archived flag, mirrored from [`SessionMetadata`].
    #[serde(default)]
    pub archived: bool,
    /// Whether a live `Process` currently owns this session.
    #[serde(default)]
    pub active: bool,
    /// Timestamp of the most recent transcript message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<String>,
}

/// Filters accepted by `GET /sessions` (spec §6).
#[derive(Clone, Debug, Default)]
pub struct SessionListFilter {
    /// Restrict to one project.
    pub project: Option<ProjectId>,
    /// Free-text search over title/content.
    pub q: Option<String>,
    /// Only sessions touched after this RFC 3339 timestamp.
    pub after: Option<String>,
    /// Max rows to return.
    pub limit: Option<usize>,
    /// Include archived sessions (excluded by default).
    pub include_archived: bool,
    /// Only starred sessions.
    pub starred: bool,
}

/// The categorized view `GET /inbox` returns (spec §6): sessions waiting on
/// the user, currently active, recently touched, and two unread-age
/// buckets.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxView {
    /// Sessions with a pending input request.
    pub needs_attention: Vec<SessionSummary>,
    /// Sessions with a live, running `Process`.
    pub active: Vec<SessionSummary>,
    /// Sessions touched recently but not currently active.
    pub recent_activity: Vec<SessionSummary>,
    /// Sessions unread for 8+ hours.
    pub unread8h: Vec<SessionSummary>,
    /// Sessions unread for 24+ hours.
    pub unread24h: Vec<SessionSummary>,
}
