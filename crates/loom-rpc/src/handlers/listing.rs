//! Cross-session listing (spec §6): `GET /sessions` and `GET /inbox`.

use async_trait::async_trait;
use serde_json::{json, Value};

use loom_core::errors::RpcError;
use loom_runtime::ProcessState;

use crate::context::RpcContext;
use crate::registry::{PathHandler, PathRequest};
use crate::types::{InboxView, SessionListFilter, SessionSummary};

fn filter_from_query(request: &PathRequest) -> SessionListFilter {
    SessionListFilter {
        project: request.query.get("project").cloned().map(Into::into),
        q: request.query.get("q").cloned(),
        after: request.query.get("after").cloned(),
        limit: request.query.get("limit").and_then(|v| v.parse().ok()),
        include_archived: request.query.get("includeArchived").is_some_and(|v| v == "true"),
        starred: request.query.get("starred").is_some_and(|v| v == "true"),
    }
}

/// `GET /sessions?project&q&after&limit&includeArchived&starred`.
pub struct ListSessions;

#[async_trait]
impl PathHandler for ListSessions {
    async fn handle(&self, request: PathRequest, ctx: &RpcContext) -> Result<Value, RpcError> {
        let filter = filter_from_query(&request);
        let mut sessions = ctx.index.list(&filter);

        if let Some(q) = &filter.q {
            let q = q.to_lowercase();
            sessions.retain(|s| s.title.as_deref().is_some_and(|t| t.to_lowercase().contains(&q)));
        }
        if let Some(limit) = filter.limit {
            sessions.truncate(limit);
        }
        Ok(json!({ "sessions": sessions }))
    }
}

/// `GET /inbox` — sessions bucketed by how urgently they need the user's
/// attention (spec §6). A session owned by a live Process blocked on
/// `waiting-input` is `needsAttention`; any other live Process is
/// `active`; everything else falls into `recentActivity`/`unread8h`/
/// `unread24h` by `lastMessageAt` age, oldest bucket last (open question,
/// see `DESIGN.md`: the spec names the buckets but not their exact
/// thresholds).
pub struct GetInbox;

#[async_trait]
impl PathHandler for GetInbox {
    async fn handle(&self, _request: PathRequest, ctx: &RpcContext) -> Result<Value, RpcError> {
        let mut view = InboxView::default();
        let now = chrono::Utc::now();

        for mut session in ctx.index.all() {
            if session.archived {
                continue;
            }
            let process = ctx.supervisor.get_process_for_session(&session.session_id);
            session.active = process.is_some();

            match process.as_ref().map(|p| p.state()) {
                Some(ProcessState::WaitingInput) => view.needs_attention.push(session),
                Some(_) => view.active.push(session),
                None => bucket_by_age(&mut view, session, now),
            }
        }
        serde_json::to_value(view).map_err(|e| RpcError::new(loom_core::errors::RpcErrorKind::BadRequest, "serialize inbox").with_source(e))
    }
}

fn bucket_by_age(view: &mut InboxView, session: SessionSummary, now: chrono::DateTime<chrono::Utc>) {
    let age = session
        .last_message_at
        .as_deref()
        .and_then(|ts| chrono::DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| now.signed_duration_since(ts));

    match age {
        Some(age) if age < chrono::Duration::hours(8) => view.unread8h.push(session),
        Some(age) if age < chrono::Duration::hours(24) => view.unread24h.push(session),
        _ => view.recent_activity.push(session),
    }
}
