//! Session lifecycle and per-session operations (spec §6): loading a
//! transcript, metadata, starting/resuming, queueing messages, responding
//! to pending input, and changing mode/hold.

use async_trait::async_trait;
use serde_json::{json, Value};

use loom_core::errors::{RpcError, RpcErrorKind};
use loom_core::ids::{InputRequestId, SessionId};
use loom_runtime::{InputDecision, PermissionMode, ProviderCapabilities, SessionOptions, UserMessageInput};

use crate::context::RpcContext;
use crate::registry::{PathHandler, PathRequest};

fn default_opts(request: &PathRequest) -> Result<SessionOptions, RpcError> {
    let permission_mode = match request.body_str("mode") {
        Some(mode) => parse_mode(mode)?,
        None => PermissionMode::Default,
    };
    Ok(SessionOptions { provider: "agent".into(), capabilities: ProviderCapabilities::default(), permission_mode })
}

fn parse_mode(mode: &str) -> Result<PermissionMode, RpcError> {
    serde_json::from_value(Value::String(mode.to_owned()))
        .map_err(|_| RpcError::new(RpcErrorKind::BadRequest, format!("unrecognized permission mode `{mode}`")))
}

fn parse_decision(decision: &str) -> Result<InputDecision, RpcError> {
    serde_json::from_value(Value::String(decision.to_owned()))
        .map_err(|_| RpcError::new(RpcErrorKind::BadRequest, format!("unrecognized input decision `{decision}`")))
}

fn user_message(request: &PathRequest) -> Result<UserMessageInput, RpcError> {
    let text = request.require_body_str("text")?.to_owned();
    let temp_id = request.body_str("tempId").map(str::to_owned);
    let attachments = request
        .body
        .as_ref()
        .and_then(|b| b.get("attachments"))
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_owned).collect())
        .unwrap_or_default();
    Ok(UserMessageInput { text, attachments, mode: None, temp_id })
}

/// `GET /projects/:id/sessions/:sid` — the transcript plus its metadata.
pub struct GetSession;

#[async_trait]
impl PathHandler for GetSession {
    async fn handle(&self, request: PathRequest, ctx: &RpcContext) -> Result<Value, RpcError> {
        let project_id = request.param("id")?.into();
        let session_id: SessionId = request.param("sid")?.into();
        let project = ctx
            .projects
            .get(&project_id)
            .ok_or_else(|| RpcError::new(RpcErrorKind::NotFound, "no such project"))?;

        let after = request.query.get("afterMessageId").map(String::as_str);
        let (handle, messages) = ctx
            .reader
            .load_session(&project.session_dir_path, session_id.as_str(), after, false)
            .await
            .map_err(|e| RpcError::new(RpcErrorKind::BadRequest, "read transcript").with_source(e))?;

        let metadata = ctx.metadata.get(&session_id);
        let active = ctx.supervisor.get_process_for_session(&session_id).is_some();
        Ok(json!({
            "sessionId": handle.session_id,
            "messages": messages,
            "metadata": metadata,
            "active": active,
        }))
    }
}

/// `GET /projects/:id/sessions/:sid/metadata`.
pub struct GetSessionMetadata;

#[async_trait]
impl PathHandler for GetSessionMetadata {
    async fn handle(&self, request: PathRequest, ctx: &RpcContext) -> Result<Value, RpcError> {
        let session_id: SessionId = request.param("sid")?.into();
        serde_json::to_value(ctx.metadata.get(&session_id)).map_err(|e| RpcError::new(RpcErrorKind::BadRequest, "serialize metadata").with_source(e))
    }
}

/// `PUT /projects/:id/sessions/:sid/metadata`.
pub struct PutSessionMetadata;

#[async_trait]
impl PathHandler for PutSessionMetadata {
    async fn handle(&self, request: PathRequest, ctx: &RpcContext) -> Result<Value, RpcError> {
        let session_id: SessionId = request.param("sid")?.into();
        let body = request.body.clone().unwrap_or(Value::Null);
        let metadata = serde_json::from_value(body).map_err(|e| RpcError::new(RpcErrorKind::BadRequest, "malformed metadata body").with_source(e))?;
        ctx.metadata.put(&session_id, metadata);
        Ok(json!(ctx.metadata.get(&session_id)))
    }
}

/// `POST /projects/:id/sessions` — start with an initial message, or mint
/// a reserved session id for the two-phase create path when no message is
/// supplied (the spawn then happens on the first `resume`, per the open
/// question in spec §9 — see `DESIGN.md`).
pub struct StartOrCreateSession;

#[async_trait]
impl PathHandler for StartOrCreateSession {
    async fn handle(&self, request: PathRequest, ctx: &RpcContext) -> Result<Value, RpcError> {
        let project_id = request.param("id")?.into();
        let project = ctx
            .projects
            .get(&project_id)
            .ok_or_else(|| RpcError::new(RpcErrorKind::NotFound, "no such project"))?;

        if request.body_str("text").is_none() {
            let session_id = SessionId::new();
            ctx.metadata.put(&session_id, crate::types::SessionMetadata::default());
            return Ok(json!({ "sessionId": session_id, "started": false }));
        }

        let opts = default_opts(&request)?;
        let message = user_message(&request)?;
        let process = ctx
            .supervisor
            .start_session(std::path::Path::new(&project.absolute_path), message, opts)
            .await
            .map_err(|e| RpcError::new(RpcErrorKind::BadRequest, e.message.clone()).with_source(e))?;

        Ok(json!({ "sessionId": process.session_id(), "processId": process.id(), "started": true }))
    }
}

/// `POST /projects/:id/sessions/:sid/resume`.
pub struct ResumeSession;

#[async_trait]
impl PathHandler for ResumeSession {
    async fn handle(&self, request: PathRequest, ctx: &RpcContext) -> Result<Value, RpcError> {
        let project_id = request.param("id")?.into();
        let session_id: SessionId = request.param("sid")?.into();
        let project = ctx
            .projects
            .get(&project_id)
            .ok_or_else(|| RpcError::new(RpcErrorKind::NotFound, "no such project"))?;

        let opts = default_opts(&request)?;
        let message = user_message(&request)?;
        let outcome = ctx
            .supervisor
            .resume_session(session_id, std::path::Path::new(&project.absolute_path), message, opts)
            .await
            .map_err(|e| RpcError::new(RpcErrorKind::BadRequest, e.message.clone()).with_source(e))?;

        let process = outcome.process();
        Ok(json!({ "sessionId": process.session_id(), "processId": process.id() }))
    }
}

/// `POST /sessions/:sid/messages`.
pub struct QueueMessage;

#[async_trait]
impl PathHandler for QueueMessage {
    async fn handle(&self, request: PathRequest, ctx: &RpcContext) -> Result<Value, RpcError> {
        let session_id: SessionId = request.param("sid")?.into();
        let process = ctx
            .supervisor
            .get_process_for_session(&session_id)
            .ok_or_else(|| RpcError::new(RpcErrorKind::NotFound, "session is not active"))?;

        let message = user_message(&request)?;
        let ack = process
            .queue_message(message)
            .await
            .map_err(|e| RpcError::new(RpcErrorKind::BadRequest, e.message.clone()).with_source(e))?;
        Ok(json!({ "queued": ack.queued, "position": ack.position }))
    }
}

/// `POST /sessions/:sid/input`.
pub struct RespondToInput;

#[async_trait]
impl PathHandler for RespondToInput {
    async fn handle(&self, request: PathRequest, ctx: &RpcContext) -> Result<Value, RpcError> {
        let session_id: SessionId = request.param("sid")?.into();
        let process = ctx
            .supervisor
            .get_process_for_session(&session_id)
            .ok_or_else(|| RpcError::new(RpcErrorKind::NotFound, "session is not active"))?;

        let request_id: InputRequestId = request.require_body_str("requestId")?.into();
        let decision = parse_decision(request.require_body_str("decision")?)?;
        let answers = request.body.as_ref().and_then(|b| b.get("answers")).cloned();
        let feedback = request.body_str("feedback").map(str::to_owned);

        process
            .respond_to_input(request_id, decision, answers, feedback)
            .await
            .map_err(|e| RpcError::new(RpcErrorKind::BadRequest, e.message.clone()).with_source(e))?;
        Ok(json!({ "ok": true }))
    }
}

/// `PUT /sessions/:sid/mode`.
pub struct SetMode;

#[async_trait]
impl PathHandler for SetMode {
    async fn handle(&self, request: PathRequest, ctx: &RpcContext) -> Result<Value, RpcError> {
        let session_id: SessionId = request.param("sid")?.into();
        let process = ctx
            .supervisor
            .get_process_for_session(&session_id)
            .ok_or_else(|| RpcError::new(RpcErrorKind::NotFound, "session is not active"))?;

        let mode = parse_mode(request.require_body_str("mode")?)?;
        let (mode, mode_version) = process.set_permission_mode(mode).await;
        Ok(json!({ "mode": mode, "modeVersion": mode_version }))
    }
}

/// `PUT /sessions/:sid/hold`.
pub struct SetHold;

#[async_trait]
impl PathHandler for SetHold {
    async fn handle(&self, request: PathRequest, ctx: &RpcContext) -> Result<Value, RpcError> {
        let session_id: SessionId = request.param("sid")?.into();
        let process = ctx
            .supervisor
            .get_process_for_session(&session_id)
            .ok_or_else(|| RpcError::new(RpcErrorKind::NotFound, "session is not active"))?;

        let hold = request.body.as_ref().and_then(|b| b.get("hold")).and_then(Value::as_bool).unwrap_or(true);
        let (state, since) = process
            .set_hold(hold)
            .await
            .map_err(|e| RpcError::new(RpcErrorKind::BadRequest, e.message.clone()).with_source(e))?;
        Ok(json!({ "state": state, "holdSince": since }))
    }
}
