//! `GET/POST /projects` (spec §6).

use async_trait::async_trait;
use serde_json::{json, Value};

use loom_core::errors::{RpcError, RpcErrorKind};

use crate::context::RpcContext;
use crate::registry::{PathHandler, PathRequest};

/// `GET /projects` — list every known project.
pub struct ListProjects;

#[async_trait]
impl PathHandler for ListProjects {
    async fn handle(&self, _request: PathRequest, ctx: &RpcContext) -> Result<Value, RpcError> {
        Ok(json!({ "projects": ctx.projects.list() }))
    }
}

/// `POST /projects` — register a new project directory.
pub struct AddProject;

#[async_trait]
impl PathHandler for AddProject {
    async fn handle(&self, request: PathRequest, ctx: &RpcContext) -> Result<Value, RpcError> {
        let absolute_path = request.require_body_str("absolutePath")?;
        if !absolute_path.starts_with('/') {
            return Err(RpcError::new(RpcErrorKind::InvalidPath, "absolutePath must be absolute"));
        }
        let project = ctx.projects.add(absolute_path);
        serde_json::to_value(project).map_err(|e| RpcError::new(RpcErrorKind::BadRequest, "serialize project").with_source(e))
    }
}
