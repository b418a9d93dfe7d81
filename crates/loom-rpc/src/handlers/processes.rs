//! Process-level control (spec §6): abort and interrupt by process id.

use async_trait::async_trait;
use serde_json::{json, Value};

use loom_core::errors::{RpcError, RpcErrorKind};
use loom_core::ids::ProcessId;

use crate::context::RpcContext;
use crate::registry::{PathHandler, PathRequest};

/// `POST /processes/:pid/abort`.
pub struct AbortProcess;

#[async_trait]
impl PathHandler for AbortProcess {
    async fn handle(&self, request: PathRequest, ctx: &RpcContext) -> Result<Value, RpcError> {
        let process_id: ProcessId = request.param("pid")?.into();
        ctx.supervisor
            .abort(&process_id)
            .await
            .map_err(|e| RpcError::new(RpcErrorKind::NotFound, e.message.clone()).with_source(e))?;
        Ok(json!({ "aborted": true }))
    }
}

/// `POST /processes/:pid/interrupt`.
pub struct InterruptProcess;

#[async_trait]
impl PathHandler for InterruptProcess {
    async fn handle(&self, request: PathRequest, ctx: &RpcContext) -> Result<Value, RpcError> {
        let process_id: ProcessId = request.param("pid")?.into();
        let result = ctx
            .supervisor
            .interrupt(&process_id)
            .await
            .map_err(|e| RpcError::new(RpcErrorKind::NotFound, e.message.clone()).with_source(e))?;
        Ok(json!({ "interrupted": result.interrupted, "supported": result.supported }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_helpers::make_test_context;
    use std::collections::HashMap;

    fn request_with(params: &[(&str, &str)]) -> PathRequest {
        PathRequest {
            params: params.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect(),
            query: HashMap::new(),
            body: None,
        }
    }

    #[tokio::test]
    async fn abort_unknown_process_is_not_found() {
        let ctx = make_test_context();
        let err = AbortProcess.handle(request_with(&[("pid", "nope")]), &ctx).await.unwrap_err();
        assert_eq!(err.code, "NOT_FOUND");
    }

    #[tokio::test]
    async fn interrupt_unknown_process_is_not_found() {
        let ctx = make_test_context();
        let err = InterruptProcess.handle(request_with(&[("pid", "nope")]), &ctx).await.unwrap_err();
        assert_eq!(err.code, "NOT_FOUND");
    }
}
