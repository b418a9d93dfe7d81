//! Path registry and dispatch: path-pattern lookup over spec §6's
//! HTTP-style table, with `counter!`/`histogram!` instrumentation per route.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde_json::Value;
use tracing::warn;

use loom_core::errors::{RpcError, RpcErrorKind};

use crate::context::RpcContext;
use crate::path::PathPattern;

/// One incoming HTTP-style call carried over the relay (spec §6).
pub struct PathRequest {
    /// Parameters bound by the matched [`PathPattern`] (`:id`, `:sid`, ...).
    pub params: HashMap<String, String>,
    /// Parsed query-string parameters.
    pub query: HashMap<String, String>,
    /// The request body, if any.
    pub body: Option<Value>,
}

impl PathRequest {
    /// A required string field from the JSON body.
    pub fn require_body_str(&self, field: &str) -> Result<&str, RpcError> {
        self.body
            .as_ref()
            .and_then(|b| b.get(field))
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::new(RpcErrorKind::BadRequest, format!("missing required field `{field}`")))
    }

    /// An optional string field from the JSON body.
    #[must_use]
    pub fn body_str(&self, field: &str) -> Option<&str> {
        self.body.as_ref().and_then(|b| b.get(field)).and_then(Value::as_str)
    }

    /// A bound path parameter, failing with `INVALID_PATH` if absent (should
    /// only happen if a handler is registered under the wrong pattern).
    pub fn param(&self, name: &str) -> Result<&str, RpcError> {
        self.params
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| RpcError::new(RpcErrorKind::InvalidPath, format!("path parameter `{name}` not bound")))
    }
}

/// Implemented by every path handler.
#[async_trait]
pub trait PathHandler: Send + Sync {
    /// Execute the handler against the bound request and shared context.
    async fn handle(&self, request: PathRequest, ctx: &RpcContext) -> Result<Value, RpcError>;
}

struct Route {
    method: &'static str,
    pattern: PathPattern,
    handler: Arc<dyn PathHandler>,
}

/// Registry mapping `(method, path pattern)` to handlers.
pub struct PathRegistry {
    routes: Vec<Route>,
}

impl PathRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Register a handler for `method` against `pattern`
    /// (e.g. `"GET"`, `"/projects/:id/sessions/:sid"`).
    pub fn register(&mut self, method: &'static str, pattern: &str, handler: impl PathHandler + 'static) {
        self.routes.push(Route { method, pattern: PathPattern::new(pattern), handler: Arc::new(handler) });
    }

    /// Dispatch one `request.method`/`request.path` call (spec §6).
    /// Returns the JSON body and the HTTP-ish status code to report.
    pub async fn dispatch(&self, method: &str, path: &str, query: &str, body: Option<Value>, ctx: &RpcContext) -> (u16, Value) {
        let route = self.routes.iter().find_map(|route| {
            if route.method != method {
                return None;
            }
            route.pattern.matches(path).map(|params| (route, params))
        });

        let Some((route, params)) = route else {
            counter!("rpc_path_errors_total", "path" => path.to_owned(), "error_type" => "not_found").increment(1);
            let err = RpcError::new(RpcErrorKind::NotFound, format!("no handler for {method} {path}"));
            return (404, serde_json::json!({ "code": err.code, "message": err.message }));
        };

        let request = PathRequest { params, query: parse_query(query), body };
        let start = Instant::now();
        let result = route.handler.handle(request, ctx).await;
        let duration = start.elapsed();
        histogram!("rpc_path_duration_seconds", "path" => path.to_owned()).record(duration.as_secs_f64());
        if duration.as_secs() >= 5 {
            warn!(method, path, duration_secs = duration.as_secs_f64(), "slow path request");
        }

        match result {
            Ok(value) => {
                counter!("rpc_path_requests_total", "path" => path.to_owned()).increment(1);
                (200, value)
            }
            Err(err) => {
                counter!("rpc_path_errors_total", "path" => path.to_owned(), "error_type" => err.code.to_owned()).increment(1);
                let status = status_for(err.kind);
                (status, serde_json::json!({ "code": err.code, "message": err.message }))
            }
        }
    }

    /// Number of registered routes, for tests asserting full coverage.
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }
}

impl Default for PathRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn status_for(kind: RpcErrorKind) -> u16 {
    match kind {
        RpcErrorKind::NotFound => 404,
        RpcErrorKind::BadRequest | RpcErrorKind::InvalidPath => 400,
        RpcErrorKind::AlreadyArchived => 409,
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .trim_start_matches('?')
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let value = parts.next().unwrap_or("");
            Some((key.to_owned(), value.to_owned()))
        })
        .collect()
}
