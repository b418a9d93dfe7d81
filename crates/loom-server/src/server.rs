//! `LoomServer` — Axum HTTP + binary wire-relay server (spec §4.9, §6).
//!
//! Same config/registry/rpc_context/metrics_handle constructor shape and
//! catch-panic/compression/timeout/request-id middleware stack as the
//! `/healthz` liveness and `/metrics` Prometheus endpoints, with the `/ws`
//! handler routing into [`crate::session::run_connection`]'s authenticated,
//! optionally encrypted, format-negotiated relay loop. The Origin check
//! (spec §4.9, §8 S6) rejects disallowed callers with close code 4003
//! before any application message is processed.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tracing::{info, instrument, warn};

use loom_rpc::context::RpcContext;
use loom_rpc::registry::PathRegistry;
use loom_settings::{AuthSettings, Settings};
use loom_wire::{CredentialStore, SessionKey};

use crate::credentials::InMemoryResumableSessions;
use crate::health::{self, HealthResponse};
use crate::project_directory::expand_home;
use crate::session::{reject_origin, run_connection, SessionDeps};
use crate::shutdown::ShutdownCoordinator;
use crate::upload::UploadManager;

/// Generates UUIDv7 request IDs for `x-request-id` propagation.
#[derive(Clone)]
struct UuidV7RequestId;

impl MakeRequestId for UuidV7RequestId {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = uuid::Uuid::now_v7().to_string();
        axum::http::HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// Shared state reachable from every Axum handler.
#[derive(Clone)]
pub struct AppState {
    session_deps: Arc<SessionDeps>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics_handle: Arc<PrometheusHandle>,
    auth: Arc<AuthSettings>,
    connections: Arc<AtomicUsize>,
    max_connections: usize,
    max_message_size: usize,
}

/// The wire-relay server: Axum HTTP endpoints plus the `/ws` binary relay.
pub struct LoomServer {
    settings: Settings,
    session_deps: Arc<SessionDeps>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics_handle: Arc<PrometheusHandle>,
    start_time: Instant,
    connections: Arc<AtomicUsize>,
}

impl LoomServer {
    /// Assemble a server from its settings, a path registry with handlers
    /// already registered (`loom_rpc::register_all`), a shared `RpcContext`,
    /// the SRP credential store the deployment provisioned, and the
    /// filesystem/status event bus backing `activity`-channel subscriptions
    /// (owned by the caller, which also holds the `loom_watch::WatchHandles`
    /// the bus came from). Builds its own upload staging area and
    /// resumable-session registry.
    pub fn new(
        settings: Settings,
        registry: PathRegistry,
        rpc_context: RpcContext,
        credentials: Arc<dyn CredentialStore>,
        event_bus: loom_watch::EventBus,
        metrics_handle: PrometheusHandle,
    ) -> std::io::Result<Self> {
        let uploads = Arc::new(UploadManager::new(
            expand_home(&settings.paths.uploads_dir),
            settings.timeouts.max_upload_size_bytes,
        )?);

        let resumable_registry = Arc::new(InMemoryResumableSessions::new());
        let register_resumable = {
            let registry = Arc::clone(&resumable_registry);
            Arc::new(move |session_id: String, identity: String, key: SessionKey| {
                registry.register(session_id, identity, key);
            }) as Arc<dyn Fn(String, String, SessionKey) + Send + Sync>
        };

        let shutdown = Arc::new(ShutdownCoordinator::new());

        let session_deps = Arc::new(SessionDeps {
            registry: Arc::new(registry),
            rpc_context: Arc::new(rpc_context),
            credentials,
            resumable_sessions: resumable_registry,
            register_resumable,
            uploads,
            event_bus,
            subscription_buffer: settings.timeouts.outbound_buffer_capacity,
            heartbeat_interval: Duration::from_millis(settings.timeouts.heartbeat_interval_ms),
            srp_handshake_timeout: Duration::from_millis(settings.timeouts.srp_handshake_ms),
            shutdown: shutdown.token(),
        });

        Ok(Self {
            settings,
            session_deps,
            shutdown,
            metrics_handle: Arc::new(metrics_handle),
            start_time: Instant::now(),
            connections: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Build the Axum router with all routes and middleware.
    #[must_use]
    pub fn router(&self) -> Router {
        let state = AppState {
            session_deps: Arc::clone(&self.session_deps),
            shutdown: Arc::clone(&self.shutdown),
            start_time: self.start_time,
            metrics_handle: Arc::clone(&self.metrics_handle),
            auth: Arc::new(self.settings.auth.clone()),
            connections: Arc::clone(&self.connections),
            max_connections: self.settings.server.max_connections,
            max_message_size: self.settings.server.max_message_size,
        };

        Router::new()
            .route("/healthz", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_upgrade_handler))
            .with_state(state)
            // Outermost layers execute first on request, last on response.
            .layer(CatchPanicLayer::new())
            .layer(CompressionLayer::new())
            .layer(RequestBodyLimitLayer::new(self.settings.server.max_message_size))
            .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(30)))
            .layer(SetRequestIdLayer::x_request_id(UuidV7RequestId))
            .layer(PropagateRequestIdLayer::x_request_id())
    }

    /// Bind to a TCP port and start serving. Returns the bound address and a
    /// join handle for the server task.
    #[instrument(skip_all, fields(host = %self.settings.server.host, port = self.settings.server.port))]
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
        let addr = format!("{}:{}", self.settings.server.host, self.settings.server.port);
        let listener = TcpListener::bind(&addr).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, "server started");

        let router = self.router();
        let shutdown_token = self.shutdown.token();

        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_token.cancelled().await;
                    info!("server shutdown initiated");
                })
                .await;
            info!("server shutdown complete");
        });

        Ok((bound_addr, handle))
    }

    /// The shutdown coordinator.
    #[must_use]
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// The active settings.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

/// GET /healthz
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.connections.load(Ordering::Relaxed);
    // Supervisor doesn't expose a live process count; connections is the
    // operationally useful signal and is what /healthz actually reports on.
    Json(health::health_check(state.start_time, connections, 0))
}

/// GET /metrics — Prometheus text format.
async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics_handle.render()
}

/// GET /ws — binary wire-relay upgrade, gated by connection cap and Origin
/// policy (spec §4.9, §8 S6).
async fn ws_upgrade_handler(ws: WebSocketUpgrade, headers: HeaderMap, State(state): State<AppState>) -> Result<impl IntoResponse, StatusCode> {
    let current = state.connections.load(Ordering::Relaxed);
    if current >= state.max_connections {
        warn!(current, max = state.max_connections, "connection limit reached, rejecting upgrade");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    let origin = headers.get(axum::http::header::ORIGIN).and_then(|v| v.to_str().ok()).map(str::to_owned);
    let allowed = origin_allowed(origin.as_deref(), &state.auth);

    let deps = Arc::clone(&state.session_deps);
    let connections = Arc::clone(&state.connections);

    Ok(ws.max_message_size(state.max_message_size).on_upgrade(move |socket| async move {
        if !allowed {
            warn!(?origin, "rejecting connection with disallowed origin");
            reject_origin(socket).await;
            return;
        }
        connections.fetch_add(1, Ordering::Relaxed);
        run_connection(socket, deps).await;
        connections.fetch_sub(1, Ordering::Relaxed);
    }))
}

/// Whether `origin` passes the configured allow-list (spec §4.9: localhost,
/// RFC-1918/ULA LAN ranges, or an explicit entry in `allowedOrigins`).
fn origin_allowed(origin: Option<&str>, auth: &AuthSettings) -> bool {
    let Some(origin) = origin else {
        // Non-browser clients (CLI tooling, tests) never send an Origin
        // header; nothing in spec §8 asks that case to be rejected.
        return true;
    };

    if auth.allowed_origins.iter().any(|allowed| allowed == origin) {
        return true;
    }
    if !auth.allow_localhost_and_lan {
        return false;
    }

    origin_host(origin).is_some_and(|host| is_local_or_private(&host))
}

fn origin_host(origin: &str) -> Option<String> {
    let without_scheme = origin.split_once("://").map_or(origin, |(_, rest)| rest);
    let host_port = without_scheme.split('/').next().unwrap_or(without_scheme);
    let host = host_port.rsplit_once(':').map_or(host_port, |(host, _)| host);
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        None
    } else {
        Some(host.to_owned())
    }
}

fn is_local_or_private(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => is_private_v4(v4),
        Ok(IpAddr::V6(v6)) => v6.is_loopback() || is_unique_local_v6(v6),
        Err(_) => false,
    }
}

fn is_private_v4(addr: Ipv4Addr) -> bool {
    addr.is_loopback() || addr.is_private() || addr.is_link_local()
}

fn is_unique_local_v6(addr: Ipv6Addr) -> bool {
    (addr.segments()[0] & 0xfe00) == 0xfc00
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use loom_core::ids::ProjectId;
    use loom_core::project::Project;
    use loom_rpc::context::{MetadataStore, ProjectDirectory, SessionIndex};
    use loom_rpc::types::{SessionListFilter, SessionMetadata, SessionSummary};
    use loom_runtime::{Supervisor, SupervisorConfig};
    use loom_transcript::SessionReader;
    use loom_wire::Credentials;
    use tower::ServiceExt;

    struct NoopProjects;
    impl ProjectDirectory for NoopProjects {
        fn list(&self) -> Vec<Project> {
            Vec::new()
        }
        fn get(&self, _project_id: &ProjectId) -> Option<Project> {
            None
        }
        fn add(&self, absolute_path: &str) -> Project {
            Project { id: ProjectId::new(), absolute_path: absolute_path.to_owned(), name: String::new(), session_dir_path: String::new() }
        }
    }

    struct NoopMetadata;
    impl MetadataStore for NoopMetadata {
        fn get(&self, _session_id: &loom_core::ids::SessionId) -> SessionMetadata {
            SessionMetadata::default()
        }
        fn put(&self, _session_id: &loom_core::ids::SessionId, _metadata: SessionMetadata) {}
    }

    struct NoopIndex;
    impl SessionIndex for NoopIndex {
        fn list(&self, _filter: &SessionListFilter) -> Vec<SessionSummary> {
            Vec::new()
        }
        fn all(&self) -> Vec<SessionSummary> {
            Vec::new()
        }
    }

    struct NoopCredentials;
    impl CredentialStore for NoopCredentials {
        fn lookup(&self, _identity: &str) -> Option<Credentials> {
            None
        }
    }

    fn make_test_context() -> RpcContext {
        let supervisor = Arc::new(Supervisor::new(SupervisorConfig::default(), Arc::new(|_ctx| unreachable!("no spawn expected in these tests"))));
        RpcContext {
            supervisor,
            reader: SessionReader::new(),
            projects: Arc::new(NoopProjects),
            metadata: Arc::new(NoopMetadata),
            index: Arc::new(NoopIndex),
        }
    }

    fn make_server() -> LoomServer {
        let settings = Settings::default();
        let mut registry = PathRegistry::new();
        loom_rpc::register_all(&mut registry);
        let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder().handle();
        let handles = loom_watch::init(std::env::temp_dir(), loom_watch::ClassifyRoots {
            sessions_dir: std::env::temp_dir(),
            agent_sessions_dir: std::env::temp_dir(),
            settings_path: std::env::temp_dir().join("settings.json"),
            credentials_dir: std::env::temp_dir(),
        });
        let event_bus = handles.bus().clone();
        loom_watch::shutdown(handles);
        LoomServer::new(settings, registry, make_test_context(), Arc::new(NoopCredentials), event_bus, metrics_handle).unwrap()
    }

    #[test]
    fn origin_none_is_allowed() {
        assert!(origin_allowed(None, &AuthSettings::default()));
    }

    #[test]
    fn localhost_origin_is_allowed_by_default() {
        assert!(origin_allowed(Some("http://localhost:5173"), &AuthSettings::default()));
        assert!(origin_allowed(Some("http://127.0.0.1:5173"), &AuthSettings::default()));
    }

    #[test]
    fn private_lan_origin_is_allowed_by_default() {
        assert!(origin_allowed(Some("http://192.168.1.42:5173"), &AuthSettings::default()));
        assert!(origin_allowed(Some("http://10.0.0.5"), &AuthSettings::default()));
    }

    #[test]
    fn public_origin_is_rejected_by_default() {
        assert!(!origin_allowed(Some("https://evil.example.com"), &AuthSettings::default()));
    }

    #[test]
    fn explicit_allowlist_entry_is_allowed() {
        let auth = AuthSettings { allowed_origins: vec!["https://app.example.com".into()], ..AuthSettings::default() };
        assert!(origin_allowed(Some("https://app.example.com"), &auth));
    }

    #[test]
    fn disabling_localhost_and_lan_rejects_loopback() {
        let auth = AuthSettings { allow_localhost_and_lan: false, ..AuthSettings::default() };
        assert!(!origin_allowed(Some("http://localhost:5173"), &auth));
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let server = make_server();
        let app = server.router();
        let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
    }

    #[tokio::test]
    async fn ws_endpoint_requires_upgrade_headers() {
        let server = make_server();
        let app = server.router();
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_ne!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let app = server.router();
        let req = Request::builder().uri("/nope").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn server_listen_binds_and_shuts_down() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);
        server.shutdown().shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle).await.expect("shutdown timed out").expect("join error");
    }
}
