//! # loom-agent
//!
//! Coding-agent subprocess multiplexer server binary — wires together the
//! watcher, the Supervisor, the path registry, and the wire-relay server.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use loom_rpc::context::RpcContext;
use loom_rpc::registry::PathRegistry;
use loom_runtime::{SpawnBuilder, SpawnSpec, Supervisor, SupervisorConfig};
use loom_server::credentials::FileCredentialStore;
use loom_server::project_directory::{expand_home, FileStores};
use loom_server::{LoomServer, ShutdownCoordinator};
use loom_settings::Settings;
use loom_transcript::SessionReader;
use loom_wire::CredentialStore;

/// Loom agent server: relays coding-agent subprocess sessions over an
/// authenticated WebSocket wire protocol.
#[derive(Parser, Debug)]
#[command(name = "loom-agent", about = "Loom agent server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the settings file (defaults to `~/.loom/settings.json`).
    #[arg(long)]
    settings_path: Option<PathBuf>,

    /// Executable used to spawn each session's agent subprocess.
    #[arg(long, default_value = "claude")]
    agent_command: String,

    /// Flag prepended to the session id when resuming an existing session
    /// (e.g. `--resume`). Empty disables resume entirely.
    #[arg(long, default_value = "--resume")]
    agent_resume_flag: String,
}

/// Watch the event bus for filesystem changes to session transcripts this
/// process doesn't own, flagging them `external` (spec §4.4) and clearing
/// the flag once `external_quiet` has passed with no further change.
fn spawn_external_tracking_task(
    supervisor: Arc<Supervisor>,
    mut events: tokio::sync::broadcast::Receiver<loom_watch::WatchEvent>,
    external_quiet: std::time::Duration,
) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(loom_watch::WatchEvent::FileChange { kind, path, .. })
                    if matches!(kind, loom_watch::PathKind::Session | loom_watch::PathKind::AgentSession) =>
                {
                    let Some(session_id) = path.file_stem().and_then(std::ffi::OsStr::to_str) else { continue };
                    let session_id = loom_core::ids::SessionId::from_string(session_id.to_owned());
                    supervisor.note_external_modification(session_id.clone(), chrono::Utc::now().to_rfc3339());

                    let supervisor = Arc::clone(&supervisor);
                    tokio::spawn(async move {
                        tokio::time::sleep(external_quiet).await;
                        supervisor.clear_external(&session_id);
                    });
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Build the closure that turns a spawn request into a concrete
/// [`SpawnSpec`] for the configured agent CLI (spec.md §4.5: "the Process's
/// agent subprocess is an opaque `tokio::process::Child`" — which binary
/// that is is a deployment concern, not a registry one).
fn make_spawn_builder(agent_command: String, resume_flag: String) -> SpawnBuilder {
    Arc::new(move |ctx: &loom_runtime::SpawnContext<'_>| {
        let mut args = Vec::new();
        if ctx.resume && !resume_flag.is_empty() {
            args.push(resume_flag.clone());
            args.push(ctx.session_id.to_string());
        }
        SpawnSpec { program: agent_command.clone(), args, cwd: ctx.project_path.to_path_buf() }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args.settings_path.unwrap_or_else(loom_settings::settings_path);
    let mut settings = loom_settings::load_settings_from_path(&settings_path).unwrap_or_default();
    if let Some(host) = args.host {
        settings.server.host = host;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }

    loom_logging::init(loom_logging::LogLevel::Info, loom_logging::LogFormat::Pretty)
        .context("failed to install tracing subscriber")?;

    let watch_roots = loom_watch::ClassifyRoots {
        sessions_dir: expand_home(&settings.paths.session_dir),
        agent_sessions_dir: expand_home(&settings.paths.session_dir).join("agents"),
        settings_path: settings_path.clone(),
        credentials_dir: expand_home(&settings.auth.srp_verifier_store_path).parent().map(std::path::Path::to_path_buf).unwrap_or_default(),
    };
    let watch_handles = loom_watch::init(expand_home(&settings.paths.projects_root), watch_roots);
    let event_bus = watch_handles.bus().clone();

    let spawn_builder = make_spawn_builder(args.agent_command.clone(), args.agent_resume_flag.clone());
    let supervisor_config =
        SupervisorConfig { idle_grace: std::time::Duration::from_millis(settings.timeouts.idle_grace_ms), external_quiet: std::time::Duration::from_millis(settings.timeouts.external_quiet_ms) };
    let supervisor = Arc::new(Supervisor::new(supervisor_config, spawn_builder));

    let (idle_shutdown_tx, idle_shutdown_rx) = tokio::sync::oneshot::channel();
    supervisor.spawn_idle_eviction_loop(std::time::Duration::from_secs(10), idle_shutdown_rx);
    spawn_external_tracking_task(Arc::clone(&supervisor), event_bus.subscribe(), supervisor_config.external_quiet);

    let stores = FileStores::new(&settings.paths).context("failed to open persistence stores")?;

    let rpc_context = RpcContext {
        supervisor: Arc::clone(&supervisor),
        reader: SessionReader::new(),
        projects: Arc::new(stores.projects),
        metadata: Arc::new(stores.metadata),
        index: Arc::new(stores.index),
    };

    let mut registry = PathRegistry::new();
    loom_rpc::register_all(&mut registry);
    let route_count = registry.route_count();

    let credentials: Arc<dyn CredentialStore> = Arc::new(FileCredentialStore::load(expand_home(&settings.auth.srp_verifier_store_path)).context("failed to load SRP verifier store")?);

    let metrics_handle = loom_server::metrics::install_recorder();

    let server = LoomServer::new(settings, registry, rpc_context, credentials, event_bus, metrics_handle).context("failed to assemble server")?;

    let (addr, handle) = server.listen().await.context("failed to bind server")?;
    info!(%addr, route_count, "loom-agent listening");

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutting down");

    server.shutdown().shutdown();
    let _ = handle.await;

    let _ = idle_shutdown_tx.send(());
    loom_watch::shutdown(watch_handles);

    info!("shutdown complete");
    Ok(())
}
