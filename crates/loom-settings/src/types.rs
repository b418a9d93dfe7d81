//! Settings value types.

use serde::{Deserialize, Serialize};

/// Top-level settings document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Wire-relay/HTTP server settings.
    pub server: ServerSettings,
    /// Timeouts and caps named throughout spec §4–§5.
    pub timeouts: TimeoutSettings,
    /// Filesystem layout (spec §6 "Persistence layout").
    pub paths: PathSettings,
    /// Wire-relay origin allow-list and SRP identity store (spec §4.9).
    pub auth: AuthSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            timeouts: TimeoutSettings::default(),
            paths: PathSettings::default(),
            auth: AuthSettings::default(),
        }
    }
}

/// Server bind address and capacity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` = auto-assign).
    pub port: u16,
    /// Maximum concurrent wire-relay connections.
    pub max_connections: usize,
    /// Maximum concurrently spawned Processes (spec §4.4).
    pub max_concurrent_sessions: usize,
    /// Maximum WebSocket frame size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            max_connections: 256,
            max_concurrent_sessions: 32,
            max_message_size: 16 * 1024 * 1024,
        }
    }
}

/// Timeouts named in spec §5.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeoutSettings {
    /// Warm-pool idle grace before termination (default 30 s).
    pub idle_grace_ms: u64,
    /// Quiet window before an externally-modified session is no longer
    /// reported as `external` (default 5 s).
    pub external_quiet_ms: u64,
    /// Subscription heartbeat interval (default 30 s).
    pub heartbeat_interval_ms: u64,
    /// SRP handshake deadline before the connection is closed (default 30 s).
    pub srp_handshake_ms: u64,
    /// Coalescing window for same-path filesystem events (default 50 ms).
    pub watch_debounce_ms: u64,
    /// Augmenter `pending` emission throttle (default 50 ms).
    pub augment_throttle_ms: u64,
    /// Maximum bounded outbound events per subscription before `SLOW_CONSUMER`.
    pub outbound_buffer_capacity: usize,
    /// Ring-buffer cap on a Process's `messageHistory` (spec §9 open question; decided 10,000).
    pub max_history: usize,
    /// `0` = unlimited. Enforced by the Upload Manager.
    pub max_upload_size_bytes: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            idle_grace_ms: 30_000,
            external_quiet_ms: 5_000,
            heartbeat_interval_ms: 30_000,
            srp_handshake_ms: 30_000,
            watch_debounce_ms: 50,
            augment_throttle_ms: 50,
            outbound_buffer_capacity: 256,
            max_history: 10_000,
            max_upload_size_bytes: 0,
        }
    }
}

/// On-disk layout (spec §6 "Persistence layout").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PathSettings {
    /// Root directory scanned for projects.
    pub projects_root: String,
    /// Per-session transcript directory.
    pub session_dir: String,
    /// Per-session metadata KV directory.
    pub metadata_dir: String,
    /// Session-summary index directory.
    pub index_dir: String,
    /// Staging directory for in-progress uploads.
    pub uploads_dir: String,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            projects_root: "~/loom-projects".into(),
            session_dir: "~/.loom/sessions".into(),
            metadata_dir: "~/.loom/metadata".into(),
            index_dir: "~/.loom/index".into(),
            uploads_dir: "~/.loom/uploads".into(),
        }
    }
}

/// Auth/origin policy (spec §4.9).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Origins always allowed regardless of `allowed_origins` (localhost + RFC-1918 LAN).
    pub allow_localhost_and_lan: bool,
    /// Additional explicit origin allow-list entries.
    pub allowed_origins: Vec<String>,
    /// Path to the SRP verifier store (`identity -> {salt, verifier}`).
    pub srp_verifier_store_path: String,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            allow_localhost_and_lan: true,
            allowed_origins: Vec::new(),
            srp_verifier_store_path: "~/.loom/srp_verifiers.json".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_timeouts() {
        let t = TimeoutSettings::default();
        assert_eq!(t.idle_grace_ms, 30_000);
        assert_eq!(t.external_quiet_ms, 5_000);
        assert_eq!(t.heartbeat_interval_ms, 30_000);
        assert_eq!(t.watch_debounce_ms, 50);
        assert_eq!(t.outbound_buffer_capacity, 256);
        assert_eq!(t.max_history, 10_000);
    }

    #[test]
    fn settings_serde_roundtrip() {
        let s = Settings::default();
        let json = serde_json::to_string(&s).unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let partial = serde_json::json!({ "server": { "port": 9000 } });
        let s: Settings = serde_json::from_value(partial).unwrap();
        assert_eq!(s.server.port, 9000);
        assert_eq!(s.server.host, "127.0.0.1");
        assert_eq!(s.timeouts.max_history, 10_000);
    }
}
