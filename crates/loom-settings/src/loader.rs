//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`Settings::default()`].
//! 2. If `~/.loom/settings.json` exists, deep-merge user values over defaults.
//! 3. Apply environment variable overrides (highest priority).

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::Settings;

/// Resolve the path to the settings file (`~/.loom/settings.json`).
#[must_use]
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".loom").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<Settings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<Settings> {
    let defaults = serde_json::to_value(Settings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: Settings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key).
/// - Arrays and primitives are replaced entirely by source.
/// - Null values in source are skipped (preserving target).
#[must_use]
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are silently ignored (fall back to file/default), with a
/// `warn!` logged so the operator notices a typo.
pub fn apply_env_overrides(settings: &mut Settings) {
    if let Some(v) = read_env_u16("LOOM_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_string("LOOM_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_usize("LOOM_MAX_SESSIONS", 1, 10_000) {
        settings.server.max_concurrent_sessions = v;
    }
    if let Some(v) = read_env_string("LOOM_PROJECTS_ROOT") {
        settings.paths.projects_root = v;
    }
    if let Some(v) = read_env_u64("LOOM_IDLE_GRACE_MS", 0, 3_600_000) {
        settings.timeouts.idle_grace_ms = v;
    }
    if let Some(v) = read_env_u64("LOOM_EXTERNAL_QUIET_MS", 0, 3_600_000) {
        settings.timeouts.external_quiet_ms = v;
    }
    if let Some(v) = read_env_u64("LOOM_MAX_UPLOAD_SIZE_BYTES", 0, u64::MAX) {
        settings.timeouts.max_upload_size_bytes = v;
    }
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n).or_else(|| {
        tracing::warn!(key = name, value = %val, "env var out of range, ignoring");
        None
    })
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn deep_merge_overrides_leaf() {
        let target = json!({"server": {"port": 0, "host": "127.0.0.1"}});
        let source = json!({"server": {"port": 9000}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9000);
        assert_eq!(merged["server"]["host"], "127.0.0.1");
    }

    #[test]
    fn deep_merge_skips_null() {
        let target = json!({"a": 1});
        let source = json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn deep_merge_replaces_arrays() {
        let target = json!({"allowedOrigins": ["a", "b"]});
        let source = json!({"allowedOrigins": ["c"]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["allowedOrigins"], json!(["c"]));
    }

    #[test]
    fn missing_file_returns_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("does-not-exist.json");
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 4242}}"#).unwrap();
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.server.port, 4242);
        assert_eq!(settings.server.host, "127.0.0.1");
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(load_settings_from_path(&path).is_err());
    }

    #[test]
    fn env_override_parsing_rejects_out_of_range() {
        assert_eq!(read_env_u16("LOOM_NONEXISTENT_VAR_XYZ", 1, 10), None);
    }
}
