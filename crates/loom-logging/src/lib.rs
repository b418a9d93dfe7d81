//! Structured logging bootstrap.
//!
//! A thin `tracing-subscriber` init over a `LogLevel`/`LogFormat` pair; no
//! query transport (out of scope here — see `DESIGN.md`).

#![deny(unsafe_code)]

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Severity level, ordered the same way `tracing::Level` is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Fine-grained diagnostic detail.
    Trace,
    /// Debugging detail not needed in steady-state operation.
    Debug,
    /// Notable lifecycle events.
    Info,
    /// Recoverable anomalies.
    Warn,
    /// Failures requiring operator attention.
    Error,
}

impl LogLevel {
    /// Map to the matching `tracing::Level`.
    #[must_use]
    pub fn as_tracing(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

/// Output format for the process-wide subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, for local development.
    Pretty,
    /// Newline-delimited JSON, for production log collection.
    Json,
}

/// Initialize the global `tracing` subscriber.
///
/// Call once, at process start, before spawning the Supervisor or Watcher.
/// Returns an error if a global subscriber is already installed.
pub fn init(level: LogLevel, format: LogFormat) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_tracing().to_string()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
}
