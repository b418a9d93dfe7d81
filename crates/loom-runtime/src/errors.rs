//! Runtime-crate error types, re-exported from `loom-core`.

pub use loom_core::errors::{ProcessError, ProcessErrorKind, SupervisorError, SupervisorErrorKind};

/// Result alias for [`ProcessError`]-producing operations.
pub type ProcessResult<T> = std::result::Result<T, ProcessError>;
/// Result alias for [`SupervisorError`]-producing operations.
pub type SupervisorResult<T> = std::result::Result<T, SupervisorError>;
