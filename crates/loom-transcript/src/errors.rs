//! Transcript-crate error type, re-exported from `loom-core`.

pub use loom_core::errors::{TranscriptError, TranscriptErrorKind};

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, TranscriptError>;
