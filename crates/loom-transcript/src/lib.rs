//! Append-only transcript logs and session reconstruction.
//!
//! A session's conversation lives on disk as a `.jsonl` file: one JSON
//! object per line, written append-only by the single Process that owns the
//! session ([`TranscriptLog`]) and read back by any number of readers
//! ([`SessionReader`]) without coordination. The file is the authoritative
//! source of truth; recovery after a crash is "replay what's on disk", not
//! "trust in-memory state".

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod errors;
mod line;
mod log;
mod ordering;
mod reader;

pub use errors::{Result, TranscriptError, TranscriptErrorKind};
pub use line::TranscriptLine;
pub use log::TranscriptLog;
pub use ordering::order_messages;
pub use reader::{AgentMapping, SessionHandle, SessionReader};
