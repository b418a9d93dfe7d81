//! Append-only transcript writer (spec §4.1, §5 "Transcript files:
//! single-writer").
//!
//! Owned exclusively by the Process that owns a session; `SessionReader`
//! only ever opens the same file read-only.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::errors::{Result, TranscriptError, TranscriptErrorKind};

/// An append-only writer for one session's `.jsonl` transcript.
pub struct TranscriptLog {
    path: PathBuf,
}

impl TranscriptLog {
    /// Open (creating if necessary) the transcript file at `session_dir/session_id.jsonl`.
    #[must_use]
    pub fn new(session_dir: impl AsRef<Path>, session_id: &str) -> Self {
        Self {
            path: session_dir.as_ref().join(format!("{session_id}.jsonl")),
        }
    }

    /// The path this log writes to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one JSON object as a line. `value` must already carry `uuid`,
    /// `type`, and `timestamp` (spec §6).
    pub async fn append(&self, value: &impl Serialize) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TranscriptError::new(TranscriptErrorKind::WriteFailed, "create session dir").with_source(e))?;
        }

        let mut line = serde_json::to_string(value)
            .map_err(|e| TranscriptError::new(TranscriptErrorKind::WriteFailed, "serialize transcript line").with_source(e))?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .await
            .map_err(|e| TranscriptError::new(TranscriptErrorKind::WriteFailed, "open transcript for append").with_source(e))?;

        file.write_all(line.as_bytes())
            .await
            .map_err(|e| TranscriptError::new(TranscriptErrorKind::WriteFailed, "write transcript line").with_source(e))?;
        file.flush()
            .await
            .map_err(|e| TranscriptError::new(TranscriptErrorKind::WriteFailed, "flush transcript").with_source(e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn append_creates_file_and_directory() {
        let dir = tempdir().unwrap();
        let session_dir = dir.path().join("nested").join("sessions");
        let log = TranscriptLog::new(&session_dir, "s1");

        log.append(&json!({"uuid": "m1", "type": "user", "timestamp": "t1"}))
            .await
            .unwrap();

        let content = tokio::fs::read_to_string(log.path()).await.unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("\"uuid\":\"m1\""));
    }

    #[tokio::test]
    async fn successive_appends_are_one_line_each() {
        let dir = tempdir().unwrap();
        let log = TranscriptLog::new(dir.path(), "s1");

        for i in 0..3 {
            log.append(&json!({"uuid": format!("m{i}"), "type": "user", "timestamp": "t"}))
                .await
                .unwrap();
        }

        let content = tokio::fs::read_to_string(log.path()).await.unwrap();
        assert_eq!(content.lines().count(), 3);
    }

    #[tokio::test]
    async fn path_matches_session_id() {
        let dir = tempdir().unwrap();
        let log = TranscriptLog::new(dir.path(), "abc-123");
        assert_eq!(log.path(), dir.path().join("abc-123.jsonl"));
    }
}
