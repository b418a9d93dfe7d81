//! Read back a session's transcript from disk (spec §4.1 "SessionReader").
//!
//! The reader never mutates a transcript file; the owning Process is the
//! sole writer (spec §5 "single-writer"). Malformed trailing lines (a write
//! caught mid-flush) are skipped with a warning rather than failing the
//! whole read (spec §7 "transcript reads fall back to last good parse").

use std::path::{Path, PathBuf};

use loom_core::Message;
use serde_json::Value;
use tracing::warn;

use crate::errors::{Result, TranscriptError, TranscriptErrorKind};
use crate::line::TranscriptLine;
use crate::ordering::order_messages;

/// Identifies which on-disk transcript a read targets, paired with the
/// messages loaded from it. `session` carries only what this crate itself
/// knows about a session — its id and file path — not the richer metadata
/// (title, starred, archived) that lives in the out-of-scope KV store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionHandle {
    /// The session this transcript belongs to.
    pub session_id: String,
    /// The `.jsonl` file this transcript was read from.
    pub path: PathBuf,
}

/// Reads and reconstructs typed message sequences from `.jsonl` transcript
/// files. Stateless: every call re-reads from disk, since the file is the
/// authoritative source of truth (spec §1 "recovery is best-effort: the
/// transcript on disk wins").
#[derive(Clone, Copy, Debug, Default)]
pub struct SessionReader;

impl SessionReader {
    /// Construct a reader. Stateless, so this never fails.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// `loadSession(sessionId, projectId, afterMessageId?) → {session, messages}`.
    ///
    /// `session_dir` is the directory holding `{sessionId}.jsonl`, already
    /// resolved for `projectId` by the caller (ProjectScanner's concern, not
    /// this crate's). Returns messages ordered per `supports_dag`, filtered
    /// to those strictly after `after_message_id` when supplied.
    pub async fn load_session(
        &self,
        session_dir: impl AsRef<Path>,
        session_id: &str,
        after_message_id: Option<&str>,
        supports_dag: bool,
    ) -> Result<(SessionHandle, Vec<Message>)> {
        let path = session_dir.as_ref().join(format!("{session_id}.jsonl"));
        let messages = read_transcript_file(&path, supports_dag).await?;
        let messages = filter_after(messages, after_message_id);
        Ok((
            SessionHandle {
                session_id: session_id.to_owned(),
                path,
            },
            messages,
        ))
    }

    /// `loadAgentSession(sessionId, agentId)` — same as [`Self::load_session`]
    /// but over the subagent transcript file a Task tool invocation spawned.
    pub async fn load_agent_session(
        &self,
        session_dir: impl AsRef<Path>,
        agent_id: &str,
        supports_dag: bool,
    ) -> Result<(SessionHandle, Vec<Message>)> {
        let path = session_dir.as_ref().join(format!("{agent_id}.jsonl"));
        let messages = read_transcript_file(&path, supports_dag).await?;
        Ok((
            SessionHandle {
                session_id: agent_id.to_owned(),
                path,
            },
            messages,
        ))
    }

    /// `listAgentMappings(sessionId) → [{toolUseId, agentId}]`.
    ///
    /// Scans the main session transcript for `tool_use` blocks that spawned
    /// a subagent, recovering the `toolUseId → agentId` mapping from
    /// whatever extension field the provider recorded it under
    /// (`agentId`/`subagentId`/`taskId`, tried in that order).
    pub async fn list_agent_mappings(
        &self,
        session_dir: impl AsRef<Path>,
        session_id: &str,
    ) -> Result<Vec<AgentMapping>> {
        let path = session_dir.as_ref().join(format!("{session_id}.jsonl"));
        let lines = read_lines_tolerant(&path).await?;

        let mut mappings = Vec::new();
        for line in lines {
            let Some(content) = line.extra.get("content").and_then(Value::as_array) else {
                continue;
            };
            for block in content {
                if block.get("type").and_then(Value::as_str) != Some("tool_use") {
                    continue;
                }
                let Some(tool_use_id) = block.get("toolUseId").and_then(Value::as_str) else {
                    continue;
                };
                let agent_id = ["agentId", "subagentId", "taskId"]
                    .iter()
                    .find_map(|key| block.get(*key).and_then(Value::as_str));
                if let Some(agent_id) = agent_id {
                    mappings.push(AgentMapping {
                        tool_use_id: tool_use_id.to_owned(),
                        agent_id: agent_id.to_owned(),
                    });
                }
            }
        }
        Ok(mappings)
    }
}

/// One `toolUseId → agentId` mapping recovered from a session transcript.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentMapping {
    /// The `tool_use` block that spawned the subagent.
    pub tool_use_id: String,
    /// The subagent's own session/transcript id.
    pub agent_id: String,
}

async fn read_transcript_file(path: &Path, supports_dag: bool) -> Result<Vec<Message>> {
    let lines = read_lines_tolerant(path).await?;
    let messages = lines.into_iter().map(TranscriptLine::into_message).collect();
    Ok(order_messages(messages, supports_dag))
}

/// Read every line of `path`, parsing each as a [`TranscriptLine`]. A
/// missing file is treated as an empty transcript (a session that hasn't
/// written anything yet); malformed lines are skipped with a warning rather
/// than failing the whole read.
async fn read_lines_tolerant(path: &Path) -> Result<Vec<TranscriptLine>> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(TranscriptError::new(TranscriptErrorKind::ReadFailed, "read transcript file").with_source(e));
        }
    };

    let mut lines = Vec::new();
    for (idx, raw) in contents.lines().enumerate() {
        match TranscriptLine::parse(raw) {
            None => {}
            Some(Ok(line)) => lines.push(line),
            Some(Err(e)) => {
                warn!(path = %path.display(), line = idx + 1, error = %e, "skipping malformed transcript line");
            }
        }
    }
    Ok(lines)
}

fn filter_after(messages: Vec<Message>, after_message_id: Option<&str>) -> Vec<Message> {
    let Some(after) = after_message_id else {
        return messages;
    };
    let Some(cutoff) = messages.iter().position(|m| m.id == after) else {
        return messages;
    };
    messages.into_iter().skip(cutoff + 1).collect()
}
