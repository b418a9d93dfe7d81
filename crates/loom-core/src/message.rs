//! Transcript message and content-block types (spec §3).
//!
//! Provider-specific fields are not modeled as Rust enum variants — per the
//! "dynamic message shapes" design note, a known-fields subset is typed and
//! everything else is carried in `extra` untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Discriminant for [`Message::r#type`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// A message authored by the human user.
    User,
    /// A message authored by the agent.
    Assistant,
    /// A system-level message (e.g. compaction notice).
    System,
    /// The agent requesting to invoke a tool.
    ToolUse,
    /// The result of a tool invocation.
    ToolResult,
    /// A raw provider streaming event (`message_start`, `content_block_delta`, ...).
    StreamEvent,
}

/// Where a message was observed from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSource {
    /// Read back from the transcript log.
    Log,
    /// Observed directly from the live subprocess stream.
    Live,
}

/// One content block within a message's ordered content sequence.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlock {
    /// Block discriminant, e.g. `"text"`, `"thinking"`, `"tool_use"`, `"tool_result"`.
    #[serde(rename = "type")]
    pub r#type: String,
    /// Plain text content, when `type == "text"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Chain-of-thought text, when `type == "thinking"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    /// The tool-use id this block belongs to or resolves.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    /// Tool name, for `tool_use` blocks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Tool input payload, for `tool_use` blocks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Value>,
    /// Tool output payload, for `tool_result` blocks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<Value>,
    /// Whether the tool invocation errored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ContentBlock {
    /// A plain text block.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            r#type: "text".into(),
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// A pending tool-use block, i.e. one with no matching `tool_result` yet.
    #[must_use]
    pub fn is_pending_tool_use(&self) -> bool {
        self.r#type == "tool_use" && self.tool_result.is_none()
    }
}

/// Either a plain string or an ordered sequence of content blocks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// A bare string body.
    Text(String),
    /// An ordered sequence of content blocks.
    Blocks(Vec<ContentBlock>),
}

/// A single transcript message (spec §3).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique id within a session.
    pub id: String,
    /// Discriminant.
    #[serde(rename = "type")]
    pub r#type: MessageType,
    /// The message this one branches from, forming a DAG (spec §3, §9).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// `"user"` / `"assistant"` / `"system"`, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Body content.
    pub content: MessageContent,
    /// RFC 3339 timestamp.
    pub timestamp: String,
    /// Whether this message came from a subagent transcript.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_subagent: Option<bool>,
    /// The tool-use id of the parent agent call that spawned this subagent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_tool_use_id: Option<String>,
    /// Whether this was read from disk or observed live.
    pub source: MessageSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_block_constructor() {
        let block = ContentBlock::text("hello");
        assert_eq!(block.r#type, "text");
        assert_eq!(block.text.as_deref(), Some("hello"));
    }

    #[test]
    fn pending_tool_use_detection() {
        let mut block = ContentBlock {
            r#type: "tool_use".into(),
            tool_use_id: Some("t1".into()),
            ..ContentBlock::default()
        };
        assert!(block.is_pending_tool_use());
        block.tool_result = Some(Value::String("done".into()));
        assert!(!block.is_pending_tool_use());
    }

    #[test]
    fn message_content_untagged_string() {
        let msg: MessageContent = serde_json::from_str("\"hi\"").unwrap();
        assert!(matches!(msg, MessageContent::Text(s) if s == "hi"));
    }

    #[test]
    fn message_content_untagged_blocks() {
        let raw = serde_json::json!([{"type": "text", "text": "hi"}]);
        let msg: MessageContent = serde_json::from_value(raw).unwrap();
        assert!(matches!(msg, MessageContent::Blocks(v) if v.len() == 1));
    }

    #[test]
    fn message_roundtrip() {
        let msg = Message {
            id: "m1".into(),
            r#type: MessageType::User,
            parent_id: None,
            role: Some("user".into()),
            content: MessageContent::Text("hi".into()),
            timestamp: "2026-01-01T00:00:00Z".into(),
            is_subagent: None,
            parent_tool_use_id: None,
            source: MessageSource::Log,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("parentId"));
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn message_type_serializes_snake_case() {
        let json = serde_json::to_string(&MessageType::ToolUse).unwrap();
        assert_eq!(json, "\"tool_use\"");
    }
}
