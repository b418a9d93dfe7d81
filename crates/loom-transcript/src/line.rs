//! One line of a transcript file (spec §6 "Transcript file format").

use loom_core::{ContentBlock, Message, MessageContent, MessageSource, MessageType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single parsed JSON object from a `.jsonl` transcript file.
///
/// `uuid`, `type`, and `timestamp` are the only fields the reader relies on;
/// everything else is carried untouched in `extra` (spec §9 "dynamic
/// message shapes" — do not force provider-specific fields into one fixed
/// struct).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TranscriptLine {
    /// Unique id within the session.
    pub uuid: String,
    /// Message-type discriminant, provider-defined.
    #[serde(rename = "type")]
    pub r#type: String,
    /// RFC 3339 timestamp.
    pub timestamp: String,
    /// Everything else in the JSON object, preserved on round-trip.
    #[serde(flatten)]
    pub extra: Value,
}

impl TranscriptLine {
    /// Parse one line of a transcript file. Returns `None` (rather than an
    /// error) for blank lines, which callers should simply skip.
    #[must_use]
    pub fn parse(line: &str) -> Option<Result<Self, serde_json::Error>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(serde_json::from_str(trimmed))
    }

    /// The `parentId` field, if the extension bag carries one.
    #[must_use]
    pub fn parent_id(&self) -> Option<&str> {
        self.extra.get("parentId").and_then(Value::as_str)
    }

    /// Serialize back to one JSONL line (no trailing newline).
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Reconstruct a typed [`Message`] from this line's known fields plus
    /// whatever the extension bag supplies, preserving unknown content
    /// shapes as best-effort text (spec §9 "dynamic message shapes").
    #[must_use]
    pub fn into_message(self) -> Message {
        let message_type = match self.r#type.as_str() {
            "user" => MessageType::User,
            "assistant" => MessageType::Assistant,
            "system" => MessageType::System,
            "tool_use" => MessageType::ToolUse,
            "tool_result" => MessageType::ToolResult,
            _ => MessageType::StreamEvent,
        };

        let parent_id = self.extra.get("parentId").and_then(Value::as_str).map(str::to_owned);
        let role = self.extra.get("role").and_then(Value::as_str).map(str::to_owned);
        let is_subagent = self.extra.get("isSubagent").and_then(Value::as_bool);
        let parent_tool_use_id = self
            .extra
            .get("parentToolUseId")
            .and_then(Value::as_str)
            .map(str::to_owned);

        let content = match self.extra.get("content") {
            Some(Value::String(s)) => MessageContent::Text(s.clone()),
            Some(Value::Array(_)) => serde_json::from_value::<Vec<ContentBlock>>(self.extra["content"].clone())
                .map(MessageContent::Blocks)
                .unwrap_or_else(|_| MessageContent::Text(String::new())),
            _ => MessageContent::Text(String::new()),
        };

        Message {
            id: self.uuid,
            r#type: message_type,
            parent_id,
            role,
            content,
            timestamp: self.timestamp,
            is_subagent,
            parent_tool_use_id,
            source: MessageSource::Log,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_blank_line_is_none() {
        assert!(TranscriptLine::parse("   ").is_none());
        assert!(TranscriptLine::parse("").is_none());
    }

    #[test]
    fn parse_known_and_extension_fields() {
        let raw = r#"{"uuid":"m1","type":"user","timestamp":"2026-01-01T00:00:00Z","parentId":null,"custom":{"foo":1}}"#;
        let line = TranscriptLine::parse(raw).unwrap().unwrap();
        assert_eq!(line.uuid, "m1");
        assert_eq!(line.r#type, "user");
        assert_eq!(line.extra["custom"]["foo"], 1);
    }

    #[test]
    fn parse_malformed_line_is_error() {
        let result = TranscriptLine::parse("{not json").unwrap();
        assert!(result.is_err());
    }

    #[test]
    fn parent_id_extraction() {
        let line = TranscriptLine {
            uuid: "m2".into(),
            r#type: "assistant".into(),
            timestamp: "2026-01-01T00:00:01Z".into(),
            extra: json!({"parentId": "m1"}),
        };
        assert_eq!(line.parent_id(), Some("m1"));
    }

    #[test]
    fn roundtrip_preserves_extension_fields() {
        let raw = r#"{"uuid":"m1","type":"user","timestamp":"t","content":"hi"}"#;
        let line = TranscriptLine::parse(raw).unwrap().unwrap();
        let back = line.to_line().unwrap();
        let reparsed = TranscriptLine::parse(&back).unwrap().unwrap();
        assert_eq!(reparsed, line);
    }

    #[test]
    fn into_message_string_content() {
        let raw = r#"{"uuid":"m1","type":"user","timestamp":"t","role":"user","content":"hi"}"#;
        let line = TranscriptLine::parse(raw).unwrap().unwrap();
        let msg = line.into_message();
        assert_eq!(msg.id, "m1");
        assert!(matches!(msg.r#type, MessageType::User));
        assert_eq!(msg.role.as_deref(), Some("user"));
        assert!(matches!(msg.content, MessageContent::Text(t) if t == "hi"));
    }

    #[test]
    fn into_message_block_content() {
        let raw = r#"{"uuid":"m2","type":"assistant","timestamp":"t","content":[{"type":"text","text":"hello"}]}"#;
        let line = TranscriptLine::parse(raw).unwrap().unwrap();
        let msg = line.into_message();
        assert!(matches!(msg.content, MessageContent::Blocks(b) if b.len() == 1));
    }

    #[test]
    fn into_message_unknown_type_becomes_stream_event() {
        let raw = r#"{"uuid":"m3","type":"custom_provider_thing","timestamp":"t"}"#;
        let line = TranscriptLine::parse(raw).unwrap().unwrap();
        let msg = line.into_message();
        assert!(matches!(msg.r#type, MessageType::StreamEvent));
    }

    #[test]
    fn into_message_carries_parent_and_subagent_fields() {
        let raw = r#"{"uuid":"m4","type":"assistant","timestamp":"t","parentId":"m3","isSubagent":true,"parentToolUseId":"tu1"}"#;
        let line = TranscriptLine::parse(raw).unwrap().unwrap();
        let msg = line.into_message();
        assert_eq!(msg.parent_id.as_deref(), Some("m3"));
        assert_eq!(msg.is_subagent, Some(true));
        assert_eq!(msg.parent_tool_use_id.as_deref(), Some("tu1"));
    }
}
