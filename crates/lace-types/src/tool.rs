//! Tool call/result/descriptor types (spec §3.2, §6.3) and the
//! provider-facing chat message shapes built on top of them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A tagged content block. Only `Text` is defined today; the tag set is
/// open for future kinds (spec §3.2: "other kinds reserved").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn as_text(&self) -> &str {
        match self {
            ContentBlock::Text { text } => text,
        }
    }
}

/// A tool invocation requested by the assistant (spec §3.2).
///
/// `id` is provider-assigned when the provider supplies one; otherwise the
/// executor mints one. IDs are unique within a thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
}

/// The outcome of executing a `ToolCall` (spec §3.2).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResult {
    pub id: String,
    pub content: Vec<ContentBlock>,
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolResult {
    pub fn ok(id: impl Into<String>, text: impl Into<String>) -> Self {
        ToolResult {
            id: id.into(),
            content: vec![ContentBlock::text(text)],
            is_error: false,
            metadata: None,
        }
    }

    pub fn error(id: impl Into<String>, text: impl Into<String>) -> Self {
        ToolResult {
            id: id.into(),
            content: vec![ContentBlock::text(text)],
            is_error: true,
            metadata: None,
        }
    }
}

/// Behavioral hints a tool declares about itself (spec §3.2, §6.3).
///
/// `destructive_hint` drives the executor's serialization rule: a
/// destructive tool call, and everything after it in the same turn, runs
/// serially rather than concurrently.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolAnnotations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only_hint: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destructive_hint: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotent_hint: Option<bool>,
}

impl ToolAnnotations {
    pub fn is_destructive(&self) -> bool {
        self.destructive_hint.unwrap_or(false)
    }
}

/// A registered tool's descriptor, as surfaced to providers for tool-calling
/// (spec §3.2, §6.3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    #[serde(default)]
    pub annotations: ToolAnnotations,
}

// ── Provider-facing chat messages ──────────────────────────────────
//
// These are the shapes passed to `lace-providers`, not persisted events;
// a turn is rendered from the event log into a `Vec<Message>` just before
// each provider call.

/// A message in the conversation (provider-agnostic).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<MessagePart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessagePart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }
    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::Parts(vec![MessagePart::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: content.into(),
                is_error: false,
            }]),
        }
    }
}

impl MessageContent {
    /// Extract the plain-text content (first text part, or the full text).
    pub fn text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(t) => Some(t.as_str()),
            MessageContent::Parts(parts) => parts.iter().find_map(|p| match p {
                MessagePart::Text { text } => Some(text.as_str()),
                _ => None,
            }),
        }
    }

    /// Join all text parts with `"\n"`; non-text parts are skipped.
    pub fn extract_all_text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    MessagePart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_block_text_round_trips() {
        let block = ContentBlock::text("hi");
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "text", "text": "hi"}));
        let back: ContentBlock = serde_json::from_value(json).unwrap();
        assert_eq!(block, back);
    }

    #[test]
    fn destructive_hint_defaults_false() {
        let ann = ToolAnnotations::default();
        assert!(!ann.is_destructive());
        let ann = ToolAnnotations {
            destructive_hint: Some(true),
            ..Default::default()
        };
        assert!(ann.is_destructive());
    }

    #[test]
    fn extract_all_text_from_parts_joins_with_newline() {
        let content = MessageContent::Parts(vec![
            MessagePart::Text {
                text: "line one".into(),
            },
            MessagePart::ToolUse {
                id: "c1".into(),
                name: "exec".into(),
                input: serde_json::json!({}),
            },
            MessagePart::Text {
                text: "line two".into(),
            },
        ]);
        assert_eq!(content.extract_all_text(), "line one\nline two");
    }

    #[test]
    fn tool_result_ok_and_error_constructors() {
        let ok = ToolResult::ok("c1", "done");
        assert!(!ok.is_error);
        let err = ToolResult::error("c1", "boom");
        assert!(err.is_error);
    }
}
