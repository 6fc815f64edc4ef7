//! The event data model (spec §3.2, §6.2).
//!
//! Events are immutable once appended. `EventType` is a closed tag set with
//! one escape hatch (`Unknown`) so forward compatibility holds: a store
//! opened by an older binary must still round-trip event types it doesn't
//! recognize instead of dropping them — so `Unknown` carries both the
//! original tag and the raw data blob, not just the tag.

use chrono::{DateTime, Utc};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::ids::EventId;
use crate::tool::ContentBlock;

/// One immutable record in a thread's log.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub event_id: EventId,
    pub thread_id: String,
    pub timestamp: DateTime<Utc>,
    pub data: EventType,
}

/// The closed tag set from spec §3.2, plus `Unknown` for forward
/// compatibility (spec §6.2: "unknown `type` values MUST be preserved and
/// echoed through `getEvents`").
#[derive(Debug, Clone, PartialEq)]
pub enum EventType {
    UserMessage(String),

    AgentMessage(String),

    /// Transient; never persisted to the store. Only ever travels on the
    /// event bus (spec §9 Open Questions).
    AgentToken(String),

    ToolCall {
        call_id: String,
        name: String,
        arguments: Value,
    },

    ToolResult {
        call_id: String,
        content: Vec<ContentBlock>,
        is_error: bool,
        metadata: Option<Value>,
    },

    SystemMessage(String),

    Compaction {
        replaces_through_event_id: EventId,
        summary: String,
    },

    /// Any `type` this binary doesn't recognize, preserved verbatim.
    Unknown { raw_type: String, data: Value },
}

impl EventType {
    /// The `type` tag as it would be written to the store (spec §6.2).
    pub fn type_tag(&self) -> &str {
        match self {
            EventType::UserMessage(_) => "USER_MESSAGE",
            EventType::AgentMessage(_) => "AGENT_MESSAGE",
            EventType::AgentToken(_) => "AGENT_TOKEN",
            EventType::ToolCall { .. } => "TOOL_CALL",
            EventType::ToolResult { .. } => "TOOL_RESULT",
            EventType::SystemMessage(_) => "SYSTEM_MESSAGE",
            EventType::Compaction { .. } => "COMPACTION",
            EventType::Unknown { raw_type, .. } => raw_type.as_str(),
        }
    }

    /// Whether this event type is ever allowed to be written to the
    /// durable store. Only `AgentToken` is bus-only (spec §9).
    pub fn is_persistable(&self) -> bool {
        !matches!(self, EventType::AgentToken(_))
    }

    /// Encode the `data` payload as a JSON value, the shape persisted in
    /// the `data_blob` column (spec §4.1, §6.2).
    pub fn data_to_json(&self) -> Value {
        match self {
            EventType::UserMessage(s)
            | EventType::AgentMessage(s)
            | EventType::AgentToken(s)
            | EventType::SystemMessage(s) => Value::String(s.clone()),
            EventType::ToolCall {
                call_id,
                name,
                arguments,
            } => serde_json::json!({ "callId": call_id, "name": name, "arguments": arguments }),
            EventType::ToolResult {
                call_id,
                content,
                is_error,
                metadata,
            } => serde_json::json!({
                "callId": call_id,
                "content": content,
                "isError": is_error,
                "metadata": metadata,
            }),
            EventType::Compaction {
                replaces_through_event_id,
                summary,
            } => serde_json::json!({
                "replacesThroughEventId": replaces_through_event_id,
                "summary": summary,
            }),
            EventType::Unknown { data, .. } => data.clone(),
        }
    }

    /// Reconstruct an `EventType` from a stored `(type_tag, data_blob)` pair.
    /// Unrecognized tags become `Unknown`, never an error — this is what
    /// makes the store forward-compatible (spec §6.2).
    pub fn from_stored(type_tag: &str, data: Value) -> EventType {
        match type_tag {
            "USER_MESSAGE" => EventType::UserMessage(data.as_str().unwrap_or_default().to_owned()),
            "AGENT_MESSAGE" => {
                EventType::AgentMessage(data.as_str().unwrap_or_default().to_owned())
            }
            "AGENT_TOKEN" => EventType::AgentToken(data.as_str().unwrap_or_default().to_owned()),
            "SYSTEM_MESSAGE" => {
                EventType::SystemMessage(data.as_str().unwrap_or_default().to_owned())
            }
            "TOOL_CALL" => EventType::ToolCall {
                call_id: field_str(&data, "callId"),
                name: field_str(&data, "name"),
                arguments: data.get("arguments").cloned().unwrap_or(Value::Null),
            },
            "TOOL_RESULT" => EventType::ToolResult {
                call_id: field_str(&data, "callId"),
                content: data
                    .get("content")
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .unwrap_or_default(),
                is_error: data
                    .get("isError")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
                metadata: data.get("metadata").cloned().filter(|v| !v.is_null()),
            },
            "COMPACTION" => EventType::Compaction {
                replaces_through_event_id: data
                    .get("replacesThroughEventId")
                    .and_then(|v| v.as_i64())
                    .unwrap_or_default(),
                summary: field_str(&data, "summary"),
            },
            other => EventType::Unknown {
                raw_type: other.to_owned(),
                data,
            },
        }
    }
}

fn field_str(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_owned()
}

// Manual (de)serialization so the wire/JSON-debug form and the DB form agree:
// `{event_id, thread_id, timestamp, type, data}`.
impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("Event", 5)?;
        s.serialize_field("event_id", &self.event_id)?;
        s.serialize_field("thread_id", &self.thread_id)?;
        s.serialize_field("timestamp", &self.timestamp)?;
        s.serialize_field("type", self.data.type_tag())?;
        s.serialize_field("data", &self.data.data_to_json())?;
        s.end()
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            event_id: EventId,
            thread_id: String,
            timestamp: DateTime<Utc>,
            #[serde(rename = "type")]
            type_tag: String,
            data: Value,
        }
        let raw = Raw::deserialize(deserializer)?;
        if raw.thread_id.is_empty() {
            return Err(D::Error::custom("thread_id must not be empty"));
        }
        Ok(Event {
            event_id: raw.event_id,
            thread_id: raw.thread_id,
            timestamp: raw.timestamp,
            data: EventType::from_stored(&raw.type_tag, raw.data),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_round_trips_through_json() {
        let ev = Event {
            event_id: 1,
            thread_id: "lace_20260726_abcdef".into(),
            timestamp: Utc::now(),
            data: EventType::ToolCall {
                call_id: "c1".into(),
                name: "bash".into(),
                arguments: serde_json::json!({"command": "echo hi"}),
            },
        };
        let json = serde_json::to_string(&ev).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(ev, back);
    }

    #[test]
    fn unknown_type_round_trips_verbatim() {
        let data = serde_json::json!({"foo": "bar"});
        let ev = EventType::from_stored("FUTURE_EVENT", data.clone());
        assert_eq!(ev.type_tag(), "FUTURE_EVENT");
        assert_eq!(ev.data_to_json(), data);
    }

    #[test]
    fn agent_token_is_not_persistable() {
        assert!(!EventType::AgentToken("tok".into()).is_persistable());
        assert!(EventType::UserMessage("hi".into()).is_persistable());
    }
}
