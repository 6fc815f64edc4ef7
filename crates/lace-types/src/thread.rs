//! The `Thread` entity (spec §3.2).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::Event;

/// A conversation thread. Owned by the thread manager for its active
/// lifetime; persisted row-by-row by the event store (spec §3.2, §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compaction_of_thread_id: Option<String>,
    pub events: Vec<Event>,
}

impl Thread {
    /// The suffix of events from the last `USER_MESSAGE` onward — spec
    /// §3.3's definition of the thread's "current turn".
    pub fn current_turn(&self) -> &[Event] {
        let start = self
            .events
            .iter()
            .rposition(|e| matches!(e.data, crate::event::EventType::UserMessage(_)))
            .unwrap_or(0);
        &self.events[start..]
    }

    /// Spec §3.3: the turn is "closed" iff the current-turn suffix ends in
    /// `AGENT_MESSAGE` with no dangling `TOOL_CALL` lacking a `TOOL_RESULT`.
    pub fn is_turn_closed(&self) -> bool {
        use crate::event::EventType;
        let turn = self.current_turn();
        let ends_in_agent_message = matches!(turn.last().map(|e| &e.data), Some(EventType::AgentMessage(_)));
        if !ends_in_agent_message {
            return false;
        }
        let mut pending: std::collections::HashSet<&str> = std::collections::HashSet::new();
        for event in turn {
            match &event.data {
                EventType::ToolCall { call_id, .. } => {
                    pending.insert(call_id.as_str());
                }
                EventType::ToolResult { call_id, .. } => {
                    pending.remove(call_id.as_str());
                }
                _ => {}
            }
        }
        pending.is_empty()
    }
}
