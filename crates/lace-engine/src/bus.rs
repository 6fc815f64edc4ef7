//! The event bus (spec §4.10, C11): in-process typed pub/sub with a closed
//! subject set and per-subject ordering. Built on `tokio::sync::broadcast`
//! rather than the teacher's per-turn `mpsc::Sender<TurnEvent>` (see
//! `sa_gateway::runtime::turn::run_turn`) because spec §4.10 requires
//! *multiple* subscribers observing the same ordered stream, not one
//! consumer per turn; broadcast's "publish never blocks, slow receivers
//! lag instead" semantics also matches "no backpressure is applied to the
//! engine" directly.

use serde::Serialize;
use serde_json::Value;

use lace_types::session::ApprovalDecision;
use lace_types::stream::{ProviderErrorKind, Usage};

/// One entry in a turn's progress snapshot (spec §4.6 `turn_progress`).
#[derive(Debug, Clone, Serialize)]
pub struct TurnProgress {
    pub turn_id: String,
    pub elapsed_ms: u64,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub current_tool: Option<String>,
}

/// The closed subject set (spec §4.10). Every variant is one "subject";
/// ordering is preserved per variant kind as events are published.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum BusEvent {
    /// First user-facing event after admission (spec §4.6).
    TurnStart { thread_id: String, turn_id: String },

    AgentThinkingComplete { thread_id: String, turn_id: String },

    /// Streamed token text; bus-only, never persisted (spec §3.2).
    AgentToken { thread_id: String, turn_id: String, text: String },

    ToolCallStart { thread_id: String, turn_id: String, call_id: String, name: String },

    ToolCallComplete {
        thread_id: String,
        turn_id: String,
        call_id: String,
        name: String,
        is_error: bool,
    },

    TurnProgress(TurnProgress),

    TurnComplete {
        thread_id: String,
        turn_id: String,
        tokens_in: u32,
        tokens_out: u32,
        retries: u32,
        elapsed_ms: u64,
    },

    TurnAborted {
        thread_id: String,
        turn_id: String,
        kind: String,
        tokens_in: u32,
        tokens_out: u32,
        elapsed_ms: u64,
    },

    RetryAttempt { thread_id: String, turn_id: String, attempt: u32, backoff_ms: u64 },

    TokenBudgetWarning { thread_id: String, turn_id: String, estimated_tokens: u32 },

    /// A mid-turn compaction rolled `thread_id` onto `new_thread_id` (spec
    /// §4.2). Subscribers tracking a thread by id should switch.
    ThreadCompacted { thread_id: String, turn_id: String, new_thread_id: String },

    ApprovalRequested {
        thread_id: String,
        turn_id: String,
        request_id: String,
        tool_name: String,
        arguments: Value,
    },

    ApprovalResolved { request_id: String, decision: ApprovalDecision },

    /// Mirrors an event just appended to a thread (spec §4.2 `addEvent`
    /// "publish on the bus").
    ThreadEvent { thread_id: String, event_id: i64, type_tag: String },

    MessageQueued { thread_id: String, queue_length: usize, entry_id: String },

    StateChanged { thread_id: String, turn_id: String, state: String },

    Usage { thread_id: String, turn_id: String, usage: Usage },

    Error { thread_id: String, turn_id: Option<String>, kind: ProviderErrorKind },
}

/// A typed publish/subscribe channel (spec §4.10). Cloning shares the same
/// underlying broadcast sender.
#[derive(Clone)]
pub struct EventBus {
    sender: tokio::sync::broadcast::Sender<BusEvent>,
}

impl EventBus {
    /// `capacity` bounds how many not-yet-consumed events the slowest
    /// subscriber may lag before it starts missing ones (the teacher has no
    /// direct analogue; 1024 comfortably covers a single turn's chunk volume).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        EventBus { sender }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    /// Publish never blocks and never fails on "no subscribers" — it is a
    /// documented no-op in that case (spec §4.10: "no backpressure is
    /// applied to the engine").
    pub fn publish(&self, event: BusEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
