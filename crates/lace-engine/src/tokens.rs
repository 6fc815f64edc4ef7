//! Token accounting (spec §4.9, C10).

use serde::Serialize;

use lace_types::stream::Usage;
use lace_types::thread::Thread;

/// Fast local estimator: `ceil(len / 4)`, used for pre-flight budgeting
/// before a provider's authoritative `usage` is available.
pub fn estimate(text: &str) -> u32 {
    ((text.len() as u32) + 3) / 4
}

/// Rough estimate of the prompt a thread would project onto the wire: the
/// sum of every event's rendered text, via [`estimate`]. Good enough to
/// decide whether compaction is needed (spec §4.2 `needsCompaction`); the
/// actual request builder in the turn engine renders events to messages
/// more precisely.
pub fn estimate_thread_prompt_tokens(thread: &Thread) -> u32 {
    use lace_types::event::EventType;
    thread
        .events
        .iter()
        .map(|event| match &event.data {
            EventType::UserMessage(s)
            | EventType::AgentMessage(s)
            | EventType::SystemMessage(s) => estimate(s),
            EventType::ToolCall { name, arguments, .. } => {
                estimate(name) + estimate(&arguments.to_string())
            }
            EventType::ToolResult { content, .. } => content
                .iter()
                .map(|block| estimate(block.as_text()))
                .sum(),
            EventType::Compaction { summary, .. } => estimate(summary),
            EventType::AgentToken(_) | EventType::Unknown { .. } => 0,
        })
        .sum()
}

/// Running metrics for one in-flight turn (spec §4.9).
#[derive(Debug, Clone, Default, Serialize)]
pub struct CurrentTurnMetrics {
    pub turn_id: String,
    pub elapsed_ms: u64,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub retries: u32,
}

impl CurrentTurnMetrics {
    pub fn new(turn_id: impl Into<String>) -> Self {
        Self {
            turn_id: turn_id.into(),
            ..Default::default()
        }
    }

    pub fn record_usage(&mut self, usage: &Usage) {
        self.tokens_in += usage.prompt_tokens;
        self.tokens_out += usage.completion_tokens;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_rounds_up() {
        assert_eq!(estimate(""), 0);
        assert_eq!(estimate("a"), 1);
        assert_eq!(estimate("abcd"), 1);
        assert_eq!(estimate("abcde"), 2);
    }

    #[test]
    fn metrics_accumulate_across_calls() {
        let mut metrics = CurrentTurnMetrics::new("turn1");
        metrics.record_usage(&Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        });
        metrics.record_usage(&Usage {
            prompt_tokens: 3,
            completion_tokens: 2,
            total_tokens: 5,
        });
        assert_eq!(metrics.tokens_in, 13);
        assert_eq!(metrics.tokens_out, 7);
    }
}
