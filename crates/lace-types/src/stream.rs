//! Streaming provider chunk model (spec §4.3) and provider error taxonomy.

use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream of provider chunks.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// One chunk from a provider's streaming response (spec §4.3). Providers
/// that don't support streaming are adapted to emit a single `MessageStop`
/// after one non-streaming call.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "token")]
    Token { text: String },

    #[serde(rename = "tool_use_start")]
    ToolUseStart { call_id: String, name: String },

    #[serde(rename = "tool_input_delta")]
    ToolInputDelta { call_id: String, partial_json: String },

    #[serde(rename = "tool_use_complete")]
    ToolUseComplete {
        call_id: String,
        name: String,
        input: serde_json::Value,
    },

    #[serde(rename = "message_stop")]
    MessageStop {
        usage: Option<Usage>,
        stop_reason: Option<String>,
    },

    #[serde(rename = "error")]
    Error { kind: ProviderErrorKind },
}

/// Token usage for a completion (spec §4.9).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Provider error taxonomy (spec §4.3). Only `RateLimited` and
/// `NetworkTransient` are retryable by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Unauthorized { message: String },
    RateLimited {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_after_ms: Option<u64>,
    },
    NetworkTransient { message: String },
    BadRequest { message: String },
    ServerError { message: String },
    Cancelled,
}

impl ProviderErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderErrorKind::RateLimited { .. } | ProviderErrorKind::NetworkTransient { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rate_limited_and_network_are_retryable() {
        assert!(ProviderErrorKind::RateLimited { retry_after_ms: None }.is_retryable());
        assert!(ProviderErrorKind::NetworkTransient {
            message: "reset".into()
        }
        .is_retryable());
        assert!(!ProviderErrorKind::Unauthorized {
            message: "bad key".into()
        }
        .is_retryable());
        assert!(!ProviderErrorKind::Cancelled.is_retryable());
    }
}
