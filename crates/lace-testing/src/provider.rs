//! A scripted [`LlmProvider`] for driving the turn engine deterministically
//! in tests: each call to `stream_response` pops the next queued
//! [`ScriptedTurn`] and emits it as a `StreamEvent` sequence, rather than
//! going through the default non-streaming wrapper (which would drop
//! `tool_calls` on the floor — the turn engine only looks at stream
//! events, never at `ChatResponse.tool_calls`).

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde_json::Value;

use lace_providers::{ChatRequest, ChatResponse, LlmProvider};
use lace_types::capability::ProviderCapabilities;
use lace_types::stream::{BoxStream, ProviderErrorKind, StreamEvent, Usage};
use lace_types::tool::ToolCall;
use lace_types::{Error, Result};

/// One scripted provider response.
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    /// A final assistant message with no tool calls — ends the turn.
    Final { text: String, usage: Usage },
    /// The assistant requests one or more tool calls.
    ToolCall { calls: Vec<ToolCall>, usage: Usage },
    /// The provider fails with the given error kind for this step.
    Error(ProviderErrorKind),
}

impl ScriptedTurn {
    pub fn final_text(text: impl Into<String>) -> Self {
        ScriptedTurn::Final {
            text: text.into(),
            usage: Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
        }
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        ScriptedTurn::ToolCall {
            calls: vec![ToolCall {
                id: id.into(),
                name: name.into(),
                arguments: arguments.as_object().cloned().unwrap_or_default(),
            }],
            usage: Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
        }
    }
}

pub struct ScriptedProvider {
    capabilities: ProviderCapabilities,
    turns: Mutex<VecDeque<ScriptedTurn>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            capabilities: ProviderCapabilities {
                provider_name: "scripted".into(),
                default_model: "scripted-model".into(),
                supports_streaming: true,
                supports_tools: true,
                context_windows: Default::default(),
                default_context_window: 128_000,
            },
            turns: Mutex::new(turns.into_iter().collect()),
        }
    }

    pub fn with_context_window(mut self, window: u32) -> Self {
        self.capabilities.default_context_window = window;
        self
    }

    fn next_turn(&self) -> ScriptedTurn {
        self.turns
            .lock()
            .pop_front()
            .unwrap_or_else(|| ScriptedTurn::final_text("(scripted turns exhausted)"))
    }
}

#[async_trait::async_trait]
impl LlmProvider for ScriptedProvider {
    async fn create_response(&self, _req: ChatRequest) -> Result<ChatResponse> {
        match self.next_turn() {
            ScriptedTurn::Final { text, usage } => Ok(ChatResponse {
                content: text,
                tool_calls: vec![],
                usage: Some(usage),
                model: self.capabilities.default_model.clone(),
                stop_reason: Some("stop".into()),
            }),
            ScriptedTurn::ToolCall { calls, usage } => Ok(ChatResponse {
                content: String::new(),
                tool_calls: calls,
                usage: Some(usage),
                model: self.capabilities.default_model.clone(),
                stop_reason: Some("tool_calls".into()),
            }),
            ScriptedTurn::Error(kind) => Err(to_error(kind)),
        }
    }

    async fn stream_response(&self, _req: ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let turn = self.next_turn();
        let events: Vec<Result<StreamEvent>> = match turn {
            ScriptedTurn::Final { text, usage } => vec![
                Ok(StreamEvent::Token { text }),
                Ok(StreamEvent::MessageStop {
                    usage: Some(usage),
                    stop_reason: Some("stop".into()),
                }),
            ],
            ScriptedTurn::ToolCall { calls, usage } => {
                let mut events = Vec::new();
                for call in &calls {
                    events.push(Ok(StreamEvent::ToolUseStart {
                        call_id: call.id.clone(),
                        name: call.name.clone(),
                    }));
                    events.push(Ok(StreamEvent::ToolUseComplete {
                        call_id: call.id.clone(),
                        name: call.name.clone(),
                        input: Value::Object(call.arguments.clone()),
                    }));
                }
                events.push(Ok(StreamEvent::MessageStop {
                    usage: Some(usage),
                    stop_reason: Some("tool_calls".into()),
                }));
                events
            }
            ScriptedTurn::Error(kind) => vec![Ok(StreamEvent::Error { kind })],
        };

        Ok(Box::pin(async_stream::stream! {
            for event in events {
                yield event;
            }
        }))
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }
}

fn to_error(kind: ProviderErrorKind) -> Error {
    match kind {
        ProviderErrorKind::RateLimited { .. } | ProviderErrorKind::NetworkTransient { .. } => {
            Error::ProviderTransient(format!("{kind:?}"))
        }
        other => Error::ProviderFatal(format!("{other:?}")),
    }
}
