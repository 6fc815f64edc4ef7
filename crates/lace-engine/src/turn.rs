//! The turn engine (spec §4.6, C7): drives one agent turn through the
//! provider/tool loop state machine —
//! `idle → user_pending → thinking → streaming → tool_dispatch →
//! tool_running → streaming(loop) → completing → idle`, with `aborting`
//! and `error` reachable from any streaming/tool state.
//!
//! Structurally this follows `sa_gateway::runtime::turn::run_turn_inner`:
//! a bounded tool-call loop, a `tc_bufs` map assembling streamed tool-call
//! deltas by call ID, and `futures_util::future::join_all` for concurrent
//! tool dispatch. The retry/backoff and compaction trigger are new —
//! the teacher's provider never streams transient errors mid-turn.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use rand::Rng;
use uuid::Uuid;

use lace_providers::{ChatRequest, LlmProvider};
use lace_tools::ToolExecutor;
use lace_types::event::EventType;
use lace_types::session::SessionPolicy;
use lace_types::stream::{ProviderErrorKind, StreamEvent, Usage};
use lace_types::tool::{ContentBlock, Message, MessageContent, MessagePart, Role, ToolCall, ToolResult};
use lace_types::thread::Thread;

use crate::bus::{BusEvent, EventBus, TurnProgress};
use crate::cancel::{CancelMap, CancelToken};
use crate::error::{Error, Result};
use crate::thread_manager::ThreadManager;
use crate::tokens::CurrentTurnMetrics;

/// Retry/backoff parameters for transient provider errors (spec §4.6):
/// base 500ms, factor 2, jitter ±25%, capped at 30s, 5 attempts total.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub base_ms: u64,
    pub factor: f64,
    pub jitter: f64,
    pub cap_ms: u64,
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_ms: 500,
            factor: 2.0,
            jitter: 0.25,
            cap_ms: 30_000,
            max_attempts: 5,
        }
    }
}

fn compute_backoff(attempt: u32, cfg: &RetryConfig) -> Duration {
    let exp = cfg.base_ms as f64 * cfg.factor.powi(attempt.saturating_sub(1) as i32);
    let capped = exp.min(cfg.cap_ms as f64);
    let jitter_range = capped * cfg.jitter;
    let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
    Duration::from_millis((capped + jitter).max(0.0) as u64)
}

#[derive(Debug, Clone)]
pub struct TurnEngineConfig {
    pub retry: RetryConfig,
    /// Safety-net bound on tool-call loop iterations within one turn. The
    /// spec places no explicit cap; this mirrors the teacher's
    /// `MAX_TOOL_LOOPS` as a backstop against a runaway tool-calling
    /// model rather than a normal-path limit.
    pub max_tool_loops: usize,
    pub progress_interval: Duration,
}

impl Default for TurnEngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            max_tool_loops: 50,
            progress_interval: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub turn_id: String,
    /// The thread a caller should pass as `--continue` next. Equal to the
    /// thread the turn started on unless mid-turn compaction (spec §4.2)
    /// rolled it onto a new thread id.
    pub final_thread_id: String,
    pub final_text: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub retries: u32,
    pub aborted: bool,
}

pub struct TurnEngine {
    threads: Arc<ThreadManager>,
    tools: Arc<ToolExecutor>,
    cancels: Arc<CancelMap>,
    bus: EventBus,
    config: TurnEngineConfig,
}

impl TurnEngine {
    pub fn new(
        threads: Arc<ThreadManager>,
        tools: Arc<ToolExecutor>,
        cancels: Arc<CancelMap>,
        bus: EventBus,
        config: TurnEngineConfig,
    ) -> Self {
        Self {
            threads,
            tools,
            cancels,
            bus,
            config,
        }
    }

    /// Run one turn to completion: admits `user_text` as the turn's
    /// opening event, drives the provider/tool loop, and returns once the
    /// assistant produces a final response with no further tool calls, the
    /// turn is cancelled, or every retry attempt against the provider is
    /// exhausted.
    pub async fn run_turn(
        &self,
        thread_id: &str,
        user_text: impl Into<String>,
        provider: Arc<dyn LlmProvider>,
        model: Option<String>,
        policy: Arc<tokio::sync::Mutex<SessionPolicy>>,
    ) -> Result<TurnOutcome> {
        let turn_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let cancel_token = self.cancels.register(thread_id);
        let mut metrics = CurrentTurnMetrics::new(turn_id.clone());

        self.bus.publish(BusEvent::TurnStart {
            thread_id: thread_id.to_owned(),
            turn_id: turn_id.clone(),
        });

        self.threads
            .add_event(thread_id, EventType::UserMessage(user_text.into()))
            .await?;

        let tool_definitions = self.tools.registry().definitions();
        let context_window = provider.capabilities().context_window(
            model.as_deref().unwrap_or(&provider.capabilities().default_model),
        );

        let outcome = self
            .drive_loop(
                thread_id,
                &turn_id,
                provider,
                model,
                &tool_definitions,
                context_window,
                policy,
                &cancel_token,
                &mut metrics,
                started,
            )
            .await;

        self.cancels.remove(thread_id);
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive_loop(
        &self,
        thread_id: &str,
        turn_id: &str,
        provider: Arc<dyn LlmProvider>,
        model: Option<String>,
        tool_definitions: &[lace_types::tool::ToolDefinition],
        context_window: u32,
        policy: Arc<tokio::sync::Mutex<SessionPolicy>>,
        cancel_token: &CancelToken,
        metrics: &mut CurrentTurnMetrics,
        started: Instant,
    ) -> Result<TurnOutcome> {
        let mut active_thread_id = thread_id.to_owned();

        for _ in 0..self.config.max_tool_loops {
            if cancel_token.is_cancelled() {
                return self.abort_turn(&active_thread_id, turn_id, metrics, started).await;
            }

            if self.threads.needs_compaction(&active_thread_id, context_window).await? {
                self.bus.publish(BusEvent::TokenBudgetWarning {
                    thread_id: active_thread_id.clone(),
                    turn_id: turn_id.to_owned(),
                    estimated_tokens: crate::tokens::estimate_thread_prompt_tokens(
                        &self.threads.store().load_thread(&active_thread_id).await?,
                    ),
                });
                let compacted = self
                    .threads
                    .compact(&active_thread_id, "conversation compacted to stay within the model's context window")
                    .await?;
                self.bus.publish(BusEvent::ThreadCompacted {
                    thread_id: active_thread_id.clone(),
                    turn_id: turn_id.to_owned(),
                    new_thread_id: compacted.id.clone(),
                });
                active_thread_id = compacted.id;
            }

            let thread = self.threads.store().load_thread(&active_thread_id).await?;
            let messages = render_messages(&thread);

            let request = ChatRequest {
                messages,
                tools: tool_definitions.to_vec(),
                temperature: None,
                max_tokens: None,
                model: model.clone(),
            };

            self.bus.publish(BusEvent::StateChanged {
                thread_id: active_thread_id.clone(),
                turn_id: turn_id.to_owned(),
                state: "thinking".to_owned(),
            });

            let step = self
                .call_provider_with_retry(
                    &active_thread_id,
                    turn_id,
                    provider.as_ref(),
                    request,
                    cancel_token,
                    metrics,
                    started,
                )
                .await?;

            if cancel_token.is_cancelled() {
                return self.abort_turn(&active_thread_id, turn_id, metrics, started).await;
            }

            let StepResult { text, tool_calls, usage } = step;
            if let Some(usage) = &usage {
                metrics.record_usage(usage);
                self.bus.publish(BusEvent::Usage {
                    thread_id: active_thread_id.clone(),
                    turn_id: turn_id.to_owned(),
                    usage: *usage,
                });
            }

            if tool_calls.is_empty() {
                self.threads
                    .add_event(&active_thread_id, EventType::AgentMessage(text.clone()))
                    .await?;
                self.bus.publish(BusEvent::TurnComplete {
                    thread_id: active_thread_id.clone(),
                    turn_id: turn_id.to_owned(),
                    tokens_in: metrics.tokens_in,
                    tokens_out: metrics.tokens_out,
                    retries: metrics.retries,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });
                return Ok(TurnOutcome {
                    turn_id: turn_id.to_owned(),
                    final_thread_id: active_thread_id,
                    final_text: text,
                    tokens_in: metrics.tokens_in,
                    tokens_out: metrics.tokens_out,
                    retries: metrics.retries,
                    aborted: false,
                });
            }

            if !text.is_empty() {
                self.threads
                    .add_event(&active_thread_id, EventType::AgentMessage(text))
                    .await?;
            }

            for call in &tool_calls {
                self.threads
                    .add_event(
                        &active_thread_id,
                        EventType::ToolCall {
                            call_id: call.id.clone(),
                            name: call.name.clone(),
                            arguments: serde_json::Value::Object(call.arguments.clone()),
                        },
                    )
                    .await?;
                self.bus.publish(BusEvent::ToolCallStart {
                    thread_id: active_thread_id.clone(),
                    turn_id: turn_id.to_owned(),
                    call_id: call.id.clone(),
                    name: call.name.clone(),
                });
            }

            self.bus.publish(BusEvent::StateChanged {
                thread_id: active_thread_id.clone(),
                turn_id: turn_id.to_owned(),
                state: "tool_running".to_owned(),
            });
            self.bus.publish(BusEvent::TurnProgress(TurnProgress {
                turn_id: turn_id.to_owned(),
                elapsed_ms: started.elapsed().as_millis() as u64,
                tokens_in: metrics.tokens_in,
                tokens_out: metrics.tokens_out,
                current_tool: tool_calls.first().map(|c| c.name.clone()),
            }));

            let results = self
                .dispatch_tool_calls(tool_calls.clone(), policy.clone(), cancel_token)
                .await;
            for (call, result) in tool_calls.iter().zip(results.iter()) {
                self.bus.publish(BusEvent::ToolCallComplete {
                    thread_id: active_thread_id.clone(),
                    turn_id: turn_id.to_owned(),
                    call_id: result.id.clone(),
                    name: call.name.clone(),
                    is_error: result.is_error,
                });
                self.threads
                    .add_event(
                        &active_thread_id,
                        EventType::ToolResult {
                            call_id: result.id.clone(),
                            content: result.content.clone(),
                            is_error: result.is_error,
                            metadata: result.metadata.clone(),
                        },
                    )
                    .await?;
            }

            if cancel_token.is_cancelled() {
                return self.abort_turn(&active_thread_id, turn_id, metrics, started).await;
            }
        }

        Err(Error::ProviderFatal(format!(
            "turn {turn_id} exceeded the tool-call loop bound"
        )))
    }

    /// Spec §4.4/§3.2: tool calls run concurrently unless a
    /// `destructiveHint` tool is in the batch, in which case it and every
    /// call after it (in request order) run serially. Policy mutations
    /// (an `ALLOW_SESSION` approval upgrade) are applied to a private
    /// snapshot per call and merged back afterward — upgrades are
    /// idempotent inserts, so merge order across concurrent calls doesn't
    /// matter.
    async fn dispatch_tool_calls(
        &self,
        calls: Vec<ToolCall>,
        policy: Arc<tokio::sync::Mutex<SessionPolicy>>,
        cancel_token: &CancelToken,
    ) -> Vec<ToolResult> {
        let split = self.first_destructive_index(&calls).await;
        let (concurrent, serial) = calls.split_at(split);

        let mut results = Vec::with_capacity(concurrent.len() + serial.len());

        let concurrent_futures = concurrent
            .iter()
            .cloned()
            .map(|call| self.execute_with_shared_policy(call, policy.clone(), cancel_token));
        results.extend(futures_util::future::join_all(concurrent_futures).await);

        for call in serial {
            results.push(
                self.execute_with_shared_policy(call.clone(), policy.clone(), cancel_token)
                    .await,
            );
        }

        results
    }

    async fn first_destructive_index(&self, calls: &[ToolCall]) -> usize {
        for (idx, call) in calls.iter().enumerate() {
            if let Ok(tool) = self.tools.registry().get(&call.name) {
                if tool.definition().annotations.is_destructive() {
                    return idx;
                }
            }
        }
        calls.len()
    }

    async fn execute_with_shared_policy(
        &self,
        call: ToolCall,
        policy: Arc<tokio::sync::Mutex<SessionPolicy>>,
        cancel_token: &CancelToken,
    ) -> ToolResult {
        let mut snapshot = policy.lock().await.clone();
        let result = self.tools.execute(&call, &mut snapshot, cancel_token).await;
        let mut shared = policy.lock().await;
        shared.tool_policy.extend(snapshot.tool_policy);
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn call_provider_with_retry(
        &self,
        thread_id: &str,
        turn_id: &str,
        provider: &dyn LlmProvider,
        request: ChatRequest,
        cancel_token: &CancelToken,
        metrics: &mut CurrentTurnMetrics,
        started: Instant,
    ) -> Result<StepResult> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self
                .stream_once(thread_id, turn_id, provider, request.clone(), cancel_token, &*metrics, started)
                .await
            {
                Ok(step) => return Ok(step),
                Err(kind) if kind.is_retryable() && attempt < self.config.retry.max_attempts => {
                    metrics.retries += 1;
                    let backoff = compute_backoff(attempt, &self.config.retry);
                    self.bus.publish(BusEvent::RetryAttempt {
                        thread_id: thread_id.to_owned(),
                        turn_id: turn_id.to_owned(),
                        attempt,
                        backoff_ms: backoff.as_millis() as u64,
                    });
                    tokio::time::sleep(backoff).await;
                }
                Err(kind) => {
                    self.bus.publish(BusEvent::Error {
                        thread_id: thread_id.to_owned(),
                        turn_id: Some(turn_id.to_owned()),
                        kind: kind.clone(),
                    });
                    return Err(Error::ProviderFatal(format!("{kind:?}")));
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn stream_once(
        &self,
        thread_id: &str,
        turn_id: &str,
        provider: &dyn LlmProvider,
        request: ChatRequest,
        cancel_token: &CancelToken,
        metrics: &CurrentTurnMetrics,
        started: Instant,
    ) -> std::result::Result<StepResult, ProviderErrorKind> {
        let mut stream = provider
            .stream_response(request)
            .await
            .map_err(|e| ProviderErrorKind::NetworkTransient { message: e.to_string() })?;

        let mut text = String::new();
        let mut tc_bufs: HashMap<String, (String, String)> = HashMap::new();
        let mut tool_order: Vec<String> = Vec::new();
        let mut usage = None;
        let mut last_progress = Instant::now();
        let mut thinking_complete_emitted = false;

        self.bus.publish(BusEvent::StateChanged {
            thread_id: thread_id.to_owned(),
            turn_id: turn_id.to_owned(),
            state: "streaming".to_owned(),
        });

        while let Some(event) = stream.next().await {
            if cancel_token.is_cancelled() {
                break;
            }

            if !thinking_complete_emitted {
                thinking_complete_emitted = true;
                self.bus.publish(BusEvent::AgentThinkingComplete {
                    thread_id: thread_id.to_owned(),
                    turn_id: turn_id.to_owned(),
                });
            }

            match event {
                Ok(StreamEvent::Token { text: delta }) => {
                    text.push_str(&delta);
                    self.bus.publish(BusEvent::AgentToken {
                        thread_id: thread_id.to_owned(),
                        turn_id: turn_id.to_owned(),
                        text: delta,
                    });
                }
                Ok(StreamEvent::ToolUseStart { call_id, name }) => {
                    tool_order.push(call_id.clone());
                    tc_bufs.insert(call_id, (name, String::new()));
                }
                Ok(StreamEvent::ToolInputDelta { call_id, partial_json }) => {
                    if let Some((_, buf)) = tc_bufs.get_mut(&call_id) {
                        buf.push_str(&partial_json);
                    }
                }
                Ok(StreamEvent::ToolUseComplete { call_id, name, input }) => {
                    tc_bufs.insert(call_id, (name, input.to_string()));
                }
                Ok(StreamEvent::MessageStop { usage: u, .. }) => {
                    usage = u;
                }
                Ok(StreamEvent::Error { kind }) => {
                    if kind.is_retryable() {
                        return Err(kind);
                    }
                    return Err(kind);
                }
                Err(e) => {
                    return Err(ProviderErrorKind::NetworkTransient { message: e.to_string() });
                }
            }

            if last_progress.elapsed() >= self.config.progress_interval {
                last_progress = Instant::now();
                self.bus.publish(BusEvent::TurnProgress(TurnProgress {
                    turn_id: turn_id.to_owned(),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    tokens_in: metrics.tokens_in,
                    tokens_out: metrics.tokens_out + crate::tokens::estimate(&text),
                    current_tool: tool_order.last().and_then(|id| tc_bufs.get(id)).map(|(name, _)| name.clone()),
                }));
            }
        }

        let tool_calls = tool_order
            .into_iter()
            .filter_map(|call_id| {
                let (name, raw) = tc_bufs.remove(&call_id)?;
                let arguments = serde_json::from_str::<serde_json::Value>(&raw)
                    .unwrap_or(serde_json::Value::Object(Default::default()));
                Some(ToolCall {
                    id: call_id,
                    name,
                    arguments: arguments.as_object().cloned().unwrap_or_default(),
                })
            })
            .collect();

        Ok(StepResult { text, tool_calls, usage })
    }

    /// Persist a synthetic abort marker and synthetic `TOOL_RESULT`s for
    /// any dangling `TOOL_CALL`s, then emit `TurnAborted` (spec §4.6
    /// cancellation reconciliation).
    async fn abort_turn(
        &self,
        active_thread_id: &str,
        turn_id: &str,
        metrics: &CurrentTurnMetrics,
        started: Instant,
    ) -> Result<TurnOutcome> {
        let thread = self.threads.store().load_thread(active_thread_id).await?;
        for call_id in dangling_tool_call_ids(&thread) {
            self.threads
                .add_event(
                    active_thread_id,
                    EventType::ToolResult {
                        call_id,
                        content: vec![ContentBlock::text("aborted")],
                        is_error: true,
                        metadata: None,
                    },
                )
                .await?;
        }

        self.threads
            .add_event(active_thread_id, EventType::AgentMessage("[turn aborted]".to_owned()))
            .await?;

        self.bus.publish(BusEvent::TurnAborted {
            thread_id: active_thread_id.to_owned(),
            turn_id: turn_id.to_owned(),
            kind: "cancelled".to_owned(),
            tokens_in: metrics.tokens_in,
            tokens_out: metrics.tokens_out,
            elapsed_ms: started.elapsed().as_millis() as u64,
        });

        Ok(TurnOutcome {
            turn_id: turn_id.to_owned(),
            final_thread_id: active_thread_id.to_owned(),
            final_text: String::new(),
            tokens_in: metrics.tokens_in,
            tokens_out: metrics.tokens_out,
            retries: metrics.retries,
            aborted: true,
        })
    }
}

struct StepResult {
    text: String,
    tool_calls: Vec<ToolCall>,
    usage: Option<Usage>,
}

fn dangling_tool_call_ids(thread: &Thread) -> Vec<String> {
    let mut pending = Vec::new();
    for event in thread.current_turn() {
        match &event.data {
            EventType::ToolCall { call_id, .. } => pending.push(call_id.clone()),
            EventType::ToolResult { call_id, .. } => pending.retain(|id| id != call_id),
            _ => {}
        }
    }
    pending
}

/// Render a thread's event log into the `Vec<Message>` shape a provider
/// expects (spec §4.3). A turn is rendered fresh from the log before every
/// provider call rather than kept as separate mutable state.
fn render_messages(thread: &Thread) -> Vec<Message> {
    let mut messages = Vec::with_capacity(thread.events.len());
    for event in &thread.events {
        match &event.data {
            EventType::UserMessage(text) => messages.push(Message::user(text.clone())),
            EventType::AgentMessage(text) => {
                if !text.is_empty() {
                    messages.push(Message::assistant(text.clone()));
                }
            }
            EventType::SystemMessage(text) => messages.push(Message::system(text.clone())),
            EventType::Compaction { summary, .. } => messages.push(Message::system(summary.clone())),
            EventType::ToolCall { call_id, name, arguments } => {
                messages.push(Message {
                    role: Role::Assistant,
                    content: MessageContent::Parts(vec![MessagePart::ToolUse {
                        id: call_id.clone(),
                        name: name.clone(),
                        input: arguments.clone(),
                    }]),
                });
            }
            EventType::ToolResult { call_id, content, is_error, .. } => {
                let text = content.iter().map(|b| b.as_text()).collect::<Vec<_>>().join("\n");
                messages.push(Message {
                    role: Role::Tool,
                    content: MessageContent::Parts(vec![MessagePart::ToolResult {
                        tool_use_id: call_id.clone(),
                        content: text,
                        is_error: *is_error,
                    }]),
                });
            }
            EventType::AgentToken(_) | EventType::Unknown { .. } => {}
        }
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_geometrically_and_respects_cap() {
        let cfg = RetryConfig::default();
        for attempt in 1..=5 {
            let d = compute_backoff(attempt, &cfg);
            assert!(d.as_millis() as u64 <= cfg.cap_ms + (cfg.cap_ms as f64 * cfg.jitter) as u64);
        }
    }

    #[test]
    fn render_messages_skips_empty_agent_message_and_bus_only_events() {
        let thread = Thread {
            id: "lace_20260726_abcdef".into(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            parent_thread_id: None,
            compaction_of_thread_id: None,
            events: vec![
                lace_types::event::Event {
                    event_id: 1,
                    thread_id: "lace_20260726_abcdef".into(),
                    timestamp: chrono::Utc::now(),
                    data: EventType::UserMessage("hi".into()),
                },
                lace_types::event::Event {
                    event_id: 2,
                    thread_id: "lace_20260726_abcdef".into(),
                    timestamp: chrono::Utc::now(),
                    data: EventType::AgentToken("tok".into()),
                },
                lace_types::event::Event {
                    event_id: 3,
                    thread_id: "lace_20260726_abcdef".into(),
                    timestamp: chrono::Utc::now(),
                    data: EventType::AgentMessage(String::new()),
                },
            ],
        };
        let messages = render_messages(&thread);
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn dangling_tool_call_ids_finds_unresolved_calls() {
        let thread = Thread {
            id: "lace_20260726_abcdef".into(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            parent_thread_id: None,
            compaction_of_thread_id: None,
            events: vec![
                lace_types::event::Event {
                    event_id: 1,
                    thread_id: "lace_20260726_abcdef".into(),
                    timestamp: chrono::Utc::now(),
                    data: EventType::UserMessage("hi".into()),
                },
                lace_types::event::Event {
                    event_id: 2,
                    thread_id: "lace_20260726_abcdef".into(),
                    timestamp: chrono::Utc::now(),
                    data: EventType::ToolCall {
                        call_id: "c1".into(),
                        name: "exec".into(),
                        arguments: serde_json::json!({}),
                    },
                },
            ],
        };
        assert_eq!(dangling_tool_call_ids(&thread), vec!["c1".to_string()]);
    }
}
