//! OpenAI-compatible HTTP adapter (spec §4.3).
//!
//! Targets any endpoint speaking the OpenAI chat completions wire format:
//! OpenAI itself, Ollama, vLLM, LM Studio, Together, and friends. Auth is a
//! single bearer token read from an environment variable named in config —
//! no keychain, no OAuth, no Azure deployment-URL branching.

use std::collections::BTreeMap;

use serde_json::Value;

use lace_types::capability::ProviderCapabilities;
use lace_types::config::ProviderConfig;
use lace_types::stream::{ProviderErrorKind, StreamEvent, Usage};
use lace_types::tool::{Message, MessageContent, MessagePart, Role, ToolCall, ToolDefinition};
use lace_types::{Error, Result};

use crate::traits::{ChatRequest, ChatResponse, LlmProvider};
use crate::util::from_reqwest;

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    capabilities: ProviderCapabilities,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Build a provider from a single configured entry. The API key is read
    /// from `cfg.api_key_env` eagerly, so a missing key fails at startup
    /// rather than on the first request.
    pub fn from_config(cfg: &ProviderConfig) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env).map_err(|_| {
            Error::Config(format!(
                "provider {:?} references unset env var {:?}",
                cfg.name, cfg.api_key_env
            ))
        })?;

        let mut context_windows = std::collections::HashMap::new();
        context_windows.insert(cfg.default_model.clone(), 128_000);

        let capabilities = ProviderCapabilities {
            provider_name: cfg.name.clone(),
            default_model: cfg.default_model.clone(),
            supports_streaming: true,
            supports_tools: true,
            context_windows,
            default_context_window: 128_000,
        };

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: cfg.name.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            default_model: cfg.default_model.clone(),
            capabilities,
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
    }

    fn effective_model(&self, req: &ChatRequest) -> String {
        req.model.clone().unwrap_or_else(|| self.default_model.clone())
    }

    fn build_chat_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();

        let mut body = serde_json::json!({
            "model": self.effective_model(req),
            "messages": messages,
            "stream": stream,
        });

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_openai).collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }
}

// ── Message serialization ───────────────────────────────────────────

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn msg_to_openai(msg: &Message) -> Value {
    match msg.role {
        Role::Tool => tool_result_to_openai(msg),
        Role::Assistant => assistant_to_openai(msg),
        _ => serde_json::json!({
            "role": role_to_str(msg.role),
            "content": msg.content.extract_all_text(),
        }),
    }
}

fn assistant_to_openai(msg: &Message) -> Value {
    let mut obj = serde_json::json!({"role": "assistant"});
    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();

    match &msg.content {
        MessageContent::Text(t) => text_parts.push(t.as_str()),
        MessageContent::Parts(parts) => {
            for part in parts {
                match part {
                    MessagePart::Text { text } => text_parts.push(text.as_str()),
                    MessagePart::ToolUse { id, name, input } => {
                        tool_calls.push(serde_json::json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": input.to_string(),
                            }
                        }));
                    }
                    MessagePart::ToolResult { .. } => {}
                }
            }
        }
    }

    obj["content"] = if text_parts.is_empty() {
        Value::Null
    } else {
        Value::String(text_parts.join("\n"))
    };
    if !tool_calls.is_empty() {
        obj["tool_calls"] = Value::Array(tool_calls);
    }
    obj
}

fn tool_result_to_openai(msg: &Message) -> Value {
    match &msg.content {
        MessageContent::Parts(parts) => {
            for part in parts {
                if let MessagePart::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } = part
                {
                    return serde_json::json!({
                        "role": "tool",
                        "tool_call_id": tool_use_id,
                        "content": content,
                    });
                }
            }
            serde_json::json!({"role": "tool", "tool_call_id": "", "content": ""})
        }
        MessageContent::Text(t) => serde_json::json!({
            "role": "tool",
            "tool_call_id": "",
            "content": t,
        }),
    }
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.input_schema,
        }
    })
}

// ── Response deserialization ─────────────────────────────────────────

fn provider_error(provider: &str, message: impl Into<String>) -> Error {
    Error::ProviderFatal(format!("{provider}: {}", message.into()))
}

fn parse_chat_response(provider: &str, body: &Value) -> Result<ChatResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| provider_error(provider, "no choices in response"))?;

    let message = choice
        .get("message")
        .ok_or_else(|| provider_error(provider, "no message in choice"))?;

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let stop_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .map(String::from);

    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let tool_calls = parse_openai_tool_calls(message);
    let usage = body.get("usage").and_then(parse_openai_usage);

    Ok(ChatResponse {
        content,
        tool_calls,
        usage,
        model,
        stop_reason,
    })
}

fn parse_openai_tool_calls(message: &Value) -> Vec<ToolCall> {
    let arr = match message.get("tool_calls").and_then(|v| v.as_array()) {
        Some(a) => a,
        None => return Vec::new(),
    };
    arr.iter()
        .filter_map(|tc| {
            let id = tc.get("id")?.as_str()?.to_string();
            let func = tc.get("function")?;
            let name = func.get("name")?.as_str()?.to_string();
            let args_str = func.get("arguments")?.as_str().unwrap_or("{}");
            let arguments = parse_tool_arguments(args_str);
            Some(ToolCall { id, name, arguments })
        })
        .collect()
}

fn parse_tool_arguments(raw: &str) -> serde_json::Map<String, Value> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    }
}

fn parse_openai_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        completion_tokens: v.get("completion_tokens")?.as_u64()? as u32,
        total_tokens: v.get("total_tokens")?.as_u64()? as u32,
    })
}

// ── SSE streaming ─────────────────────────────────────────────────────
//
// OpenAI streams tool-call arguments as incremental JSON fragments, one
// per `index`. We buffer each index's fragments until `finish_reason`
// arrives, then emit `tool_use_start` (on first sight), `tool_input_delta`
// (per fragment), and `tool_use_complete` (once the full arguments string
// parses).

#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    args_buf: String,
    started: bool,
}

/// Build the stateful per-stream parser closure. A fresh instance of the
/// pending-call table is captured per `stream_response` call.
fn make_sse_parser() -> impl FnMut(&str) -> Vec<Result<StreamEvent>> + Send + 'static {
    let mut pending: BTreeMap<u64, PendingToolCall> = BTreeMap::new();

    move |data: &str| -> Vec<Result<StreamEvent>> {
        if data.trim() == "[DONE]" {
            return Vec::new();
        }

        let v: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => return vec![Err(Error::Json(e))],
        };

        let choice = v
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first());

        let choice = match choice {
            Some(c) => c,
            None => {
                // usage-only chunk from stream_options.include_usage
                if let Some(usage) = v.get("usage").and_then(parse_openai_usage) {
                    return vec![Ok(StreamEvent::MessageStop {
                        usage: Some(usage),
                        stop_reason: None,
                    })];
                }
                return Vec::new();
            }
        };

        let delta = choice.get("delta").unwrap_or(&Value::Null);
        let mut events = Vec::new();

        if let Some(tc_arr) = delta.get("tool_calls").and_then(|v| v.as_array()) {
            for tc in tc_arr {
                let index = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
                let entry = pending.entry(index).or_default();

                if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
                    entry.id = id.to_string();
                }
                if let Some(name) = tc
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(|v| v.as_str())
                {
                    entry.name = name.to_string();
                }
                if !entry.started && !entry.id.is_empty() && !entry.name.is_empty() {
                    entry.started = true;
                    events.push(Ok(StreamEvent::ToolUseStart {
                        call_id: entry.id.clone(),
                        name: entry.name.clone(),
                    }));
                }
                if let Some(args) = tc
                    .get("function")
                    .and_then(|f| f.get("arguments"))
                    .and_then(|v| v.as_str())
                {
                    if !args.is_empty() {
                        entry.args_buf.push_str(args);
                        events.push(Ok(StreamEvent::ToolInputDelta {
                            call_id: entry.id.clone(),
                            partial_json: args.to_string(),
                        }));
                    }
                }
            }
        }

        if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                events.push(Ok(StreamEvent::Token { text: text.to_string() }));
            }
        }

        if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
            for (_, call) in std::mem::take(&mut pending) {
                let input = serde_json::from_str(&call.args_buf).unwrap_or(Value::Object(
                    serde_json::Map::new(),
                ));
                events.push(Ok(StreamEvent::ToolUseComplete {
                    call_id: call.id,
                    name: call.name,
                    input,
                }));
            }
            let usage = v.get("usage").and_then(parse_openai_usage);
            events.push(Ok(StreamEvent::MessageStop {
                usage,
                stop_reason: Some(fr.to_string()),
            }));
        }

        events
    }
}

// ── Trait implementation ──────────────────────────────────────────────

#[async_trait::async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn create_response(&self, req: ChatRequest) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(&req, false);

        tracing::debug!(provider = %self.id, %url, "openai_compat chat request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let resp_text = resp.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            return Err(classify_http_error(&self.id, status.as_u16(), &resp_text));
        }

        let resp_json: Value = serde_json::from_str(&resp_text)?;
        parse_chat_response(&self.id, &resp_json)
    }

    async fn stream_response(
        &self,
        req: ChatRequest,
    ) -> Result<lace_types::stream::BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(&req, true);
        let provider_id = self.id.clone();

        tracing::debug!(provider = %self.id, %url, "openai_compat stream request");

        let resp = self
            .authed_post(&url)
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.map_err(from_reqwest)?;
            return Err(classify_http_error(&provider_id, status.as_u16(), &err_text));
        }

        Ok(crate::sse::sse_response_stream(resp, make_sse_parser()))
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

fn classify_http_error(provider: &str, status: u16, body: &str) -> Error {
    let kind = match status {
        401 | 403 => ProviderErrorKind::Unauthorized {
            message: body.to_string(),
        },
        429 => ProviderErrorKind::RateLimited {
            retry_after_ms: None,
        },
        500..=599 => ProviderErrorKind::ServerError {
            message: body.to_string(),
        },
        _ => ProviderErrorKind::BadRequest {
            message: format!("HTTP {status} - {body}"),
        },
    };
    if kind.is_retryable() {
        Error::ProviderTransient(format!("{provider}: HTTP {status} - {body}"))
    } else {
        Error::ProviderFatal(format!("{provider}: HTTP {status} - {body}"))
    }
}
