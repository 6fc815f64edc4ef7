//! The provider abstraction (spec §4.3): a capability set plus a request/
//! response pair the turn engine drives without caring which backend answers.

use lace_types::capability::ProviderCapabilities;
use lace_types::stream::{BoxStream, StreamEvent, Usage};
use lace_types::tool::{Message, ToolCall, ToolDefinition};
use lace_types::Result;

/// `{ messages[], tools[], maxTokens, temperature, signal }` (spec §4.3).
///
/// `signal` is the caller's cancellation token — modeled as a `tokio`
/// `CancellationToken` would require a new workspace dependency, so callers
/// instead drop the future returned by [`LlmProvider::create_response`] /
/// stop polling the stream to cancel; adapters must not rely on a separate
/// cancel channel.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub model: Option<String>,
}

/// `{ content, toolCalls, usage, stopReason }` (spec §4.3).
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
    pub model: String,
    pub stop_reason: Option<String>,
}

/// Every LLM backend the turn engine can drive implements this trait.
///
/// `create_response` is the only method every provider must support;
/// `stream_response` defaults to wrapping it in a single `message_stop`
/// chunk for providers that cannot stream (spec §4.3: "Providers that do
/// not support streaming are adapted by emitting a single `message_stop`
/// after one `createResponse`").
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    async fn create_response(&self, req: ChatRequest) -> Result<ChatResponse>;

    async fn stream_response(
        &self,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let resp = self.create_response(req).await?;
        let chunks = vec![
            Ok(StreamEvent::Token { text: resp.content }),
            Ok(StreamEvent::MessageStop {
                usage: resp.usage,
                stop_reason: resp.stop_reason,
            }),
        ];
        Ok(Box::pin(single_shot_stream(chunks)))
    }

    /// Best-effort local token count for `text`, when the provider exposes
    /// its own tokenizer. `None` falls back to the engine's estimator (C10).
    fn count_tokens(&self, _text: &str) -> Option<u32> {
        None
    }

    fn capabilities(&self) -> &ProviderCapabilities;

    fn provider_id(&self) -> &str;
}

fn single_shot_stream<T: Send + 'static>(items: Vec<T>) -> impl futures_core::Stream<Item = T> {
    async_stream::stream! {
        for item in items {
            yield item;
        }
    }
}
