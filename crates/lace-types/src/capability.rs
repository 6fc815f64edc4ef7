//! Provider capability description (spec §4.3).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// What a provider adapter can do, and what its models cost in context
/// (spec §4.3: `{ createResponse, streamResponse?, countTokens?,
/// providerName, defaultModel, contextWindow(model) }`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    pub provider_name: String,
    pub default_model: String,
    pub supports_streaming: bool,
    pub supports_tools: bool,
    /// Per-model context window sizes, in tokens. `context_window` falls
    /// back to `default_context_window` for models not listed here.
    #[serde(default)]
    pub context_windows: HashMap<String, u32>,
    pub default_context_window: u32,
}

impl ProviderCapabilities {
    /// `contextWindow(model)` from spec §4.3.
    pub fn context_window(&self, model: &str) -> u32 {
        self.context_windows
            .get(model)
            .copied()
            .unwrap_or(self.default_context_window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_window_falls_back_to_default() {
        let caps = ProviderCapabilities {
            provider_name: "openai_compat".into(),
            default_model: "gpt-4o-mini".into(),
            supports_streaming: true,
            supports_tools: true,
            context_windows: HashMap::from([("gpt-4o".into(), 128_000)]),
            default_context_window: 8_000,
        };
        assert_eq!(caps.context_window("gpt-4o"), 128_000);
        assert_eq!(caps.context_window("unknown-model"), 8_000);
    }
}
