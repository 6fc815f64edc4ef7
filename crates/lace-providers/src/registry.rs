//! Provider registry: constructs and holds every configured LLM adapter.
//!
//! At startup the registry walks `Config.providers`, builds one
//! [`OpenAiCompatProvider`] per entry, and records — rather than aborts on —
//! any that fail to initialize (typically a missing API key env var), so a
//! misconfigured secondary provider doesn't stop a session from booting
//! against the default one.

use std::collections::HashMap;
use std::sync::Arc;

use lace_types::config::Config;
use lace_types::{Error, Result};

use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::LlmProvider;

pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    default_provider: String,
    init_errors: Vec<ProviderInitError>,
}

/// Records a provider that failed to initialize, with secrets masked out
/// of the error message before it's logged or surfaced anywhere.
#[derive(Debug, Clone)]
pub struct ProviderInitError {
    pub provider_name: String,
    pub error: String,
}

/// Mask substrings in an error message that look like API keys or bearer
/// tokens, so a misconfigured plaintext secret never reaches logs.
fn mask_secrets(msg: &str) -> String {
    let mut result = msg.to_string();
    for word in msg.split(|c: char| c.is_whitespace() || c == '\'' || c == '"' || c == ',') {
        let trimmed = word.trim();
        if trimmed.len() >= 20
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            let masked = if trimmed.len() > 8 {
                format!("{}...{}", &trimmed[..4], &trimmed[trimmed.len() - 4..])
            } else {
                "***masked***".to_string()
            };
            result = result.replace(trimmed, &masked);
        }
    }
    result
}

impl ProviderRegistry {
    /// Build the registry from the application's [`Config`].
    ///
    /// Every entry is instantiated eagerly (env vars are read now, not on
    /// first request). If the entry named by `config.default_provider`
    /// fails to initialize, the whole registry fails to build — there is
    /// no provider left to run a turn against.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        let mut init_errors = Vec::new();

        for pc in &config.providers {
            match OpenAiCompatProvider::from_config(pc) {
                Ok(provider) => {
                    tracing::info!(provider = %pc.name, "registered LLM provider");
                    providers.insert(pc.name.clone(), Arc::new(provider) as Arc<dyn LlmProvider>);
                }
                Err(e) => {
                    let safe_error = mask_secrets(&e.to_string());
                    tracing::warn!(
                        provider = %pc.name,
                        error = %safe_error,
                        "failed to initialize LLM provider, skipping"
                    );
                    init_errors.push(ProviderInitError {
                        provider_name: pc.name.clone(),
                        error: safe_error,
                    });
                }
            }
        }

        if !providers.contains_key(&config.default_provider) {
            return Err(Error::Config(format!(
                "default provider {:?} failed to initialize or is not configured",
                config.default_provider
            )));
        }

        Ok(Self {
            providers,
            default_provider: config.default_provider.clone(),
            init_errors,
        })
    }

    pub fn get(&self, provider_name: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(provider_name).cloned()
    }

    pub fn default(&self) -> Arc<dyn LlmProvider> {
        self.providers
            .get(&self.default_provider)
            .cloned()
            .expect("from_config guarantees the default provider is present")
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn list_providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Provider initialization errors (empty if all configured providers
    /// came up cleanly).
    pub fn init_errors(&self) -> &[ProviderInitError] {
        &self.init_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_one_bad_provider() -> Config {
        let raw = r#"
            default_provider = "primary"

            [[providers]]
            name = "primary"
            base_url = "https://api.example.com/v1"
            default_model = "gpt-4o-mini"
            api_key_env = "LACE_TEST_PRIMARY_KEY"

            [[providers]]
            name = "secondary"
            base_url = "https://other.example.com/v1"
            default_model = "some-model"
            api_key_env = "LACE_TEST_UNSET_SECONDARY_KEY_ABC"
        "#;
        Config::from_toml_str(raw).unwrap()
    }

    #[test]
    fn secondary_provider_failure_is_recorded_not_fatal() {
        std::env::set_var("LACE_TEST_PRIMARY_KEY", "sk-test-key-value");
        std::env::remove_var("LACE_TEST_UNSET_SECONDARY_KEY_ABC");
        let config = config_with_one_bad_provider();
        let registry = ProviderRegistry::from_config(&config).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.init_errors().len(), 1);
        std::env::remove_var("LACE_TEST_PRIMARY_KEY");
    }

    #[test]
    fn missing_default_provider_key_is_fatal() {
        std::env::remove_var("LACE_TEST_PRIMARY_KEY");
        std::env::remove_var("LACE_TEST_UNSET_SECONDARY_KEY_ABC");
        let config = config_with_one_bad_provider();
        assert!(ProviderRegistry::from_config(&config).is_err());
    }

    #[test]
    fn mask_secrets_redacts_long_token_like_substrings() {
        let msg = "request failed with key sk-aaaaaaaaaaaaaaaaaaaaaaaa rejected";
        let masked = mask_secrets(msg);
        assert!(!masked.contains("sk-aaaaaaaaaaaaaaaaaaaaaaaa"));
    }
}
