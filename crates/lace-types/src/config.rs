//! Runtime configuration (SPEC_FULL.md Ambient stack / Configuration).
//!
//! Loaded from TOML; `LACE_DB_PATH` and `LACE_TEST_MODE` (spec §6.4) are
//! applied as environment overrides by `lace-cli` after file load, not here.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_store_path() -> PathBuf {
    PathBuf::from("./lace.db")
}

fn default_compaction_tail_turns() -> u32 {
    5
}

fn default_delegation_depth_limit() -> u32 {
    3
}

fn default_token_budget_fraction() -> f64 {
    0.8
}

fn default_shell_timeout_secs() -> u64 {
    60
}

fn default_tool_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    pub default_model: String,
    /// Name of the environment variable holding the API key; never the
    /// key itself (spec: provider auth is a bare env var, no credential
    /// store).
    pub api_key_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    pub providers: Vec<ProviderConfig>,

    /// Which entry in `providers` is used when none is named explicitly.
    pub default_provider: String,

    #[serde(default)]
    pub session_policy_seed: HashMap<String, String>,

    #[serde(default = "default_token_budget_fraction")]
    pub token_budget_fraction: f64,

    #[serde(default = "default_compaction_tail_turns")]
    pub compaction_tail_turns: u32,

    #[serde(default = "default_delegation_depth_limit")]
    pub delegation_depth_limit: u32,

    #[serde(default = "default_shell_timeout_secs")]
    pub shell_tool_timeout_secs: u64,

    #[serde(default = "default_tool_timeout_secs")]
    pub default_tool_timeout_secs: u64,
}

impl Config {
    pub fn from_toml_str(raw: &str) -> Result<Config, crate::error::Error> {
        toml::from_str(raw).map_err(|e| crate::error::Error::Config(e.to_string()))
    }

    /// Validate cross-field invariants, returning a list of issues rather
    /// than failing outright — `lace-cli` decides severity-by-severity
    /// whether to warn or hard-fail before boot.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.providers.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "no providers configured".into(),
            });
        } else if !self
            .providers
            .iter()
            .any(|p| p.name == self.default_provider)
        {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: format!(
                    "default_provider {:?} does not match any configured provider",
                    self.default_provider
                ),
            });
        }

        if !(0.0..=1.0).contains(&self.token_budget_fraction) {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: format!(
                    "token_budget_fraction {} must be between 0.0 and 1.0",
                    self.token_budget_fraction
                ),
            });
        } else if self.token_budget_fraction > 0.95 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: format!(
                    "token_budget_fraction {} leaves little headroom before provider limits",
                    self.token_budget_fraction
                ),
            });
        }

        if self.delegation_depth_limit == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "delegation_depth_limit is 0; the delegate tool will always fail".into(),
            });
        }

        for provider in &self.providers {
            if std::env::var(&provider.api_key_env).is_err() {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Warning,
                    message: format!(
                        "provider {:?} references unset env var {:?}",
                        provider.name, provider.api_key_env
                    ),
                });
            }
        }

        issues
    }

    /// True if `validate()` produced no `Error`-severity issues.
    pub fn is_valid(&self) -> bool {
        !self
            .validate()
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}", self.severity, self.message)
    }
}
