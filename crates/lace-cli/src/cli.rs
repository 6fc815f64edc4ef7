//! Command-line surface (spec §6.4): clap `Cli`/`Command` derive, same
//! shape as `sa_gateway::cli::{Cli, Command}` but with `run` folded into
//! the top level — `lace` has no server to default to, so a bare prompt
//! is the common case rather than one subcommand among many.

use clap::{Parser, Subcommand};

/// lace — a local-first coding-agent runtime controller.
#[derive(Debug, Parser)]
#[command(name = "lace", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Resume a thread. With no value, resumes the most recently updated
    /// thread; omit the flag entirely to start a fresh one.
    #[arg(long = "continue", num_args = 0..=1, default_missing_value = "")]
    pub continue_hint: Option<String>,

    /// The message to send to the agent.
    #[arg(long)]
    pub prompt: Option<String>,

    /// Provider/model override (e.g. "gpt-4o-mini"); defaults to the
    /// configured provider's default model.
    #[arg(long)]
    pub model: Option<String>,

    /// Mark a tool Allow for this run, bypassing the approval gate
    /// (repeatable).
    #[arg(long = "allow-tool", value_name = "NAME")]
    pub allow_tool: Vec<String>,

    /// Mark a tool Deny for this run (repeatable).
    #[arg(long = "deny-tool", value_name = "NAME")]
    pub deny_tool: Vec<String>,

    /// Print the full turn outcome as JSON instead of plain text.
    #[arg(long)]
    pub json: bool,

    /// Path to the TOML config file. Defaults to `LACE_CONFIG` or
    /// `config.toml`.
    #[arg(long)]
    pub config: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse and validate the config file, printing any issues.
    Validate,
    /// Dump the resolved config (with defaults filled in) as TOML.
    Show,
}

/// Search order for an unspecified config file: workspace-local first,
/// then the XDG config dir (spec §6.4 is silent on this; ported from
/// `sven_config::loader::config_search_paths`, trimmed to lace's single
/// TOML format and one file name).
fn config_search_paths() -> Vec<String> {
    let mut paths = vec!["config.toml".to_string(), "lace.toml".to_string()];
    if let Some(cfg) = dirs::config_dir() {
        if let Some(path) = cfg.join("lace/config.toml").to_str() {
            paths.push(path.to_owned());
        }
    }
    paths
}

/// Load the configuration from `path_override`, or `LACE_CONFIG`, or the
/// first hit in [`config_search_paths`] (spec §6.4). A missing file is a
/// hard error here — unlike the teacher, lace has no sensible
/// zero-provider default since a turn always needs somewhere to send it.
pub fn load_config(path_override: Option<&str>) -> anyhow::Result<(lace_types::config::Config, String)> {
    let config_path = path_override
        .map(str::to_owned)
        .or_else(|| std::env::var("LACE_CONFIG").ok())
        .or_else(|| config_search_paths().into_iter().find(|p| std::path::Path::new(p).exists()))
        .unwrap_or_else(|| "config.toml".into());

    let raw = std::fs::read_to_string(&config_path)
        .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
    let config = lace_types::config::Config::from_toml_str(&raw)
        .map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?;

    Ok((config, config_path))
}
