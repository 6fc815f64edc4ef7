//! `lace` — the CLI binary for the runtime controller (spec §6.4).
//! Boot sequence ported from `sa_gateway::main`: parse, init tracing, load
//! config, dispatch by subcommand.

mod bootstrap;
mod cli;
mod config_cmd;
mod gate;
mod run;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, ConfigCommand};

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,lace=debug")))
        .with_writer(std::io::stderr)
        .json()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let exit_code = match cli.command {
        Some(Command::Version) => {
            println!("lace {}", env!("CARGO_PKG_VERSION"));
            run::EXIT_OK
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = cli::load_config(cli.config.as_deref())?;
            if config_cmd::validate(&config, &config_path) {
                run::EXIT_OK
            } else {
                run::EXIT_TURN_ERROR
            }
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = cli::load_config(cli.config.as_deref())?;
            config_cmd::show(&config);
            run::EXIT_OK
        }
        None => {
            let Some(prompt) = cli.prompt else {
                eprintln!("error: --prompt <text> is required (or use a subcommand; see --help)");
                return handle_exit(run::EXIT_INVALID_ARGS);
            };
            let (config, _config_path) = cli::load_config(cli.config.as_deref())?;
            run::run(
                &config,
                cli.continue_hint,
                prompt,
                cli.model,
                cli.allow_tool,
                cli.deny_tool,
                cli.json,
            )
            .await?
        }
    };

    handle_exit(exit_code)
}

fn handle_exit(code: i32) -> anyhow::Result<()> {
    if code != run::EXIT_OK {
        std::process::exit(code);
    }
    Ok(())
}
