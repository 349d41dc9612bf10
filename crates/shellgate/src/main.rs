//! shellgate: an interactive shell with history, plus a remote gateway.
//!
//! Run `shellgate` for the interactive shell or `shellgate serve` for the
//! WebSocket gateway.

mod config;
mod frontend;
mod local;
mod serve;

use std::{path::PathBuf, sync::Arc};

use anyhow::bail;
use clap::{Parser, Subcommand};
use shellgate_core::{Assistant, UnconfiguredAssistant};
use shellgate_executor::{Executor, HttpAssistant, HttpAssistantConfig, NESTED_MARKER_VAR};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    config::{ConfigError, DEFAULT_AI_MODEL, ServerConfig},
    frontend::{Capabilities, FrontEnd},
    local::LocalShell,
};

#[derive(Debug, Parser)]
#[command(name = "shellgate", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Use the line-oriented front-end even on a capable terminal.
    #[arg(long, global = true)]
    line: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start an interactive shell (the default).
    Shell,
    /// Serve the remote gateway.
    Serve {
        /// TOML configuration file.
        #[arg(long, env = "SHELLGATE_CONFIG")]
        config: Option<PathBuf>,
        /// Listen address, overriding the configuration.
        #[arg(long)]
        bind: Option<String>,
    },
}

/// Facts read from the environment once at startup.
#[derive(Debug, Clone, Copy)]
struct StartupState {
    /// Running inside a command spawned by another shellgate.
    nested: bool,
}

impl StartupState {
    fn read() -> Self {
        Self {
            nested: std::env::var_os(NESTED_MARKER_VAR).is_some_and(|v| v == "1"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let startup = StartupState::read();

    match cli.command {
        Some(Command::Serve { config, bind }) => {
            init_tracing("info");
            let mut config = ServerConfig::load(config.as_deref())?;
            if let Some(bind) = bind {
                config.bind = bind
                    .parse()
                    .map_err(|_| ConfigError::InvalidBind(bind))?;
            }
            serve::run(config).await
        }
        Some(Command::Shell) | None => {
            // Keep diagnostics off the display unless asked for.
            init_tracing("warn");
            interactive(startup, cli.line).await
        }
    }
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
        .init();
}

async fn interactive(startup: StartupState, force_line: bool) -> anyhow::Result<()> {
    if startup.nested {
        bail!("shellgate is already running in this terminal; refusing to start a nested shell");
    }

    let working_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let assistant: Arc<dyn Assistant> = match std::env::var("SHELLGATE_AI_ENDPOINT") {
        Ok(endpoint) if !endpoint.is_empty() => Arc::new(HttpAssistant::new(HttpAssistantConfig {
            endpoint,
            api_key: std::env::var("SHELLGATE_AI_KEY").ok(),
            model: std::env::var("SHELLGATE_AI_MODEL").unwrap_or_else(|_| DEFAULT_AI_MODEL.to_string()),
        })),
        _ => Arc::new(UnconfiguredAssistant),
    };
    let history_db = std::env::var_os("SHELLGATE_HISTORY_DB").map(PathBuf::from);
    let history = serve::open_history(history_db.as_deref()).await?;
    let shell = LocalShell::new(Executor::new(working_dir), history, assistant);

    let front_end = FrontEnd::select(&Capabilities::detect(), force_line);
    front_end.run(shell).await
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::parse_from(["shellgate", "--line"]);
        assert!(cli.line);
        assert!(cli.command.is_none());

        let cli = Cli::parse_from(["shellgate", "serve", "--bind", "0.0.0.0:9000"]);
        let Some(Command::Serve { bind, .. }) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(bind.as_deref(), Some("0.0.0.0:9000"));
    }
}
