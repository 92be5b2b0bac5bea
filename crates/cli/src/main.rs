//! flowgate CLI: the main entry point.
//!
//! Commands:
//! - `chat`      Resolve and send one turn, print the reply
//! - `stream`    Same, printing gateway events as they arrive
//! - `trigger`   Run a scheduled command for a bot
//! - `heartbeat` Run a heartbeat (self-evolution) prompt
//! - `config`    Show, initialize or validate configuration
//!
//! Bots, models and providers come from an in-memory store fixture.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use flowgate_config::AppConfig;

mod commands;

#[derive(Parser)]
#[command(
    name = "flowgate",
    about = "flowgate: conversation flow resolver for an agent gateway",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to $FLOWGATE_CONFIG or ~/.flowgate/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Store fixture, overriding `fixture` from the config
    #[arg(long, global = true, env = "FLOWGATE_FIXTURE")]
    fixture: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one chat turn and print the reply
    Chat(commands::chat::TurnArgs),

    /// Send one chat turn and print streamed events
    Stream(commands::chat::TurnArgs),

    /// Run a scheduled command
    Trigger(commands::trigger::ScheduleArgs),

    /// Run a heartbeat prompt
    Heartbeat(commands::trigger::HeartbeatArgs),

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config_cmd::ConfigAction,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            let mut config = AppConfig::load_from(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?;
            config.apply_env_overrides(|key| std::env::var(key).ok());
            config.validate()?;
            config
        }
        None => AppConfig::load().context("failed to load config")?,
    };
    init_tracing(&config, cli.verbose);

    match cli.command {
        Commands::Chat(args) => commands::chat::run(&config, cli.fixture.as_deref(), args).await,
        Commands::Stream(args) => commands::chat::run_stream(&config, cli.fixture.as_deref(), args).await,
        Commands::Trigger(args) => commands::trigger::run_schedule(&config, cli.fixture.as_deref(), args).await,
        Commands::Heartbeat(args) => commands::trigger::run_heartbeat(&config, cli.fixture.as_deref(), args).await,
        Commands::Config { action } => commands::config_cmd::run(&config, cli.config.as_deref(), action),
    }
}

/// `RUST_LOG` wins; otherwise `debug` with `--verbose`, else the configured
/// level. `logging.format = "json"` selects the JSON formatter.
fn init_tracing(config: &AppConfig, verbose: bool) {
    let level = if verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
