mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use serpwake_core::Config;

use commands::replay::OutputFormat;

#[derive(Parser)]
#[command(name = "serpwake")]
#[command(about = "SERP categorization wake reporting", long_about = None)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay an event script against a simulated clock
    Replay {
        /// JSON-lines event script
        script: PathBuf,
        /// Override the configured wake timeout
        #[arg(long)]
        wake_timeout_ms: Option<u64>,
        /// Output format for reported events
        #[arg(short, long, value_enum, default_value = "json")]
        format: OutputFormat,
    },
    /// Read events from stdin and report as they become due
    Live {
        /// Submit events in batched pings instead of one line per event
        #[arg(short, long)]
        batch: bool,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the default config file location
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .target(env_logger::Target::Stderr)
        .init();

    let config = Config::load_or_default(cli.config.as_deref()).context("failed to load config")?;

    match cli.command {
        Commands::Replay {
            script,
            wake_timeout_ms,
            format,
        } => commands::replay::handle_replay(&script, config, wake_timeout_ms, format),
        Commands::Live { batch } => commands::live::run_live(config, batch).await,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config::handle_config_show(&config),
            ConfigAction::Path => commands::config::handle_config_path(),
        },
    }
}
