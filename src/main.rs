use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod cleanup;
mod commands;
mod config;
mod lifecycle;
mod sandbox;
mod stats;
mod storage;

use commands::run_cmd::Shape;
use config::Config;

#[derive(Parser)]
#[command(name = "sandbox-stability")]
#[command(
    author,
    version,
    about = "Stability harness for remote sandbox lifecycles"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ./stability.toml, then the user config dir)
    #[arg(short, long, global = true, env = "STABILITY_CONFIG")]
    config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Print the report as JSON instead of a table
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run many sandboxes concurrently, each for a few rounds
    FanOut {
        /// Number of concurrent sandboxes
        #[arg(short, long, default_value = "5", value_parser = clap::value_parser!(u32).range(1..))]
        sandboxes: u32,

        /// Rounds per sandbox
        #[arg(short, long, default_value = "2", value_parser = clap::value_parser!(u32).range(1..))]
        rounds: u32,
    },

    /// Run one sandbox through many rounds
    Chain {
        /// Number of rounds
        #[arg(short, long, default_value = "20", value_parser = clap::value_parser!(u32).range(1..))]
        rounds: u32,
    },

    /// Kill a sandbox by id, retrying until it is gone
    Kill {
        /// Sandbox id
        sandbox_id: String,

        /// Maximum kill attempts (default from config)
        #[arg(long)]
        attempts: Option<u32>,

        /// Delay between attempts in milliseconds (default from config)
        #[arg(long)]
        interval_ms: Option<u64>,
    },

    /// Show the effective configuration with credentials redacted
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Held until exit so buffered file logs are flushed
    let _log_guard = init_logging(cli.verbose, cli.log_file.as_deref())?;

    let mut config = Config::load(cli.config.as_deref())?;
    config.apply_env(|key| std::env::var(key).ok());

    match cli.command {
        Commands::FanOut { sandboxes, rounds } => {
            let shape = Shape::FanOut { sandboxes, rounds };
            commands::run_cmd::run(&config, shape, cli.verbose, cli.json).await?;
        }
        Commands::Chain { rounds } => {
            let shape = Shape::Chain { rounds };
            commands::run_cmd::run(&config, shape, cli.verbose, cli.json).await?;
        }
        Commands::Kill {
            sandbox_id,
            attempts,
            interval_ms,
        } => {
            commands::kill::run(&config, &sandbox_id, attempts, interval_ms).await?;
        }
        Commands::Config => {
            commands::show_config::run(&config)?;
        }
    }

    Ok(())
}

/// Console logging on stderr, plus an optional non-blocking file writer.
fn init_logging(verbose: bool, log_file: Option<&std::path::Path>) -> Result<Option<WorkerGuard>> {
    let default_level = if verbose {
        "sandbox_stability=debug"
    } else {
        "sandbox_stability=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    Ok(guard)
}
