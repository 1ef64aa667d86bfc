// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Saga Coordinator CLI
//!
//! The `saga-coordinator` binary hosts the coordinator engine.
//!
//! ## Commands
//!
//! - `saga-coordinator serve` - Run the engine over a JSON-lines stream
//! - `saga-coordinator inspect` - Replay a journal file and print transaction status
//! - `saga-coordinator config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use saga_coordinator_cli::commands::{self, ConfigCommand, InspectArgs, ServeArgs};
use saga_coordinator_core::domain::config::CoordinatorConfigManifest;

/// Saga Coordinator - durable saga / TCC transaction coordination
#[derive(Parser)]
#[command(name = "saga-coordinator")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "SAGA_COORDINATOR_CONFIG",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to the configured level
    #[arg(long, global = true, env = "SAGA_COORDINATOR_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (text, json); defaults to the configured format
    #[arg(long, global = true, env = "SAGA_COORDINATOR_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordinator over stdin/stdout
    #[command(name = "serve")]
    Serve(ServeArgs),

    /// Print transaction status from a journal file
    #[command(name = "inspect")]
    Inspect(InspectArgs),

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging must not fail on a broken config; `config validate` reports that.
    let logging = CoordinatorConfigManifest::load_or_default(cli.config.clone())
        .map(|config| config.spec.observability.logging)
        .unwrap_or_default();
    let level = cli.log_level.unwrap_or(logging.level);
    let format = cli.log_format.unwrap_or(logging.format);
    init_logging(&level, &format)?;

    match cli.command {
        Some(Commands::Serve(args)) => commands::serve::run(args, cli.config).await,
        Some(Commands::Inspect(args)) => commands::inspect::run(args).await,
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging.
///
/// Logs go to stderr; stdout carries the `serve` protocol.
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        "json" => builder.json().init(),
        _ => builder.compact().init(),
    }

    Ok(())
}
