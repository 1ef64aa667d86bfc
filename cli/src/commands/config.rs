// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use saga_coordinator_core::domain::config::{CoordinatorConfigManifest, JournalBackend};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the effective configuration as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./saga-coordinator.yaml)
        #[arg(short, long, default_value = "./saga-coordinator.yaml")]
        output: PathBuf,

        /// Include every setting with comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, paths, yaml).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool, yaml: bool) -> Result<()> {
    let config = CoordinatorConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if yaml {
        print!(
            "{}",
            serde_yaml::to_string(&config).context("Failed to serialize configuration")?
        );
        return Ok(());
    }

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. SAGA_COORDINATOR_CONFIG: {}",
            std::env::var("SAGA_COORDINATOR_CONFIG")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./saga-coordinator.yaml");
        println!("  4. ~/.saga-coordinator/config.yaml");
        println!("  5. /etc/saga-coordinator/config.yaml");
        println!();
    }

    let spec = &config.spec;
    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Node:".bold());
    println!("  ID: {}", spec.node.id);
    println!("  Role: {}", spec.node.role);
    println!();

    println!("{}", "Journal:".bold());
    match spec.journal.backend {
        JournalBackend::Memory => println!("  Backend: memory {}", "(not durable)".yellow()),
        JournalBackend::File => {
            println!("  Backend: file");
            println!("  Path: {}", spec.journal.path.display());
            println!("  fsync: {}", spec.journal.fsync);
        }
    }
    println!();

    println!("{}", "Compensation:".bold());
    println!("  Max attempts: {}", spec.compensation.max_attempts);
    println!(
        "  Backoff: {}ms x{} (cap {}ms)",
        spec.compensation.initial_backoff_ms,
        spec.compensation.multiplier,
        spec.compensation.max_backoff_ms
    );
    println!("  Ack timeout: {}ms", spec.compensation.ack_timeout_ms);
    println!();

    println!("{}", "Engine:".bold());
    println!("  Timeout scan: {}ms", spec.timeouts.scan_interval_ms);
    println!("  Retention: {}s", spec.registry.retention_seconds);
    println!("  Mailbox capacity: {}", spec.registry.mailbox_capacity);
    println!();

    println!("{}", "Observability:".bold());
    println!(
        "  Logging: {} ({})",
        spec.observability.logging.level, spec.observability.logging.format
    );
    if spec.observability.metrics.enabled {
        println!("  Metrics: :{}/metrics", spec.observability.metrics.port);
    } else {
        println!("  Metrics: {}", "disabled".dimmed());
    }
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = CoordinatorConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let sample = if with_examples {
        include_str!("../../templates/config-with-examples.yaml")
    } else {
        include_str!("../../templates/config-minimal.yaml")
    };

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
