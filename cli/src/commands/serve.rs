// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `serve` command
//!
//! Runs the coordinator with participants on the other end of a JSON-lines
//! stream:
//!
//! - **stdin**: one [`TransactionEvent`] per line, e.g.
//!   `{"global_tx_id":"g-1","participant":{"service_name":"booking"},"kind":{"type":"SagaStartedEvent","timeout_seconds":30}}`
//! - **stdout**: one [`ServeOutput`] per line. Every input line gets an
//!   `outcome`; compensation requests appear as `compensate` lines whenever the
//!   engine dispatches them.
//!
//! Logs go to stderr. The command exits on EOF, Ctrl+C or SIGTERM.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use saga_coordinator_core::application::metrics::describe_metrics;
use saga_coordinator_core::application::{CoordinatorSettings, SagaCoordinator, SubmitOutcome};
use saga_coordinator_core::domain::cluster::NodeRole;
use saga_coordinator_core::domain::config::{CoordinatorConfigManifest, JournalBackend};
use saga_coordinator_core::domain::events::TransactionEvent;
use saga_coordinator_core::domain::journal::EventJournal;
use saga_coordinator_core::domain::participant::CompensationCommand;
use saga_coordinator_core::infrastructure::{
    ChannelParticipantSink, EventBus, FileEventJournal, InMemoryEventJournal,
    InMemoryTransactionRepository, SwitchableRoleProvider,
};

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Journal file (switches to the file backend)
    #[arg(long, value_name = "FILE")]
    pub journal: Option<PathBuf>,

    /// Node role (primary, secondary)
    #[arg(long)]
    pub role: Option<NodeRole>,

    /// Expose Prometheus metrics on this port
    #[arg(long, value_name = "PORT")]
    pub metrics_port: Option<u16>,
}

/// One line written to stdout.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServeOutput {
    Outcome(EventOutcome),
    Compensate(CompensationCommand),
    Error { line: usize, error: String },
}

#[derive(Debug, Serialize)]
pub struct EventOutcome {
    pub line: usize,
    pub global_tx_id: String,
    pub event_type: String,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl EventOutcome {
    pub fn new(line: usize, event: &TransactionEvent, outcome: &SubmitOutcome) -> Self {
        let (sequence, reason) = match outcome {
            SubmitOutcome::Accepted { sequence } => (Some(*sequence), None),
            SubmitOutcome::Duplicate => (None, None),
            SubmitOutcome::Rejected(reason) => (None, Some(reason.to_string())),
        };
        Self {
            line,
            global_tx_id: event.global_tx_id.to_string(),
            event_type: event.event_type().to_string(),
            outcome: outcome.label(),
            sequence,
            reason,
        }
    }
}

/// Parse one input line. Blank lines and `#` comments yield `None`.
pub fn parse_event(line: &str) -> Result<Option<TransactionEvent>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let event = serde_json::from_str(trimmed).context("Invalid transaction event")?;
    Ok(Some(event))
}

pub async fn run(args: ServeArgs, config_path: Option<PathBuf>) -> Result<()> {
    let mut config =
        CoordinatorConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    if let Some(path) = args.journal {
        config.spec.journal.backend = JournalBackend::File;
        config.spec.journal.path = path;
    }
    if let Some(role) = args.role {
        config.spec.node.role = role;
    }
    if let Some(port) = args.metrics_port {
        config.spec.observability.metrics.enabled = true;
        config.spec.observability.metrics.port = port;
    }
    config.validate().context("Configuration validation failed")?;
    let spec = config.spec;

    if spec.observability.metrics.enabled {
        let addr = SocketAddr::from(([0, 0, 0, 0], spec.observability.metrics.port));
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to start Prometheus exporter")?;
        describe_metrics();
        info!(%addr, "Prometheus metrics exporter listening");
    }

    let journal: Arc<dyn EventJournal> = match spec.journal.backend {
        JournalBackend::File => Arc::new(
            FileEventJournal::open(&spec.journal.path, spec.journal.fsync)
                .await
                .with_context(|| format!("Failed to open journal {:?}", spec.journal.path))?,
        ),
        JournalBackend::Memory => {
            warn!("Using in-memory journal; state is lost on exit");
            Arc::new(InMemoryEventJournal::new())
        }
    };

    let (sink, mut commands) = ChannelParticipantSink::new(spec.registry.mailbox_capacity);
    let coordinator = SagaCoordinator::new(
        CoordinatorSettings::from(&spec),
        journal,
        Arc::new(sink),
        Arc::new(SwitchableRoleProvider::new(spec.node.role)),
        Arc::new(InMemoryTransactionRepository::new()),
        Arc::new(EventBus::with_default_capacity()),
    );

    let summary = coordinator
        .rebuild_from_journal()
        .await
        .context("Failed to rebuild transactions from journal")?;
    coordinator.start();
    info!(
        node_id = %spec.node.id,
        role = %spec.node.role,
        live = summary.live,
        "Saga coordinator ready; reading events from stdin"
    );

    let (output, mut lines_out) = mpsc::channel::<ServeOutput>(spec.registry.mailbox_capacity);
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = lines_out.recv().await {
            let mut encoded = match serde_json::to_vec(&line) {
                Ok(encoded) => encoded,
                Err(e) => {
                    error!(error = %e, "Failed to encode output line");
                    continue;
                }
            };
            encoded.push(b'\n');
            if stdout.write_all(&encoded).await.is_err() || stdout.flush().await.is_err() {
                warn!("stdout closed; dropping output");
                break;
            }
        }
    });

    let forward = output.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(command) = commands.recv().await {
            if forward.send(ServeOutput::Compensate(command)).await.is_err() {
                break;
            }
        }
    });

    let result = tokio::select! {
        result = read_events(&coordinator, &output) => result,
        _ = shutdown_signal() => Ok(()),
    };

    coordinator.shutdown().await;
    forwarder.abort();
    drop(output);
    if let Err(e) = writer.await {
        warn!(error = %e, "Output writer ended abnormally");
    }
    result
}

async fn read_events(coordinator: &SagaCoordinator, output: &mpsc::Sender<ServeOutput>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0;

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        line_no += 1;
        let reply = match parse_event(&line) {
            Ok(None) => continue,
            Ok(Some(event)) => match coordinator.submit(event.clone()).await {
                Ok(outcome) => ServeOutput::Outcome(EventOutcome::new(line_no, &event, &outcome)),
                Err(e) => ServeOutput::Error {
                    line: line_no,
                    error: e.to_string(),
                },
            },
            Err(e) => ServeOutput::Error {
                line: line_no,
                error: format!("{:#}", e),
            },
        };
        if output.send(reply).await.is_err() {
            break;
        }
    }

    info!(lines = line_no, "End of input");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
