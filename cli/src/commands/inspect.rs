// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `inspect` command
//!
//! Replays a journal file and prints the derived state of each transaction.
//! Volatile states (`COMPENSATING`, `COMPENSATION_FAILED`) are never journaled,
//! so children awaiting compensation show as `ENDED`.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use futures::StreamExt;
use std::path::{Path, PathBuf};

use saga_coordinator_core::domain::journal::EventJournal;
use saga_coordinator_core::domain::transaction::{
    GlobalTransaction, GlobalTxId, SagaState, TransactionStatus, TxState,
};
use saga_coordinator_core::infrastructure::FileEventJournal;

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Journal file to read
    #[arg(long, value_name = "FILE")]
    pub journal: PathBuf,

    /// Only show this global transaction
    #[arg(long, value_name = "GLOBAL_TX_ID")]
    pub id: Option<String>,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: InspectArgs) -> Result<()> {
    let statuses = load_statuses(&args.journal, args.id.as_deref()).await?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&statuses).context("Failed to encode status")?
        );
        return Ok(());
    }

    if statuses.is_empty() {
        println!("{}", "No transactions found.".dimmed());
        return Ok(());
    }

    for status in &statuses {
        print_status(status);
    }
    Ok(())
}

/// Status of every transaction in the journal, ordered by id.
pub async fn load_statuses(path: &Path, only: Option<&str>) -> Result<Vec<TransactionStatus>> {
    if !path.exists() {
        anyhow::bail!("Journal file not found: {}", path.display());
    }
    let journal = FileEventJournal::open(path, false)
        .await
        .with_context(|| format!("Failed to open journal {:?}", path))?;

    let mut statuses = Vec::new();
    if let Some(id) = only {
        let id = GlobalTxId::from(id);
        let events = journal.replay(&id).await?;
        if !events.is_empty() {
            statuses.push(TransactionStatus::from(&GlobalTransaction::replay(id, &events)));
        }
        return Ok(statuses);
    }

    let mut histories = journal.replay_all();
    while let Some(history) = histories.next().await {
        let (id, events) = history?;
        statuses.push(TransactionStatus::from(&GlobalTransaction::replay(id, &events)));
    }
    statuses.sort_by(|a, b| a.global_tx_id.cmp(&b.global_tx_id));
    Ok(statuses)
}

fn print_status(status: &TransactionStatus) {
    let state = match status.state {
        Some(SagaState::Ended) => "ENDED".green(),
        Some(SagaState::Aborted) => "ABORTED".yellow(),
        Some(SagaState::Aborting) => "ABORTING".red(),
        Some(SagaState::Started) => "STARTED".cyan(),
        None => "UNSTARTED".dimmed(),
    };
    println!("{} {}", status.global_tx_id.to_string().bold(), state);

    if let Some(started) = status.started_at {
        println!("  Started: {}", started.to_rfc3339());
    }
    if status.timeout_seconds > 0 {
        println!("  Timeout: {}s", status.timeout_seconds);
    }
    if let Some(ended) = status.ended_at {
        println!("  Ended: {}", ended.to_rfc3339());
    }
    if let Some(cause) = &status.abort_cause {
        println!("  Abort cause: {:?}", cause);
    }

    for child in &status.children {
        let state = match child.state {
            TxState::Compensated | TxState::Ended => child.state.to_string().normal(),
            TxState::CompensationFailed => child.state.to_string().red(),
            _ => child.state.to_string().dimmed(),
        };
        println!("  - {} ({}) {}", child.local_tx_id, child.participant, state);
    }
    if !status.pending_compensations.is_empty() {
        let pending: Vec<String> = status
            .pending_compensations
            .iter()
            .map(ToString::to_string)
            .collect();
        println!("  Pending compensation: {}", pending.join(", "));
    }
    println!();
}
