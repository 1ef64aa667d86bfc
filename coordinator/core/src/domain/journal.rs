// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Event Journal Contract
//!
//! Append-only, durable record of every accepted [`TransactionEvent`]. The
//! journal is the system of record: in-memory transaction state is a cache
//! derived from it and can always be rebuilt by replay.
//!
//! Guarantees every implementation must provide:
//!
//! - An append returns only once the event is durable.
//! - Appending an event whose dedup key is already present fails with
//!   [`JournalError::Duplicate`] and does not write anything.
//! - Replay returns a transaction's events in original arrival order.
//!
//! Implementations live in `crate::infrastructure::journal`.

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::domain::events::{RecordedEvent, TransactionEvent};
use crate::domain::transaction::GlobalTxId;

/// One transaction's history as yielded by [`EventJournal::replay_all`].
pub type TransactionHistory = (GlobalTxId, Vec<RecordedEvent>);

#[async_trait]
pub trait EventJournal: Send + Sync {
    /// Durably append an event and return it with its assigned sequence.
    async fn append(&self, event: &TransactionEvent) -> Result<RecordedEvent, JournalError>;

    /// Whether an event with this dedup key has already been appended.
    async fn contains(&self, dedup_key: &str) -> Result<bool, JournalError>;

    /// All events of one transaction in arrival order.
    async fn replay(&self, global_tx_id: &GlobalTxId) -> Result<Vec<RecordedEvent>, JournalError>;

    /// Every transaction's events, grouped per transaction, transactions
    /// ordered by their first event.
    fn replay_all(&self) -> BoxStream<'_, Result<TransactionHistory, JournalError>>;
}

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("Event already journaled: {key}")]
    Duplicate { key: String },

    #[error("Journal write failed: {0}")]
    Write(String),

    #[error("Journal read failed: {0}")]
    Read(String),

    #[error("Corrupt journal entry at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    #[error("Journal I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Journal serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
