// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Transaction History Repository
//!
//! Persistence contract for finished [`GlobalTransaction`] snapshots. Live
//! transactions are owned by the registry and the journal; once a transaction
//! is terminal and evicted, its final state lands here so operators can still
//! look it up.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `TransactionRepository` | `GlobalTransaction` | `InMemoryTransactionRepository` |

use async_trait::async_trait;

use crate::domain::transaction::{GlobalTransaction, GlobalTxId};

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Save a transaction snapshot (create or replace)
    async fn save(&self, transaction: &GlobalTransaction) -> Result<(), RepositoryError>;

    /// Find transaction by ID
    async fn find_by_id(&self, id: &GlobalTxId) -> Result<Option<GlobalTransaction>, RepositoryError>;

    /// Most recently finished transactions first
    async fn list_recent(&self, limit: usize) -> Result<Vec<GlobalTransaction>, RepositoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Storage error: {0}")]
    Storage(String),
}
