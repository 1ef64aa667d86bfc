// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the history repository defined in the
//! domain layer.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Keep finished transaction snapshots for status lookups
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::repository::{RepositoryError, TransactionRepository};
use crate::domain::transaction::{GlobalTransaction, GlobalTxId};

/// HashMap-backed history, for development and single-node deployments
#[derive(Clone, Default)]
pub struct InMemoryTransactionRepository {
    transactions: Arc<RwLock<HashMap<GlobalTxId, GlobalTransaction>>>,
}

impl InMemoryTransactionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionRepository for InMemoryTransactionRepository {
    async fn save(&self, transaction: &GlobalTransaction) -> Result<(), RepositoryError> {
        self.transactions
            .write()
            .insert(transaction.id.clone(), transaction.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &GlobalTxId) -> Result<Option<GlobalTransaction>, RepositoryError> {
        Ok(self.transactions.read().get(id).cloned())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<GlobalTransaction>, RepositoryError> {
        let mut all: Vec<GlobalTransaction> = self.transactions.read().values().cloned().collect();
        all.sort_by(|a, b| b.ended_at.cmp(&a.ended_at).then_with(|| b.last_sequence.cmp(&a.last_sequence)));
        all.truncate(limit);
        Ok(all)
    }
}
