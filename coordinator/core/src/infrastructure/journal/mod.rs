// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Event journal implementations.
//!
//! Both journals keep the same in-memory [`JournalIndex`] for dedup checks and
//! replay; the file journal additionally writes every accepted event to disk
//! before it is indexed.

mod file;
mod memory;

pub use file::FileEventJournal;
pub use memory::InMemoryEventJournal;

use chrono::Utc;
use std::collections::{HashMap, HashSet};

use crate::domain::events::{RecordedEvent, TransactionEvent};
use crate::domain::journal::{JournalError, TransactionHistory};
use crate::domain::transaction::GlobalTxId;

#[derive(Debug, Default)]
pub(crate) struct JournalIndex {
    keys: HashSet<String>,
    transactions: HashMap<GlobalTxId, Vec<RecordedEvent>>,
    /// Transactions in order of their first event.
    order: Vec<GlobalTxId>,
    last_sequence: u64,
}

impl JournalIndex {
    pub(crate) fn contains(&self, dedup_key: &str) -> bool {
        self.keys.contains(dedup_key)
    }

    /// Assign the next sequence without indexing the event yet.
    pub(crate) fn prepare(&self, event: &TransactionEvent) -> Result<RecordedEvent, JournalError> {
        let key = event.dedup_key();
        if self.keys.contains(&key) {
            return Err(JournalError::Duplicate { key });
        }
        Ok(RecordedEvent {
            sequence: self.last_sequence + 1,
            recorded_at: Utc::now(),
            event: event.clone(),
        })
    }

    /// Index an event that is now durable. Returns `false` for a duplicate key.
    pub(crate) fn commit(&mut self, recorded: RecordedEvent) -> bool {
        if !self.keys.insert(recorded.event.dedup_key()) {
            return false;
        }
        self.last_sequence = self.last_sequence.max(recorded.sequence);
        let gid = recorded.event.global_tx_id.clone();
        match self.transactions.get_mut(&gid) {
            Some(events) => events.push(recorded),
            None => {
                self.order.push(gid.clone());
                self.transactions.insert(gid, vec![recorded]);
            }
        }
        true
    }

    pub(crate) fn replay(&self, global_tx_id: &GlobalTxId) -> Vec<RecordedEvent> {
        self.transactions.get(global_tx_id).cloned().unwrap_or_default()
    }

    pub(crate) fn histories(&self) -> Vec<TransactionHistory> {
        self.order
            .iter()
            .filter_map(|gid| {
                self.transactions
                    .get(gid)
                    .map(|events| (gid.clone(), events.clone()))
            })
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }
}
