// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Volatile journal for tests and development. Contents are lost on exit.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;

use super::JournalIndex;
use crate::domain::events::{RecordedEvent, TransactionEvent};
use crate::domain::journal::{EventJournal, JournalError, TransactionHistory};
use crate::domain::transaction::GlobalTxId;

#[derive(Default)]
pub struct InMemoryEventJournal {
    index: Mutex<JournalIndex>,
}

impl InMemoryEventJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of journaled events.
    pub fn len(&self) -> usize {
        self.index.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventJournal for InMemoryEventJournal {
    async fn append(&self, event: &TransactionEvent) -> Result<RecordedEvent, JournalError> {
        let mut index = self.index.lock();
        let recorded = index.prepare(event)?;
        index.commit(recorded.clone());
        Ok(recorded)
    }

    async fn contains(&self, dedup_key: &str) -> Result<bool, JournalError> {
        Ok(self.index.lock().contains(dedup_key))
    }

    async fn replay(&self, global_tx_id: &GlobalTxId) -> Result<Vec<RecordedEvent>, JournalError> {
        Ok(self.index.lock().replay(global_tx_id))
    }

    fn replay_all(&self) -> BoxStream<'_, Result<TransactionHistory, JournalError>> {
        let histories = self.index.lock().histories();
        stream::iter(histories.into_iter().map(Ok)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::ParticipantId;
    use crate::domain::transaction::LocalTxId;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_append_assigns_increasing_sequences() {
        let journal = InMemoryEventJournal::new();
        let gid = GlobalTxId::from("g");
        let first = journal
            .append(&TransactionEvent::saga_started(gid.clone(), ParticipantId::new("a"), 0))
            .await
            .unwrap();
        let second = journal
            .append(&TransactionEvent::tx_ended(gid.clone(), LocalTxId::from("l"), ParticipantId::new("a")))
            .await
            .unwrap();

        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(journal.replay(&gid).await.unwrap(), vec![first, second]);
    }

    #[tokio::test]
    async fn test_duplicate_append_is_rejected_without_writing() {
        let journal = InMemoryEventJournal::new();
        let event = TransactionEvent::saga_started(GlobalTxId::from("g"), ParticipantId::new("a"), 0);

        journal.append(&event).await.unwrap();
        assert!(journal.contains(&event.dedup_key()).await.unwrap());

        let err = journal.append(&event).await.unwrap_err();
        assert!(matches!(err, JournalError::Duplicate { .. }));
        assert_eq!(journal.len(), 1);
    }

    #[tokio::test]
    async fn test_replay_all_groups_by_transaction_in_first_seen_order() {
        let journal = InMemoryEventJournal::new();
        let p = ParticipantId::new("a");
        for gid in ["b", "a"] {
            journal
                .append(&TransactionEvent::saga_started(GlobalTxId::from(gid), p.clone(), 0))
                .await
                .unwrap();
        }
        journal
            .append(&TransactionEvent::saga_ended(GlobalTxId::from("b"), p.clone()))
            .await
            .unwrap();

        let histories: Vec<TransactionHistory> = journal.replay_all().try_collect().await.unwrap();
        let ids: Vec<&str> = histories.iter().map(|(gid, _)| gid.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(histories[0].1.len(), 2);
    }
}
