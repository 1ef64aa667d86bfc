// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Shared fixtures for the coordinator integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use saga_coordinator_core::application::{CoordinatorSettings, SagaCoordinator};
use saga_coordinator_core::domain::cluster::NodeRole;
use saga_coordinator_core::domain::compensation::CompensationPolicy;
use saga_coordinator_core::domain::events::{
    CompensationPayload, ParticipantId, RecordedEvent, TransactionEvent,
};
use saga_coordinator_core::domain::journal::{EventJournal, JournalError, TransactionHistory};
use saga_coordinator_core::domain::participant::{CompensationCommand, DispatchError, ParticipantSink};
use saga_coordinator_core::domain::transaction::{GlobalTxId, LocalTxId, TransactionStatus, TxState};
use saga_coordinator_core::infrastructure::{
    EventBus, InMemoryEventJournal, InMemoryTransactionRepository, SwitchableRoleProvider,
};

/// Participant sink that records every command and can refuse chosen children.
#[derive(Default)]
pub struct RecordingSink {
    commands: Mutex<Vec<CompensationCommand>>,
    delivered: Mutex<Vec<String>>,
    unreachable: Mutex<HashSet<String>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every dispatch for this local transaction fails.
    pub fn make_unreachable(&self, local_tx_id: &str) {
        self.unreachable.lock().insert(local_tx_id.to_string());
    }

    pub fn make_reachable(&self, local_tx_id: &str) {
        self.unreachable.lock().remove(local_tx_id);
    }

    pub fn commands(&self) -> Vec<CompensationCommand> {
        self.commands.lock().clone()
    }

    /// Local ids of successfully delivered commands, in delivery order.
    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().clone()
    }

    pub fn attempts_for(&self, local_tx_id: &str) -> usize {
        self.commands
            .lock()
            .iter()
            .filter(|c| c.local_tx_id.as_str() == local_tx_id)
            .count()
    }
}

#[async_trait]
impl ParticipantSink for RecordingSink {
    async fn dispatch_compensation(&self, command: &CompensationCommand) -> Result<(), DispatchError> {
        self.commands.lock().push(command.clone());
        if self.unreachable.lock().contains(command.local_tx_id.as_str()) {
            return Err(DispatchError::Unavailable(command.participant.to_string()));
        }
        self.delivered.lock().push(command.local_tx_id.to_string());
        Ok(())
    }
}

/// In-memory journal whose next appends can be made to fail.
#[derive(Default)]
pub struct FailingJournal {
    inner: InMemoryEventJournal,
    failures: Mutex<usize>,
}

impl FailingJournal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next_appends(&self, count: usize) {
        *self.failures.lock() = count;
    }
}

#[async_trait]
impl EventJournal for FailingJournal {
    async fn append(&self, event: &TransactionEvent) -> Result<RecordedEvent, JournalError> {
        {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(JournalError::Write("disk full".into()));
            }
        }
        self.inner.append(event).await
    }

    async fn contains(&self, dedup_key: &str) -> Result<bool, JournalError> {
        self.inner.contains(dedup_key).await
    }

    async fn replay(&self, global_tx_id: &GlobalTxId) -> Result<Vec<RecordedEvent>, JournalError> {
        self.inner.replay(global_tx_id).await
    }

    fn replay_all(&self) -> BoxStream<'_, Result<TransactionHistory, JournalError>> {
        self.inner.replay_all()
    }
}

pub fn fast_settings() -> CoordinatorSettings {
    CoordinatorSettings {
        policy: CompensationPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
            multiplier: 2.0,
            ack_timeout: Duration::from_secs(5),
        },
        scan_interval: Duration::from_millis(20),
        retention: Duration::from_secs(60),
        eviction_interval: Duration::from_millis(50),
        mailbox_capacity: 64,
    }
}

pub struct Harness {
    pub coordinator: SagaCoordinator,
    pub sink: Arc<RecordingSink>,
    pub journal: Arc<dyn EventJournal>,
    pub roles: Arc<SwitchableRoleProvider>,
    pub repository: Arc<InMemoryTransactionRepository>,
    pub event_bus: Arc<EventBus>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(Arc::new(InMemoryEventJournal::new()), NodeRole::Primary, fast_settings())
    }

    pub fn build(journal: Arc<dyn EventJournal>, role: NodeRole, settings: CoordinatorSettings) -> Self {
        let sink = RecordingSink::new();
        let roles = Arc::new(SwitchableRoleProvider::new(role));
        let repository = Arc::new(InMemoryTransactionRepository::new());
        let event_bus = Arc::new(EventBus::new(1024));
        let coordinator = SagaCoordinator::new(
            settings,
            journal.clone(),
            sink.clone(),
            roles.clone(),
            repository.clone(),
            event_bus.clone(),
        );
        Self {
            coordinator,
            sink,
            journal,
            roles,
            repository,
            event_bus,
        }
    }

    /// Status of a live transaction without going through history.
    pub fn live_status(&self, gid: &str) -> TransactionStatus {
        self.coordinator
            .registry()
            .get(&GlobalTxId::from(gid))
            .unwrap_or_else(|| panic!("transaction {} not live", gid))
            .status()
    }

    pub async fn status(&self, gid: &str) -> TransactionStatus {
        self.coordinator
            .transaction_status(&GlobalTxId::from(gid))
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("transaction {} not found", gid))
    }
}

pub fn participant() -> ParticipantId {
    ParticipantId::with_instance("booking", "booking-0")
}

pub fn saga_started(gid: &str, timeout_seconds: u64) -> TransactionEvent {
    TransactionEvent::saga_started(GlobalTxId::from(gid), participant(), timeout_seconds)
}

pub fn saga_ended(gid: &str) -> TransactionEvent {
    TransactionEvent::saga_ended(GlobalTxId::from(gid), participant())
}

pub fn saga_aborted(gid: &str) -> TransactionEvent {
    TransactionEvent::saga_aborted(GlobalTxId::from(gid), participant(), Some("business failure".into()))
}

pub fn tx_started(gid: &str, lid: &str) -> TransactionEvent {
    TransactionEvent::tx_started(
        GlobalTxId::from(gid),
        LocalTxId::from(lid),
        participant(),
        CompensationPayload::new(format!("undo-{}", lid), serde_json::json!({ "lid": lid })),
    )
}

pub fn tx_ended(gid: &str, lid: &str) -> TransactionEvent {
    TransactionEvent::tx_ended(GlobalTxId::from(gid), LocalTxId::from(lid), participant())
}

pub fn tx_aborted(gid: &str, lid: &str) -> TransactionEvent {
    TransactionEvent::tx_aborted(GlobalTxId::from(gid), LocalTxId::from(lid), participant(), None)
}

pub fn tx_compensated(gid: &str, lid: &str) -> TransactionEvent {
    TransactionEvent::tx_compensated(GlobalTxId::from(gid), LocalTxId::from(lid), participant())
}

/// Poll `check` until it holds, failing the test after five seconds.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if check() {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn child_state(status: &TransactionStatus, lid: &str) -> TxState {
    status
        .children
        .iter()
        .find(|c| c.local_tx_id.as_str() == lid)
        .map(|c| c.state)
        .unwrap_or_else(|| panic!("child {} missing", lid))
}
