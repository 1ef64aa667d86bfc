// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Transaction Registry
//!
//! Maps global transaction ids to their live worker. The registry is the only
//! place workers are created, and the only place they are retired:
//!
//! - [`get_or_create`](TransactionRegistry::get_or_create) spawns a worker for
//!   a start event. Concurrent calls for the same id share one worker.
//! - [`evict`](TransactionRegistry::evict) retires a terminal transaction
//!   once its retention window has passed and saves its final snapshot to the
//!   history repository.
//! - [`rebuild_from_journal`](TransactionRegistry::rebuild_from_journal)
//!   re-derives every in-flight transaction from the journal on startup.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::application::compensation::CompensationOrchestrator;
use crate::application::coordinator::CoordinatorSettings;
use crate::application::error::CoordinatorError;
use crate::application::metrics;
use crate::application::role_gate::ClusterRoleGate;
use crate::application::timeout_monitor::TimeoutMonitor;
use crate::application::worker::{self, TransactionHandle};
use crate::domain::events::CoordinatorEvent;
use crate::domain::journal::EventJournal;
use crate::domain::repository::TransactionRepository;
use crate::domain::transaction::{GlobalTransaction, GlobalTxId, SagaState};
use crate::infrastructure::event_bus::EventBus;

/// Collaborators shared by the registry and every worker.
pub(crate) struct EngineContext {
    pub journal: Arc<dyn EventJournal>,
    pub repository: Arc<dyn TransactionRepository>,
    pub orchestrator: Arc<CompensationOrchestrator>,
    pub monitor: Arc<TimeoutMonitor>,
    pub gate: ClusterRoleGate,
    pub event_bus: Arc<EventBus>,
    pub settings: CoordinatorSettings,
}

/// What a journal rebuild found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildSummary {
    /// Transactions restored as live workers.
    pub live: usize,
    /// Transactions already terminal; moved to history.
    pub terminal: usize,
    /// Timeout entries re-armed.
    pub timeouts_armed: usize,
    /// Transactions whose compensation was resumed.
    pub compensations_resumed: usize,
}

pub struct TransactionRegistry {
    ctx: Arc<EngineContext>,
    handles: DashMap<GlobalTxId, TransactionHandle>,
}

impl TransactionRegistry {
    pub(crate) fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            ctx,
            handles: DashMap::new(),
        }
    }

    /// Live handle for `global_tx_id`. A handle whose worker has exited is
    /// never returned.
    pub fn get(&self, global_tx_id: &GlobalTxId) -> Option<TransactionHandle> {
        self.handles
            .get(global_tx_id)
            .map(|entry| entry.value().clone())
            .filter(|handle| !handle.is_closed())
    }

    pub fn get_or_create(&self, global_tx_id: &GlobalTxId) -> TransactionHandle {
        if let Some(handle) = self.get(global_tx_id) {
            return handle;
        }
        let handle = match self.handles.entry(global_tx_id.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_closed() {
                    debug!(global_tx_id = %global_tx_id, "Replacing stopped transaction worker");
                    entry.insert(self.spawn_fresh(global_tx_id));
                }
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                debug!(global_tx_id = %global_tx_id, "Creating transaction worker");
                entry.insert(self.spawn_fresh(global_tx_id)).value().clone()
            }
        };
        metrics::set_live_transactions(self.handles.len());
        handle
    }

    fn spawn_fresh(&self, global_tx_id: &GlobalTxId) -> TransactionHandle {
        worker::spawn(
            GlobalTransaction::new(global_tx_id.clone()),
            Arc::clone(&self.ctx),
        )
    }

    /// Drop an instance created for a start event that was not accepted.
    ///
    /// The worker decides in mailbox order, so a concurrent start that reached
    /// it first keeps it alive.
    pub(crate) async fn retire_if_unstarted(&self, handle: &TransactionHandle) {
        if !handle.retire_if_unstarted().await {
            return;
        }
        let removed = self
            .handles
            .remove_if(handle.id(), |_, current| current.same_worker(handle));
        if removed.is_some() {
            debug!(global_tx_id = %handle.id(), "Retired unstarted transaction worker");
            metrics::set_live_transactions(self.handles.len());
        }
    }

    /// Replace a worker that exited on its own with one rebuilt from the
    /// journal. Nothing is installed if the journal holds no saga start.
    pub(crate) async fn revive(&self, global_tx_id: &GlobalTxId) -> Result<(), CoordinatorError> {
        let stopped = self
            .handles
            .get(global_tx_id)
            .is_some_and(|entry| entry.value().is_closed());
        if !stopped {
            return Ok(());
        }

        let events = self.ctx.journal.replay(global_tx_id).await?;
        let transaction = GlobalTransaction::replay(global_tx_id.clone(), &events);

        if !transaction.is_started() {
            self.handles
                .remove_if(global_tx_id, |_, handle| handle.is_closed());
            metrics::set_live_transactions(self.handles.len());
            return Ok(());
        }

        let revived = match self.handles.entry(global_tx_id.clone()) {
            Entry::Occupied(mut entry) if entry.get().is_closed() => {
                let handle = worker::spawn(transaction.clone(), Arc::clone(&self.ctx));
                entry.insert(handle.clone());
                Some(handle)
            }
            // Already revived by a concurrent caller, or retired meanwhile.
            Entry::Occupied(_) | Entry::Vacant(_) => None,
        };

        if let Some(handle) = revived {
            warn!(
                global_tx_id = %global_tx_id,
                state = ?transaction.state,
                "Transaction worker stopped unexpectedly; restored from journal"
            );
            self.resume_duties(&transaction, &handle).await;
            metrics::set_live_transactions(self.handles.len());
        }
        Ok(())
    }

    /// Re-arm the timeout of a `STARTED` saga or resume an `ABORTING` one.
    /// Returns `(timeout_armed, compensation_resumed)`.
    async fn resume_duties(
        &self,
        transaction: &GlobalTransaction,
        handle: &TransactionHandle,
    ) -> (bool, bool) {
        match transaction.state {
            Some(SagaState::Started) => match transaction.deadline() {
                Some(deadline) => {
                    self.ctx.monitor.arm(transaction.id.clone(), deadline);
                    (true, false)
                }
                None => (false, false),
            },
            Some(SagaState::Aborting) => {
                handle.resume().await;
                (false, true)
            }
            _ => (false, false),
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Every live transaction.
    pub fn handles(&self) -> Vec<TransactionHandle> {
        self.handles.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Retire a transaction: stop its worker and timers, keep its final snapshot.
    pub async fn evict(&self, global_tx_id: &GlobalTxId) -> Result<bool, CoordinatorError> {
        let Some((_, handle)) = self.handles.remove(global_tx_id) else {
            return Ok(false);
        };
        metrics::set_live_transactions(self.handles.len());

        self.ctx.monitor.cancel(global_tx_id);
        self.ctx.orchestrator.cancel_transaction(global_tx_id);
        handle.shutdown().await;

        let snapshot = handle.snapshot();
        if snapshot.is_started() {
            self.ctx.repository.save(&snapshot).await?;
        }

        info!(
            global_tx_id = %global_tx_id,
            state = ?snapshot.state,
            "Evicted transaction"
        );
        self.ctx.event_bus.publish(CoordinatorEvent::TransactionEvicted {
            global_tx_id: global_tx_id.clone(),
            final_state: snapshot.state,
            evicted_at: Utc::now(),
        });
        Ok(true)
    }

    /// Evict every terminal transaction whose retention window has elapsed.
    pub async fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, CoordinatorError> {
        let retention = ChronoDuration::from_std(self.ctx.settings.retention)
            .unwrap_or_else(|_| ChronoDuration::MAX);

        let expired: Vec<GlobalTxId> = self
            .handles
            .iter()
            .filter(|entry| {
                entry.value().read(|tx| {
                    tx.is_terminal()
                        && tx
                            .ended_at
                            .and_then(|ended| ended.checked_add_signed(retention))
                            .is_some_and(|evict_at| evict_at <= now)
                })
            })
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for global_tx_id in expired {
            if self.evict(&global_tx_id).await? {
                evicted += 1;
            }
        }
        Ok(evicted)
    }

    /// Re-derive every transaction from the journal.
    ///
    /// Terminal transactions go straight to history. In-flight ones get a
    /// worker; `STARTED` ones have their timeout re-armed from the original
    /// start time and `ABORTING` ones resume compensation.
    pub async fn rebuild_from_journal(&self) -> Result<RebuildSummary, CoordinatorError> {
        let mut summary = RebuildSummary::default();
        let mut histories = self.ctx.journal.replay_all();

        while let Some(history) = histories.next().await {
            let (global_tx_id, events) = history?;
            let transaction = GlobalTransaction::replay(global_tx_id.clone(), &events);

            if !transaction.is_started() {
                warn!(global_tx_id = %global_tx_id, "Journal has events but no saga start; skipping");
                continue;
            }

            if transaction.is_terminal() {
                self.ctx.repository.save(&transaction).await?;
                summary.terminal += 1;
                continue;
            }

            let handle = worker::spawn(transaction.clone(), Arc::clone(&self.ctx));
            if let Some(previous) = self.handles.insert(global_tx_id.clone(), handle.clone()) {
                previous.shutdown().await;
            }
            summary.live += 1;

            let (armed, resumed) = self.resume_duties(&transaction, &handle).await;
            summary.timeouts_armed += usize::from(armed);
            summary.compensations_resumed += usize::from(resumed);
        }

        metrics::set_live_transactions(self.handles.len());
        info!(
            live = summary.live,
            terminal = summary.terminal,
            timeouts_armed = summary.timeouts_armed,
            compensations_resumed = summary.compensations_resumed,
            "Rebuilt transactions from journal"
        );
        Ok(summary)
    }

    /// Stop every worker (coordinator shutdown). Nothing is moved to history.
    pub(crate) async fn shutdown_all(&self) {
        let handles: Vec<TransactionHandle> = self.handles();
        self.handles.clear();
        for handle in handles {
            handle.shutdown().await;
        }
        metrics::set_live_transactions(0);
    }
}
