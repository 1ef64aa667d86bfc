// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Saga Coordinator
//!
//! Facade that wires the journal, registry, timeout monitor, compensation
//! orchestrator and role gate together, and exposes the operations the outer
//! surfaces (CLI, network front ends, tests) use:
//!
//! | Operation | Purpose |
//! |-----------|---------|
//! | `rebuild_from_journal` | restore in-flight transactions on startup |
//! | `start` | run the timeout scan, the eviction reaper and the role watcher |
//! | `submit` | deliver one participant event |
//! | `transaction_status` / `list_transactions` | read-only status |
//! | `retry_failed_compensations` | operator retry of exhausted children |
//! | `shutdown` | stop background tasks and workers |

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::compensation::CompensationOrchestrator;
use crate::application::error::{CoordinatorError, RejectReason, SubmitOutcome};
use crate::application::metrics;
use crate::application::registry::{EngineContext, RebuildSummary, TransactionRegistry};
use crate::application::role_gate::ClusterRoleGate;
use crate::application::timeout_monitor::TimeoutMonitor;
use crate::domain::cluster::{NodeRole, RoleProvider};
use crate::domain::compensation::CompensationPolicy;
use crate::domain::config::CoordinatorConfigSpec;
use crate::domain::events::{CoordinatorEvent, EventKind, TransactionEvent};
use crate::domain::journal::EventJournal;
use crate::domain::participant::ParticipantSink;
use crate::domain::repository::TransactionRepository;
use crate::domain::transaction::{GlobalTxId, TransactionStatus, TransitionError};
use crate::infrastructure::event_bus::EventBus;

/// Routing attempts for one event when its worker stops underneath it.
const MAX_ROUTE_ATTEMPTS: u32 = 3;

/// Runtime knobs of the engine.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub policy: CompensationPolicy,
    pub scan_interval: Duration,
    /// How long terminal transactions stay live before eviction.
    pub retention: Duration,
    pub eviction_interval: Duration,
    pub mailbox_capacity: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from(&CoordinatorConfigSpec::default())
    }
}

impl From<&CoordinatorConfigSpec> for CoordinatorSettings {
    fn from(spec: &CoordinatorConfigSpec) -> Self {
        Self {
            policy: spec.compensation.policy(),
            scan_interval: spec.timeouts.scan_interval(),
            retention: spec.registry.retention(),
            eviction_interval: spec.registry.eviction_interval(),
            mailbox_capacity: spec.registry.mailbox_capacity,
        }
    }
}

pub struct SagaCoordinator {
    ctx: Arc<EngineContext>,
    registry: Arc<TransactionRegistry>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SagaCoordinator {
    pub fn new(
        settings: CoordinatorSettings,
        journal: Arc<dyn EventJournal>,
        sink: Arc<dyn ParticipantSink>,
        roles: Arc<dyn RoleProvider>,
        repository: Arc<dyn TransactionRepository>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let orchestrator = Arc::new(CompensationOrchestrator::new(sink, Arc::clone(&event_bus)));
        let ctx = Arc::new(EngineContext {
            journal,
            repository,
            orchestrator,
            monitor: Arc::new(TimeoutMonitor::new()),
            gate: ClusterRoleGate::new(roles),
            event_bus,
            settings,
        });
        let registry = Arc::new(TransactionRegistry::new(Arc::clone(&ctx)));

        Self {
            ctx,
            registry,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &Arc<TransactionRegistry> {
        &self.registry
    }

    pub fn timeout_monitor(&self) -> &Arc<TimeoutMonitor> {
        &self.ctx.monitor
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.ctx.event_bus
    }

    pub fn node_role(&self) -> NodeRole {
        self.ctx.gate.role()
    }

    /// Restore in-flight transactions. Call once, before `start` and `submit`.
    pub async fn rebuild_from_journal(&self) -> Result<RebuildSummary, CoordinatorError> {
        self.registry.rebuild_from_journal().await
    }

    /// Spawn the background tasks.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            warn!("Saga coordinator already started");
            return;
        }

        tasks.push(Arc::clone(&self.ctx.monitor).start(
            Arc::clone(&self.registry),
            self.ctx.gate.clone(),
            self.ctx.settings.scan_interval,
            self.shutdown.clone(),
        ));
        tasks.push(self.spawn_reaper());
        tasks.push(self.spawn_role_watcher());

        info!(role = %self.node_role(), "Saga coordinator started");
    }

    /// Deliver one participant event.
    ///
    /// Duplicates, orphans and illegal transitions are reported as outcomes.
    /// `SagaTimeoutEvent` is recorded by the timeout monitor only and is
    /// rejected here.
    /// An `Err` means the event was not durably recorded and must be
    /// redelivered.
    pub async fn submit(&self, event: TransactionEvent) -> Result<SubmitOutcome, CoordinatorError> {
        let outcome = self.route(event).await;
        match &outcome {
            Ok(outcome) => metrics::record_event(outcome.label()),
            Err(_) => metrics::record_event("journal_failure"),
        }
        outcome
    }

    async fn route(&self, event: TransactionEvent) -> Result<SubmitOutcome, CoordinatorError> {
        if matches!(event.kind, EventKind::SagaTimeout) {
            warn!(
                global_tx_id = %event.global_tx_id,
                participant = %event.participant,
                "Rejected coordinator-only event from participant"
            );
            let reason = RejectReason::CoordinatorOnly(event.event_type());
            self.ctx.event_bus.publish(CoordinatorEvent::EventRejected {
                global_tx_id: event.global_tx_id.clone(),
                event_type: event.event_type(),
                reason: reason.to_string(),
                rejected_at: Utc::now(),
            });
            return Ok(SubmitOutcome::Rejected(reason));
        }

        let mut attempt = 1;
        loop {
            match self.route_once(event.clone()).await {
                Err(CoordinatorError::WorkerStopped(global_tx_id)) if attempt < MAX_ROUTE_ATTEMPTS => {
                    debug!(global_tx_id = %global_tx_id, attempt, "Worker stopped; routing again");
                    attempt += 1;
                    self.registry.revive(&global_tx_id).await?;
                }
                outcome => return outcome,
            }
        }
    }

    async fn route_once(&self, event: TransactionEvent) -> Result<SubmitOutcome, CoordinatorError> {
        let global_tx_id = event.global_tx_id.clone();

        if let Some(handle) = self.registry.get(&global_tx_id) {
            return handle.submit(event).await;
        }

        // Not live: either redelivery for an evicted/finished transaction,
        // an orphan, or a new saga.
        if self.ctx.journal.contains(&event.dedup_key()).await? {
            return Ok(SubmitOutcome::Duplicate);
        }

        if !event.is_saga_start() {
            warn!(
                global_tx_id = %global_tx_id,
                event_type = %event.event_type(),
                participant = %event.participant,
                "Rejected orphan event for unknown transaction"
            );
            self.ctx.event_bus.publish(CoordinatorEvent::EventRejected {
                global_tx_id,
                event_type: event.event_type(),
                reason: RejectReason::Orphan.to_string(),
                rejected_at: Utc::now(),
            });
            return Ok(SubmitOutcome::Rejected(RejectReason::Orphan));
        }

        if !self.ctx.journal.replay(&global_tx_id).await?.is_empty() {
            // Finished and evicted; a second start under the same id is illegal.
            return Ok(SubmitOutcome::Rejected(RejectReason::IllegalTransition(
                TransitionError::SagaAlreadyStarted(global_tx_id),
            )));
        }

        let handle = self.registry.get_or_create(&global_tx_id);
        let outcome = handle.submit(event).await;
        if !matches!(outcome, Ok(SubmitOutcome::Accepted { .. })) {
            self.registry.retire_if_unstarted(&handle).await;
        }
        outcome
    }

    /// Status of a live transaction, or of a finished one from history.
    pub async fn transaction_status(
        &self,
        global_tx_id: &GlobalTxId,
    ) -> Result<Option<TransactionStatus>, CoordinatorError> {
        if let Some(handle) = self.registry.get(global_tx_id) {
            return Ok(Some(handle.status()));
        }
        let finished = self.ctx.repository.find_by_id(global_tx_id).await?;
        Ok(finished.as_ref().map(TransactionStatus::from))
    }

    /// Status of every live transaction, ordered by id.
    pub fn list_transactions(&self) -> Vec<TransactionStatus> {
        let mut statuses: Vec<TransactionStatus> = self
            .registry
            .handles()
            .iter()
            .map(|handle| handle.status())
            .collect();
        statuses.sort_by(|a, b| a.global_tx_id.cmp(&b.global_tx_id));
        statuses
    }

    /// Reset `COMPENSATION_FAILED` children of a saga and dispatch them again.
    pub async fn retry_failed_compensations(
        &self,
        global_tx_id: &GlobalTxId,
    ) -> Result<usize, CoordinatorError> {
        let handle = self
            .registry
            .get(global_tx_id)
            .ok_or_else(|| CoordinatorError::NotFound(global_tx_id.clone()))?;
        handle.retry_failed().await
    }

    /// Stop background tasks, outstanding dispatches and all workers.
    pub async fn shutdown(&self) {
        info!("Shutting down saga coordinator");
        self.shutdown.cancel();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        self.ctx.orchestrator.cancel_all();
        self.registry.shutdown_all().await;
        info!("Saga coordinator stopped");
    }

    fn spawn_reaper(&self) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let shutdown = self.shutdown.clone();
        let every = self.ctx.settings.eviction_interval;

        tokio::spawn(async move {
            let mut tick = interval(every);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        match registry.evict_expired(Utc::now()).await {
                            Ok(0) => {}
                            Ok(evicted) => debug!(evicted, "Evicted finished transactions"),
                            Err(e) => warn!(error = %e, "Eviction cycle failed"),
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        })
    }

    fn spawn_role_watcher(&self) -> JoinHandle<()> {
        let ctx = Arc::clone(&self.ctx);
        let registry = Arc::clone(&self.registry);
        let shutdown = self.shutdown.clone();
        let mut changes = ctx.gate.changes();

        tokio::spawn(async move {
            let mut current = *changes.borrow_and_update();
            loop {
                tokio::select! {
                    changed = changes.changed() => {
                        if changed.is_err() {
                            warn!("Role provider closed; keeping last known role");
                            break;
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }

                let role = *changes.borrow_and_update();
                if role == current {
                    continue;
                }
                info!(from = %current, to = %role, "Coordinator role changed");
                ctx.event_bus.publish(CoordinatorEvent::RoleChanged {
                    from: current,
                    to: role,
                    changed_at: Utc::now(),
                });
                current = role;

                if role.is_primary() {
                    for handle in registry.handles() {
                        handle.resume().await;
                    }
                } else {
                    ctx.orchestrator.cancel_all();
                    for handle in registry.handles() {
                        handle.demote().await;
                    }
                }
            }
        })
    }
}
