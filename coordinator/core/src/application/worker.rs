// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Transaction Worker
//!
//! Every live global transaction is owned by one worker task with a bounded
//! mailbox. All mutations of a transaction (participant events, compensation
//! progress, role changes, operator retries) go through that mailbox, so they
//! are applied strictly one at a time and in arrival order. Different
//! transactions proceed in parallel on different workers.
//!
//! Reads do not go through the mailbox: the current state sits behind a
//! `parking_lot::RwLock` that only the worker ever writes.
//!
//! # Event handling
//!
//! 1. Dedup check against the journal: a known key is `Duplicate`.
//! 2. State-machine check: an illegal event is `Rejected` and never journaled.
//! 3. Durable append: a failure is returned as an error, nothing is applied.
//! 4. Apply, then react to the resulting state changes (arm/cancel the
//!    timeout, drive compensation, record metrics, publish events).

use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::application::compensation::CompensationProgress;
use crate::application::error::{CoordinatorError, RejectReason, SubmitOutcome};
use crate::application::metrics;
use crate::application::registry::EngineContext;
use crate::domain::events::{CoordinatorEvent, EventKind, RecordedEvent, TransactionEvent};
use crate::domain::journal::JournalError;
use crate::domain::participant::CompensationCommand;
use crate::domain::transaction::{
    GlobalTransaction, GlobalTxId, SagaState, StateChange, TransactionStatus, TxState,
};

pub(crate) enum WorkerMessage {
    Event {
        event: TransactionEvent,
        reply: oneshot::Sender<Result<SubmitOutcome, CoordinatorError>>,
    },
    Compensation(CompensationProgress),
    /// Node is (again) primary: continue pending compensation.
    Resume,
    /// Node lost primary: stop dispatching, forget in-flight attempts.
    Demoted,
    RetryFailed {
        reply: oneshot::Sender<usize>,
    },
    /// Stop if no start event was accepted; replies whether it stopped.
    RetireIfUnstarted {
        reply: oneshot::Sender<bool>,
    },
    Shutdown,
}

/// Cheap, cloneable reference to a live transaction.
#[derive(Clone)]
pub struct TransactionHandle {
    id: GlobalTxId,
    sender: mpsc::Sender<WorkerMessage>,
    state: Arc<RwLock<GlobalTransaction>>,
}

impl TransactionHandle {
    pub fn id(&self) -> &GlobalTxId {
        &self.id
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> GlobalTransaction {
        self.state.read().clone()
    }

    pub fn status(&self) -> TransactionStatus {
        TransactionStatus::from(&*self.state.read())
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&GlobalTransaction) -> R) -> R {
        f(&self.state.read())
    }

    /// The worker behind this handle has exited.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub(crate) fn same_worker(&self, other: &TransactionHandle) -> bool {
        self.sender.same_channel(&other.sender)
    }

    /// Hand an event to the worker and wait for its verdict.
    pub async fn submit(&self, event: TransactionEvent) -> Result<SubmitOutcome, CoordinatorError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(WorkerMessage::Event { event, reply })
            .await
            .map_err(|_| CoordinatorError::WorkerStopped(self.id.clone()))?;
        response
            .await
            .map_err(|_| CoordinatorError::WorkerStopped(self.id.clone()))?
    }

    /// Reset `COMPENSATION_FAILED` children and dispatch them again.
    pub async fn retry_failed(&self) -> Result<usize, CoordinatorError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(WorkerMessage::RetryFailed { reply })
            .await
            .map_err(|_| CoordinatorError::WorkerStopped(self.id.clone()))?;
        response
            .await
            .map_err(|_| CoordinatorError::WorkerStopped(self.id.clone()))
    }

    pub(crate) async fn report_compensation(&self, progress: CompensationProgress) {
        if self
            .sender
            .send(WorkerMessage::Compensation(progress))
            .await
            .is_err()
        {
            debug!(global_tx_id = %self.id, "Dropping compensation progress for stopped worker");
        }
    }

    pub(crate) async fn resume(&self) {
        let _ = self.sender.send(WorkerMessage::Resume).await;
    }

    pub(crate) async fn demote(&self) {
        let _ = self.sender.send(WorkerMessage::Demoted).await;
    }

    pub(crate) async fn shutdown(&self) {
        let _ = self.sender.send(WorkerMessage::Shutdown).await;
    }

    /// Ask the worker to exit if its saga never started.
    ///
    /// Decided in mailbox order, so an event queued ahead of this request is
    /// handled first. Anything queued behind it fails with `WorkerStopped`.
    pub(crate) async fn retire_if_unstarted(&self) -> bool {
        let (reply, response) = oneshot::channel();
        if self
            .sender
            .send(WorkerMessage::RetireIfUnstarted { reply })
            .await
            .is_err()
        {
            return true;
        }
        response.await.unwrap_or(true)
    }

    /// Handle without a worker; messages land in the returned receiver.
    #[cfg(test)]
    pub(crate) fn detached(
        transaction: GlobalTransaction,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<WorkerMessage>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let handle = Self {
            id: transaction.id.clone(),
            sender,
            state: Arc::new(RwLock::new(transaction)),
        };
        (handle, receiver)
    }
}

/// Spawn the worker task for `transaction` and return its handle.
pub(crate) fn spawn(transaction: GlobalTransaction, ctx: Arc<EngineContext>) -> TransactionHandle {
    let (sender, receiver) = mpsc::channel(ctx.settings.mailbox_capacity.max(1));
    let handle = TransactionHandle {
        id: transaction.id.clone(),
        sender,
        state: Arc::new(RwLock::new(transaction)),
    };
    let worker = TransactionWorker {
        handle: handle.clone(),
        ctx,
        receiver,
    };
    tokio::spawn(worker.run());
    handle
}

struct TransactionWorker {
    handle: TransactionHandle,
    ctx: Arc<EngineContext>,
    receiver: mpsc::Receiver<WorkerMessage>,
}

impl TransactionWorker {
    fn id(&self) -> &GlobalTxId {
        &self.handle.id
    }

    async fn run(mut self) {
        debug!(global_tx_id = %self.id(), "Transaction worker started");

        while let Some(message) = self.receiver.recv().await {
            match message {
                WorkerMessage::Event { event, reply } => {
                    let outcome = self.handle_event(event).await;
                    let _ = reply.send(outcome);
                }
                WorkerMessage::Compensation(progress) => self.handle_progress(progress),
                WorkerMessage::Resume => self.drive_compensation(),
                WorkerMessage::Demoted => self.handle_demotion(),
                WorkerMessage::RetryFailed { reply } => {
                    let reset = self.retry_failed();
                    let _ = reply.send(reset);
                }
                WorkerMessage::RetireIfUnstarted { reply } => {
                    let retire = !self.handle.read(GlobalTransaction::is_started);
                    let _ = reply.send(retire);
                    if retire {
                        break;
                    }
                }
                WorkerMessage::Shutdown => break,
            }
        }

        debug!(global_tx_id = %self.id(), "Transaction worker stopped");
    }

    async fn handle_event(&self, event: TransactionEvent) -> Result<SubmitOutcome, CoordinatorError> {
        let key = event.dedup_key();
        if self.ctx.journal.contains(&key).await? {
            debug!(global_tx_id = %self.id(), dedup_key = %key, "Ignoring duplicate event");
            return Ok(SubmitOutcome::Duplicate);
        }

        let verdict = self.handle.state.read().check(&event);
        if let Err(e) = verdict {
            warn!(
                global_tx_id = %self.id(),
                event_type = %event.event_type(),
                participant = %event.participant,
                error = %e,
                "Rejected illegal transition"
            );
            self.ctx.event_bus.publish(CoordinatorEvent::EventRejected {
                global_tx_id: self.id().clone(),
                event_type: event.event_type(),
                reason: e.to_string(),
                rejected_at: Utc::now(),
            });
            return Ok(SubmitOutcome::Rejected(RejectReason::IllegalTransition(e)));
        }

        let recorded = match self.ctx.journal.append(&event).await {
            Ok(recorded) => recorded,
            Err(JournalError::Duplicate { .. }) => return Ok(SubmitOutcome::Duplicate),
            Err(e) => {
                error!(
                    global_tx_id = %self.id(),
                    event_type = %event.event_type(),
                    error = %e,
                    "Failed to journal event; not applied"
                );
                return Err(CoordinatorError::Journal(e));
            }
        };

        let applied = self.handle.state.write().apply(&recorded);
        match applied {
            Ok(changes) => self.react(&recorded, &changes),
            Err(e) => {
                // Unreachable while this worker is the only writer.
                error!(
                    global_tx_id = %self.id(),
                    sequence = recorded.sequence,
                    error = %e,
                    "Journaled event could not be applied"
                );
            }
        }

        Ok(SubmitOutcome::Accepted {
            sequence: recorded.sequence,
        })
    }

    fn react(&self, recorded: &RecordedEvent, changes: &[StateChange]) {
        debug!(
            global_tx_id = %self.id(),
            event_type = %recorded.event.event_type(),
            sequence = recorded.sequence,
            "Applied event"
        );

        if matches!(recorded.event.kind, EventKind::SagaTimeout) {
            metrics::record_timeout_fired();
            info!(global_tx_id = %self.id(), "Saga timed out; aborting");
            self.ctx.event_bus.publish(CoordinatorEvent::TimeoutFired {
                global_tx_id: self.id().clone(),
                fired_at: recorded.recorded_at,
            });
        }

        self.publish_changes(changes);

        for change in changes {
            match change {
                StateChange::Saga { from, to } => {
                    if *to == SagaState::Started {
                        metrics::record_saga_started();
                        if let Some(deadline) = self.handle.read(GlobalTransaction::deadline) {
                            self.ctx.monitor.arm(self.id().clone(), deadline);
                        }
                    }
                    if *from == Some(SagaState::Started) {
                        self.ctx.monitor.cancel(self.id());
                    }
                    if to.is_terminal() {
                        self.finish(*to);
                    }
                }
                StateChange::SubTransaction {
                    local_tx_id,
                    to: TxState::Compensated,
                    ..
                } => {
                    self.ctx.orchestrator.acknowledge(self.id(), local_tx_id);
                }
                StateChange::SubTransaction { .. } => {}
            }
        }

        self.drive_compensation();
    }

    fn finish(&self, state: SagaState) {
        let duration = self.handle.read(|tx| match (tx.started_at, tx.ended_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        });
        metrics::record_saga_finished(state, duration);
        self.ctx.orchestrator.cancel_transaction(self.id());
        info!(global_tx_id = %self.id(), state = %state, "Saga finished");
    }

    fn publish_changes(&self, changes: &[StateChange]) {
        let now = Utc::now();
        for change in changes {
            let event = match change {
                StateChange::Saga { from, to } => CoordinatorEvent::SagaStateChanged {
                    global_tx_id: self.id().clone(),
                    from: *from,
                    to: *to,
                    changed_at: now,
                },
                StateChange::SubTransaction {
                    local_tx_id,
                    from,
                    to,
                } => CoordinatorEvent::SubTransactionStateChanged {
                    global_tx_id: self.id().clone(),
                    local_tx_id: local_tx_id.clone(),
                    from: *from,
                    to: *to,
                    changed_at: now,
                },
            };
            self.ctx.event_bus.publish(event);
        }
    }

    /// Dispatch the next compensation if this node may and nothing is in flight.
    fn drive_compensation(&self) {
        if !self.ctx.gate.is_primary() {
            return;
        }

        let next = {
            let mut tx = self.handle.state.write();
            if tx.state != Some(SagaState::Aborting) || tx.compensation_in_flight() {
                return;
            }
            let Some(child) = tx.next_compensation() else {
                return;
            };
            let policy = self.ctx.settings.policy.for_child(child);
            let command = CompensationCommand {
                global_tx_id: tx.id.clone(),
                local_tx_id: child.local_tx_id.clone(),
                parent_tx_id: child.parent_tx_id.clone(),
                participant: child.participant.clone(),
                payload: child.compensation.clone(),
                attempt: 0,
            };
            let change = tx.begin_compensation(&command.local_tx_id);
            (command, policy, change)
        };

        let (command, policy, change) = next;
        if let Some(change) = change {
            self.publish_changes(&[change]);
        }
        self.ctx
            .orchestrator
            .dispatch(self.handle.clone(), command, policy);
    }

    fn handle_progress(&self, progress: CompensationProgress) {
        match progress {
            CompensationProgress::Attempt {
                local_tx_id,
                attempt,
            } => {
                self.handle
                    .state
                    .write()
                    .record_compensation_attempt(&local_tx_id, attempt);
            }
            CompensationProgress::Exhausted {
                local_tx_id,
                attempts,
                last_error,
            } => {
                let change = self
                    .handle
                    .state
                    .write()
                    .fail_compensation(&local_tx_id, last_error.clone());
                let Some(change) = change else {
                    // Acknowledged or reverted in the meantime.
                    return;
                };

                metrics::record_compensation_exhausted();
                error!(
                    global_tx_id = %self.id(),
                    local_tx_id = %local_tx_id,
                    attempts,
                    last_error = %last_error,
                    "Compensation exhausted; sub-transaction needs operator attention"
                );
                self.ctx.event_bus.publish(CoordinatorEvent::CompensationExhausted {
                    global_tx_id: self.id().clone(),
                    local_tx_id,
                    attempts,
                    last_error,
                    exhausted_at: Utc::now(),
                });
                self.publish_changes(&[change]);
                self.drive_compensation();
            }
        }
    }

    fn handle_demotion(&self) {
        self.ctx.orchestrator.cancel_transaction(self.id());
        let changes = self.handle.state.write().revert_in_flight_compensations();
        if !changes.is_empty() {
            info!(
                global_tx_id = %self.id(),
                reverted = changes.len(),
                "Node demoted; in-flight compensations returned to pending"
            );
        }
        self.publish_changes(&changes);
    }

    fn retry_failed(&self) -> usize {
        let changes = self.handle.state.write().reset_failed_compensations();
        if !changes.is_empty() {
            info!(
                global_tx_id = %self.id(),
                reset = changes.len(),
                "Retrying failed compensations"
            );
        }
        self.publish_changes(&changes);
        self.drive_compensation();
        changes.len()
    }
}
