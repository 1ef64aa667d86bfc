// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Compensation Orchestrator
//!
//! Delivers compensation commands for sub-transactions that must be undone and
//! waits for their acknowledgement without ever blocking a transaction worker.
//!
//! Each dispatch runs as its own task:
//!
//! 1. Send the command to the [`ParticipantSink`].
//! 2. On success wait up to `ack_timeout` for the worker to report the
//!    `TxCompensatedEvent` (which cancels the task through [`acknowledge`]).
//! 3. On a send error or a missing acknowledgement back off
//!    (`initial * multiplier^(n-1)`, capped) and try again.
//! 4. After `max_attempts` report exhaustion back to the worker, which flags
//!    the child `COMPENSATION_FAILED`.
//!
//! The orchestrator never touches transaction state directly: progress is sent
//! back through the owning worker's mailbox.
//!
//! [`acknowledge`]: CompensationOrchestrator::acknowledge

use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::metrics;
use crate::application::worker::TransactionHandle;
use crate::domain::compensation::CompensationPolicy;
use crate::domain::events::CoordinatorEvent;
use crate::domain::participant::{CompensationCommand, ParticipantSink};
use crate::domain::transaction::{GlobalTxId, LocalTxId};
use crate::infrastructure::event_bus::EventBus;

/// Progress reported back to the owning transaction worker.
#[derive(Debug, Clone, PartialEq)]
pub enum CompensationProgress {
    Attempt {
        local_tx_id: LocalTxId,
        attempt: u32,
    },
    Exhausted {
        local_tx_id: LocalTxId,
        attempts: u32,
        last_error: String,
    },
}

type DispatchKey = (GlobalTxId, LocalTxId);

struct InFlight {
    generation: u64,
    token: CancellationToken,
}

pub struct CompensationOrchestrator {
    sink: Arc<dyn ParticipantSink>,
    event_bus: Arc<EventBus>,
    in_flight: DashMap<DispatchKey, InFlight>,
    generation: AtomicU64,
}

impl CompensationOrchestrator {
    pub fn new(sink: Arc<dyn ParticipantSink>, event_bus: Arc<EventBus>) -> Self {
        Self {
            sink,
            event_bus,
            in_flight: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// Start dispatching `command` with retries. Returns immediately.
    pub fn dispatch(
        self: &Arc<Self>,
        handle: TransactionHandle,
        command: CompensationCommand,
        policy: CompensationPolicy,
    ) {
        let key = (command.global_tx_id.clone(), command.local_tx_id.clone());
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        if let Some(previous) = self.in_flight.insert(
            key.clone(),
            InFlight {
                generation,
                token: token.clone(),
            },
        ) {
            previous.token.cancel();
        }

        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            orchestrator
                .run_dispatch(handle, command, policy, token)
                .await;
            orchestrator
                .in_flight
                .remove_if(&key, |_, entry| entry.generation == generation);
        });
    }

    async fn run_dispatch(
        &self,
        handle: TransactionHandle,
        mut command: CompensationCommand,
        policy: CompensationPolicy,
        token: CancellationToken,
    ) {
        let max_attempts = policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if token.is_cancelled() {
                return;
            }
            command.attempt = attempt;
            handle
                .report_compensation(CompensationProgress::Attempt {
                    local_tx_id: command.local_tx_id.clone(),
                    attempt,
                })
                .await;

            match self.sink.dispatch_compensation(&command).await {
                Ok(()) => {
                    metrics::record_compensation_dispatched();
                    info!(
                        global_tx_id = %command.global_tx_id,
                        local_tx_id = %command.local_tx_id,
                        participant = %command.participant,
                        attempt,
                        "Compensation dispatched"
                    );
                    self.event_bus.publish(CoordinatorEvent::CompensationDispatched {
                        global_tx_id: command.global_tx_id.clone(),
                        local_tx_id: command.local_tx_id.clone(),
                        participant: command.participant.clone(),
                        attempt,
                        dispatched_at: Utc::now(),
                    });

                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(policy.ack_timeout) => {
                            last_error = format!(
                                "no acknowledgement within {}ms",
                                policy.ack_timeout.as_millis()
                            );
                        }
                    }
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            metrics::record_compensation_failure();
            warn!(
                global_tx_id = %command.global_tx_id,
                local_tx_id = %command.local_tx_id,
                attempt,
                max_attempts,
                error = %last_error,
                "Compensation attempt failed"
            );
            self.event_bus.publish(CoordinatorEvent::CompensationDispatchFailed {
                global_tx_id: command.global_tx_id.clone(),
                local_tx_id: command.local_tx_id.clone(),
                attempt,
                error: last_error.clone(),
                failed_at: Utc::now(),
            });

            if attempt < max_attempts {
                let delay = policy.backoff_for(attempt);
                debug!(
                    local_tx_id = %command.local_tx_id,
                    delay_ms = delay.as_millis() as u64,
                    "Backing off before next compensation attempt"
                );
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        if token.is_cancelled() {
            return;
        }
        handle
            .report_compensation(CompensationProgress::Exhausted {
                local_tx_id: command.local_tx_id.clone(),
                attempts: max_attempts,
                last_error,
            })
            .await;
    }

    /// Stop retrying a child whose compensation was acknowledged.
    pub fn acknowledge(&self, global_tx_id: &GlobalTxId, local_tx_id: &LocalTxId) {
        if let Some((_, entry)) = self
            .in_flight
            .remove(&(global_tx_id.clone(), local_tx_id.clone()))
        {
            entry.token.cancel();
        }
    }

    /// Stop every outstanding dispatch of one transaction.
    pub fn cancel_transaction(&self, global_tx_id: &GlobalTxId) {
        self.in_flight.retain(|(gid, _), entry| {
            if gid == global_tx_id {
                entry.token.cancel();
                false
            } else {
                true
            }
        });
    }

    /// Stop every outstanding dispatch (node demoted or shutting down).
    pub fn cancel_all(&self) {
        self.in_flight.retain(|_, entry| {
            entry.token.cancel();
            false
        });
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::worker::WorkerMessage;
    use crate::domain::events::{CompensationPayload, ParticipantId};
    use crate::domain::participant::DispatchError;
    use crate::domain::transaction::GlobalTransaction;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    struct FlakySink {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    impl FlakySink {
        fn failing(times: u32) -> Self {
            Self {
                failures_left: AtomicU32::new(times),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ParticipantSink for FlakySink {
        async fn dispatch_compensation(&self, _command: &CompensationCommand) -> Result<(), DispatchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(DispatchError::Unavailable("payments".into()));
            }
            Ok(())
        }
    }

    fn command() -> CompensationCommand {
        CompensationCommand {
            global_tx_id: GlobalTxId::from("g"),
            local_tx_id: LocalTxId::from("l"),
            parent_tx_id: None,
            participant: ParticipantId::new("payments"),
            payload: CompensationPayload::new("refund", serde_json::Value::Null),
            attempt: 0,
        }
    }

    fn fast_policy(max_attempts: u32, ack_timeout: Duration) -> CompensationPolicy {
        CompensationPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            multiplier: 2.0,
            ack_timeout,
        }
    }

    #[tokio::test]
    async fn test_exhausts_after_attempt_ceiling() {
        let sink = Arc::new(FlakySink::failing(u32::MAX));
        let orchestrator = Arc::new(CompensationOrchestrator::new(
            sink.clone(),
            Arc::new(EventBus::new(64)),
        ));
        let (handle, mut rx) = TransactionHandle::detached(GlobalTransaction::new(GlobalTxId::from("g")), 16);

        orchestrator.dispatch(handle, command(), fast_policy(3, Duration::from_secs(5)));

        let mut attempts = Vec::new();
        loop {
            match rx.recv().await.unwrap() {
                WorkerMessage::Compensation(CompensationProgress::Attempt { attempt, .. }) => {
                    attempts.push(attempt)
                }
                WorkerMessage::Compensation(CompensationProgress::Exhausted { attempts: n, last_error, .. }) => {
                    assert_eq!(n, 3);
                    assert!(last_error.contains("payments"));
                    break;
                }
                _ => panic!("unexpected worker message"),
            }
        }
        assert_eq!(attempts, vec![1, 2, 3]);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_acknowledge_stops_retrying() {
        let sink = Arc::new(FlakySink::failing(0));
        let orchestrator = Arc::new(CompensationOrchestrator::new(
            sink.clone(),
            Arc::new(EventBus::new(64)),
        ));
        let (handle, mut rx) = TransactionHandle::detached(GlobalTransaction::new(GlobalTxId::from("g")), 16);

        orchestrator.dispatch(handle, command(), fast_policy(3, Duration::from_secs(30)));
        assert!(matches!(
            rx.recv().await.unwrap(),
            WorkerMessage::Compensation(CompensationProgress::Attempt { attempt: 1, .. })
        ));
        assert_eq!(orchestrator.in_flight_count(), 1);

        orchestrator.acknowledge(&GlobalTxId::from("g"), &LocalTxId::from("l"));
        assert_eq!(orchestrator.in_flight_count(), 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_acknowledgement_triggers_redispatch() {
        let sink = Arc::new(FlakySink::failing(0));
        let orchestrator = Arc::new(CompensationOrchestrator::new(
            sink.clone(),
            Arc::new(EventBus::new(64)),
        ));
        let (handle, mut rx) = TransactionHandle::detached(GlobalTransaction::new(GlobalTxId::from("g")), 16);

        orchestrator.dispatch(handle, command(), fast_policy(2, Duration::from_millis(10)));

        let mut exhausted = false;
        while let Some(message) = rx.recv().await {
            if let WorkerMessage::Compensation(CompensationProgress::Exhausted { last_error, .. }) = message {
                assert!(last_error.contains("no acknowledgement"));
                exhausted = true;
                break;
            }
        }
        assert!(exhausted);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
    }
}
