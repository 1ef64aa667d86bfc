// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Timeout Monitor
//!
//! Tracks the absolute deadline of every `STARTED` saga with a non-zero
//! timeout. A scan loop (primary nodes only) submits a synthetic
//! `SagaTimeoutEvent` for each overdue saga through the owning worker's
//! mailbox, exactly like a participant event. The timeout event's dedup key is
//! fixed per saga, so a timeout fires at most once even if the scan races with
//! a restart or a second coordinator.
//!
//! Deadlines are armed on every node so a newly promoted primary fires
//! anything that expired while it was secondary on its first scan.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::error::SubmitOutcome;
use crate::application::registry::TransactionRegistry;
use crate::application::role_gate::ClusterRoleGate;
use crate::domain::events::TransactionEvent;
use crate::domain::transaction::GlobalTxId;

#[derive(Default)]
pub struct TimeoutMonitor {
    deadlines: DashMap<GlobalTxId, DateTime<Utc>>,
}

impl TimeoutMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the deadline of a saga.
    pub fn arm(&self, global_tx_id: GlobalTxId, deadline: DateTime<Utc>) {
        debug!(global_tx_id = %global_tx_id, deadline = %deadline, "Armed saga timeout");
        self.deadlines.insert(global_tx_id, deadline);
    }

    pub fn cancel(&self, global_tx_id: &GlobalTxId) {
        if self.deadlines.remove(global_tx_id).is_some() {
            debug!(global_tx_id = %global_tx_id, "Cancelled saga timeout");
        }
    }

    pub fn deadline(&self, global_tx_id: &GlobalTxId) -> Option<DateTime<Utc>> {
        self.deadlines.get(global_tx_id).map(|entry| *entry.value())
    }

    /// Sagas whose deadline is at or before `now`, earliest first.
    pub fn due(&self, now: DateTime<Utc>) -> Vec<GlobalTxId> {
        let mut due: Vec<(DateTime<Utc>, GlobalTxId)> = self
            .deadlines
            .iter()
            .filter(|entry| *entry.value() <= now)
            .map(|entry| (*entry.value(), entry.key().clone()))
            .collect();
        due.sort();
        due.into_iter().map(|(_, id)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    /// Start the scan loop.
    pub fn start(
        self: Arc<Self>,
        registry: Arc<TransactionRegistry>,
        gate: ClusterRoleGate,
        scan_interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                scan_interval_ms = scan_interval.as_millis() as u64,
                "Starting saga timeout monitor"
            );
            let mut tick = interval(scan_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        if gate.is_primary() {
                            self.scan(&registry, Utc::now()).await;
                        }
                    }
                    _ = shutdown.cancelled() => {
                        info!("Shutdown signal received, stopping saga timeout monitor");
                        break;
                    }
                }
            }
        })
    }

    /// Fire every overdue saga once. Returns the number of timeouts journaled.
    pub async fn scan(&self, registry: &TransactionRegistry, now: DateTime<Utc>) -> usize {
        let mut fired = 0;
        for global_tx_id in self.due(now) {
            let Some(handle) = registry.get(&global_tx_id) else {
                self.cancel(&global_tx_id);
                continue;
            };

            match handle.submit(TransactionEvent::saga_timeout(global_tx_id.clone())).await {
                Ok(SubmitOutcome::Accepted { .. }) => fired += 1,
                Ok(outcome) => {
                    // Saga left STARTED before the timeout was processed.
                    debug!(global_tx_id = %global_tx_id, outcome = ?outcome, "Timeout no longer applicable");
                    self.cancel(&global_tx_id);
                }
                Err(e) => {
                    // Stays armed; retried on the next scan.
                    warn!(global_tx_id = %global_tx_id, error = %e, "Failed to record saga timeout");
                }
            }
        }
        fired
    }
}
