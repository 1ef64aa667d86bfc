// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Global Transaction State Machine
//!
//! [`GlobalTransaction`] is the aggregate root for one saga: it owns its
//! [`SubTransaction`] children and derives their state purely from journaled
//! [`RecordedEvent`]s. Replaying the same journal always yields the same state.
//!
//! ## Saga Transitions
//! | State | Event | Next |
//! |-------|-------|------|
//! | (none) | `SagaStartedEvent` | `STARTED` |
//! | `STARTED` | `SagaEndedEvent` | `ENDED` |
//! | `STARTED` | `SagaAbortedEvent` / `SagaTimeoutEvent` | `ABORTING` |
//! | `ABORTING` | nothing left awaiting compensation | `ABORTED` |
//!
//! ## Sub-Transaction Transitions
//! | State | Event | Next |
//! |-------|-------|------|
//! | (none) | `TxStartedEvent` | `STARTED` |
//! | `STARTED` | `TxEndedEvent` | `ENDED` |
//! | `STARTED` | `TxAbortedEvent` | `ABORTED` |
//! | `ENDED` / `COMPENSATING` / `COMPENSATION_FAILED` | `TxCompensatedEvent` | `COMPENSATED` |
//!
//! `COMPENSATING` and `COMPENSATION_FAILED` are driven by the compensation
//! orchestrator, not by events, and are never journaled.
//!
//! Every mutation first runs [`GlobalTransaction::check`]; a rejected event
//! leaves the aggregate untouched.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::events::{
    CompensationPayload, EventKind, EventType, ParticipantId, RecordedEvent, TransactionEvent,
};

/// Opaque token correlating every event of one saga.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GlobalTxId(String);

impl GlobalTxId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for GlobalTxId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for GlobalTxId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for GlobalTxId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for GlobalTxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one sub-transaction within a saga.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalTxId(String);

impl LocalTxId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for LocalTxId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for LocalTxId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for LocalTxId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for LocalTxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaState {
    Started,
    Ended,
    Aborting,
    Aborted,
}

impl SagaState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SagaState::Ended | SagaState::Aborted)
    }
}

impl fmt::Display for SagaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SagaState::Started => "STARTED",
            SagaState::Ended => "ENDED",
            SagaState::Aborting => "ABORTING",
            SagaState::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxState {
    Started,
    Ended,
    Aborted,
    Compensating,
    Compensated,
    CompensationFailed,
}

impl TxState {
    /// Completed work that has not yet been undone.
    pub fn awaits_compensation(self) -> bool {
        matches!(
            self,
            TxState::Ended | TxState::Compensating | TxState::CompensationFailed
        )
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxState::Started => "STARTED",
            TxState::Ended => "ENDED",
            TxState::Aborted => "ABORTED",
            TxState::Compensating => "COMPENSATING",
            TxState::Compensated => "COMPENSATED",
            TxState::CompensationFailed => "COMPENSATION_FAILED",
        };
        f.write_str(name)
    }
}

/// Why a saga entered `ABORTING`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum AbortCause {
    Aborted { reason: Option<String> },
    TimedOut,
}

/// One derived state change produced by applying an event or a compensation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    Saga {
        from: Option<SagaState>,
        to: SagaState,
    },
    SubTransaction {
        local_tx_id: LocalTxId,
        from: Option<TxState>,
        to: TxState,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("event for saga {actual} routed to saga {expected}")]
    WrongTransaction {
        expected: GlobalTxId,
        actual: GlobalTxId,
    },

    #[error("saga {0} has not been started")]
    SagaNotStarted(GlobalTxId),

    #[error("saga {0} has already been started")]
    SagaAlreadyStarted(GlobalTxId),

    #[error("{event} is not allowed while saga is {state}")]
    InvalidSagaTransition { event: EventType, state: SagaState },

    #[error("sub-transaction {0} has not been started")]
    UnknownSubTransaction(LocalTxId),

    #[error("sub-transaction {0} has already been started")]
    SubTransactionAlreadyStarted(LocalTxId),

    #[error("{event} is not allowed for sub-transaction {local_tx_id} in state {state}")]
    InvalidSubTransition {
        event: EventType,
        local_tx_id: LocalTxId,
        state: TxState,
    },
}

/// A participant's unit of work inside a saga.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTransaction {
    pub local_tx_id: LocalTxId,
    pub parent_tx_id: Option<LocalTxId>,
    pub participant: ParticipantId,
    pub state: TxState,
    pub compensation: CompensationPayload,
    pub reverse_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub started_sequence: u64,
    /// Journal sequence of the `TxEndedEvent`; orders compensation.
    pub completed_sequence: Option<u64>,
    pub completed_at: Option<DateTime<Utc>>,
    pub compensation_attempts: u32,
    pub failure_reason: Option<String>,
}

/// Aggregate root for one saga.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalTransaction {
    pub id: GlobalTxId,
    pub state: Option<SagaState>,
    pub initiator: Option<ParticipantId>,
    pub started_at: Option<DateTime<Utc>>,
    /// Fixed by the first `SagaStartedEvent`; `0` never expires.
    pub timeout_seconds: u64,
    pub ended_at: Option<DateTime<Utc>>,
    pub abort_cause: Option<AbortCause>,
    pub last_sequence: u64,
    children: Vec<SubTransaction>,
}

impl GlobalTransaction {
    pub fn new(id: GlobalTxId) -> Self {
        Self {
            id,
            state: None,
            initiator: None,
            started_at: None,
            timeout_seconds: 0,
            ended_at: None,
            abort_cause: None,
            last_sequence: 0,
            children: Vec::new(),
        }
    }

    /// Rebuild an aggregate from its journaled history.
    ///
    /// Events the state machine rejects are skipped; the journal only ever
    /// contains events that passed [`check`](Self::check), so this only
    /// happens with hand-edited journals.
    pub fn replay<'a>(id: GlobalTxId, events: impl IntoIterator<Item = &'a RecordedEvent>) -> Self {
        let mut transaction = Self::new(id);
        for recorded in events {
            if let Err(e) = transaction.apply(recorded) {
                tracing::warn!(
                    global_tx_id = %transaction.id,
                    sequence = recorded.sequence,
                    error = %e,
                    "Skipping journaled event rejected during replay"
                );
            }
        }
        transaction
    }

    /// Children in arrival order of their start events.
    pub fn children(&self) -> &[SubTransaction] {
        &self.children
    }

    pub fn child(&self, local_tx_id: &LocalTxId) -> Option<&SubTransaction> {
        self.children.iter().find(|c| &c.local_tx_id == local_tx_id)
    }

    fn child_mut(&mut self, local_tx_id: &LocalTxId) -> Option<&mut SubTransaction> {
        self.children.iter_mut().find(|c| &c.local_tx_id == local_tx_id)
    }

    pub fn is_started(&self) -> bool {
        self.state.is_some()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_some_and(SagaState::is_terminal)
    }

    /// Instant after which a still-`STARTED` saga times out.
    ///
    /// `None` for a zero timeout, and for one too large to represent as an
    /// instant; such a saga never expires.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        if self.timeout_seconds == 0 {
            return None;
        }
        let seconds = i64::try_from(self.timeout_seconds).ok()?;
        let timeout = ChronoDuration::try_seconds(seconds)?;
        self.started_at?.checked_add_signed(timeout)
    }

    /// Validate an event against the transition tables without mutating.
    pub fn check(&self, event: &TransactionEvent) -> Result<(), TransitionError> {
        if event.global_tx_id != self.id {
            return Err(TransitionError::WrongTransaction {
                expected: self.id.clone(),
                actual: event.global_tx_id.clone(),
            });
        }

        let state = match (self.state, &event.kind) {
            (None, EventKind::SagaStarted { .. }) => return Ok(()),
            (None, _) => return Err(TransitionError::SagaNotStarted(self.id.clone())),
            (Some(_), EventKind::SagaStarted { .. }) => {
                return Err(TransitionError::SagaAlreadyStarted(self.id.clone()))
            }
            (Some(state), _) => state,
        };

        let invalid_saga = || TransitionError::InvalidSagaTransition {
            event: event.event_type(),
            state,
        };

        if state.is_terminal() {
            return Err(invalid_saga());
        }

        match &event.kind {
            EventKind::SagaStarted { .. } => Err(invalid_saga()),
            EventKind::SagaEnded | EventKind::SagaAborted { .. } | EventKind::SagaTimeout => {
                if state == SagaState::Started {
                    Ok(())
                } else {
                    Err(invalid_saga())
                }
            }
            EventKind::TxStarted { local_tx_id, .. } => {
                if state != SagaState::Started {
                    return Err(invalid_saga());
                }
                if self.child(local_tx_id).is_some() {
                    return Err(TransitionError::SubTransactionAlreadyStarted(local_tx_id.clone()));
                }
                Ok(())
            }
            EventKind::TxEnded { local_tx_id } | EventKind::TxAborted { local_tx_id, .. } => {
                self.expect_child_in(event.event_type(), local_tx_id, |s| s == TxState::Started)
            }
            EventKind::TxCompensated { local_tx_id } => {
                if state != SagaState::Aborting {
                    return Err(invalid_saga());
                }
                self.expect_child_in(event.event_type(), local_tx_id, TxState::awaits_compensation)
            }
        }
    }

    fn expect_child_in(
        &self,
        event: EventType,
        local_tx_id: &LocalTxId,
        allowed: impl Fn(TxState) -> bool,
    ) -> Result<(), TransitionError> {
        let child = self
            .child(local_tx_id)
            .ok_or_else(|| TransitionError::UnknownSubTransaction(local_tx_id.clone()))?;
        if allowed(child.state) {
            Ok(())
        } else {
            Err(TransitionError::InvalidSubTransition {
                event,
                local_tx_id: local_tx_id.clone(),
                state: child.state,
            })
        }
    }

    /// Apply a journaled event, returning the state changes it caused.
    pub fn apply(&mut self, recorded: &RecordedEvent) -> Result<Vec<StateChange>, TransitionError> {
        let event = &recorded.event;
        self.check(event)?;

        let at = recorded.recorded_at;
        let mut changes = Vec::new();

        match &event.kind {
            EventKind::SagaStarted { timeout_seconds } => {
                self.initiator = Some(event.participant.clone());
                self.started_at = Some(at);
                self.timeout_seconds = *timeout_seconds;
                changes.push(self.set_state(SagaState::Started));
            }
            EventKind::SagaEnded => {
                changes.push(self.set_state(SagaState::Ended));
                self.ended_at = Some(at);
            }
            EventKind::SagaAborted { reason } => {
                self.abort_cause = Some(AbortCause::Aborted {
                    reason: reason.clone(),
                });
                changes.push(self.set_state(SagaState::Aborting));
                changes.extend(self.settle(at));
            }
            EventKind::SagaTimeout => {
                self.abort_cause = Some(AbortCause::TimedOut);
                changes.push(self.set_state(SagaState::Aborting));
                changes.extend(self.settle(at));
            }
            EventKind::TxStarted {
                local_tx_id,
                parent_tx_id,
                compensation,
                reverse_retries,
                retry_delay_ms,
            } => {
                self.children.push(SubTransaction {
                    local_tx_id: local_tx_id.clone(),
                    parent_tx_id: parent_tx_id.clone(),
                    participant: event.participant.clone(),
                    state: TxState::Started,
                    compensation: compensation.clone(),
                    reverse_retries: *reverse_retries,
                    retry_delay_ms: *retry_delay_ms,
                    started_sequence: recorded.sequence,
                    completed_sequence: None,
                    completed_at: None,
                    compensation_attempts: 0,
                    failure_reason: None,
                });
                changes.push(StateChange::SubTransaction {
                    local_tx_id: local_tx_id.clone(),
                    from: None,
                    to: TxState::Started,
                });
            }
            EventKind::TxEnded { local_tx_id } => {
                if let Some(child) = self.child_mut(local_tx_id) {
                    child.completed_sequence = Some(recorded.sequence);
                    child.completed_at = Some(at);
                }
                changes.extend(self.set_child_state(local_tx_id, TxState::Ended));
            }
            EventKind::TxAborted { local_tx_id, reason } => {
                if let Some(child) = self.child_mut(local_tx_id) {
                    child.failure_reason = reason.clone();
                }
                changes.extend(self.set_child_state(local_tx_id, TxState::Aborted));
            }
            EventKind::TxCompensated { local_tx_id } => {
                changes.extend(self.set_child_state(local_tx_id, TxState::Compensated));
                changes.extend(self.settle(at));
            }
        }

        self.last_sequence = recorded.sequence;
        Ok(changes)
    }

    fn set_state(&mut self, to: SagaState) -> StateChange {
        let from = self.state.replace(to);
        StateChange::Saga { from, to }
    }

    fn set_child_state(&mut self, local_tx_id: &LocalTxId, to: TxState) -> Option<StateChange> {
        let child = self.child_mut(local_tx_id)?;
        let from = child.state;
        if from == to {
            return None;
        }
        child.state = to;
        Some(StateChange::SubTransaction {
            local_tx_id: local_tx_id.clone(),
            from: Some(from),
            to,
        })
    }

    /// `ABORTING` becomes `ABORTED` once nothing awaits compensation.
    fn settle(&mut self, at: DateTime<Utc>) -> Option<StateChange> {
        if self.state != Some(SagaState::Aborting) {
            return None;
        }
        if self.children.iter().any(|c| c.state.awaits_compensation()) {
            return None;
        }
        self.ended_at = Some(at);
        Some(self.set_state(SagaState::Aborted))
    }

    /// Children still awaiting compensation, most recently completed first.
    pub fn compensation_order(&self) -> Vec<&SubTransaction> {
        let mut pending: Vec<&SubTransaction> = self
            .children
            .iter()
            .filter(|c| c.state.awaits_compensation())
            .collect();
        pending.sort_by(|a, b| b.completed_sequence.cmp(&a.completed_sequence));
        pending
    }

    /// Next child to dispatch: the most recently completed `ENDED` child.
    pub fn next_compensation(&self) -> Option<&SubTransaction> {
        self.compensation_order()
            .into_iter()
            .find(|c| c.state == TxState::Ended)
    }

    pub fn compensation_in_flight(&self) -> bool {
        self.children.iter().any(|c| c.state == TxState::Compensating)
    }

    pub fn begin_compensation(&mut self, local_tx_id: &LocalTxId) -> Option<StateChange> {
        if self.state != Some(SagaState::Aborting) {
            return None;
        }
        match self.child(local_tx_id) {
            Some(child) if child.state == TxState::Ended => {
                self.set_child_state(local_tx_id, TxState::Compensating)
            }
            _ => None,
        }
    }

    pub fn record_compensation_attempt(&mut self, local_tx_id: &LocalTxId, attempt: u32) {
        if let Some(child) = self.child_mut(local_tx_id) {
            child.compensation_attempts = child.compensation_attempts.max(attempt);
        }
    }

    /// Flag a child whose compensation ran out of attempts. The saga stays `ABORTING`.
    pub fn fail_compensation(&mut self, local_tx_id: &LocalTxId, reason: String) -> Option<StateChange> {
        let child = self.child_mut(local_tx_id)?;
        if child.state != TxState::Compensating {
            return None;
        }
        child.failure_reason = Some(reason);
        self.set_child_state(local_tx_id, TxState::CompensationFailed)
    }

    /// Put in-flight compensations back to `ENDED` (used when the node loses primary).
    pub fn revert_in_flight_compensations(&mut self) -> Vec<StateChange> {
        self.reset_children(TxState::Compensating)
    }

    /// Put exhausted compensations back to `ENDED` so they are dispatched again.
    pub fn reset_failed_compensations(&mut self) -> Vec<StateChange> {
        let changes = self.reset_children(TxState::CompensationFailed);
        for change in &changes {
            if let StateChange::SubTransaction { local_tx_id, .. } = change {
                if let Some(child) = self.child_mut(local_tx_id) {
                    child.compensation_attempts = 0;
                }
            }
        }
        changes
    }

    fn reset_children(&mut self, from: TxState) -> Vec<StateChange> {
        let ids: Vec<LocalTxId> = self
            .children
            .iter()
            .filter(|c| c.state == from)
            .map(|c| c.local_tx_id.clone())
            .collect();
        ids.iter()
            .filter_map(|id| self.set_child_state(id, TxState::Ended))
            .collect()
    }

    pub fn failed_compensations(&self) -> Vec<&SubTransaction> {
        self.children
            .iter()
            .filter(|c| c.state == TxState::CompensationFailed)
            .collect()
    }
}

/// Read-only view exposed to status reporters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionStatus {
    pub global_tx_id: GlobalTxId,
    pub state: Option<SagaState>,
    pub started_at: Option<DateTime<Utc>>,
    pub timeout_seconds: u64,
    pub ended_at: Option<DateTime<Utc>>,
    pub abort_cause: Option<AbortCause>,
    pub children: Vec<SubTransactionStatus>,
    /// Children still to be undone, in dispatch order.
    pub pending_compensations: Vec<LocalTxId>,
    pub failed_compensations: Vec<LocalTxId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTransactionStatus {
    pub local_tx_id: LocalTxId,
    pub participant: ParticipantId,
    pub state: TxState,
    pub compensation_attempts: u32,
}

impl From<&GlobalTransaction> for TransactionStatus {
    fn from(transaction: &GlobalTransaction) -> Self {
        Self {
            global_tx_id: transaction.id.clone(),
            state: transaction.state,
            started_at: transaction.started_at,
            timeout_seconds: transaction.timeout_seconds,
            ended_at: transaction.ended_at,
            abort_cause: transaction.abort_cause.clone(),
            children: transaction
                .children
                .iter()
                .map(|c| SubTransactionStatus {
                    local_tx_id: c.local_tx_id.clone(),
                    participant: c.participant.clone(),
                    state: c.state,
                    compensation_attempts: c.compensation_attempts,
                })
                .collect(),
            pending_compensations: transaction
                .compensation_order()
                .into_iter()
                .filter(|c| c.state != TxState::CompensationFailed)
                .map(|c| c.local_tx_id.clone())
                .collect(),
            failed_compensations: transaction
                .failed_compensations()
                .into_iter()
                .map(|c| c.local_tx_id.clone())
                .collect(),
        }
    }
}
