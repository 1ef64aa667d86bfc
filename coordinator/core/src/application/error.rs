// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Submit outcomes and coordinator errors.
//!
//! Per-event protocol problems (duplicates, orphans, illegal transitions) are
//! ordinary [`SubmitOutcome`]s. Only failures that mean "this event was not
//! recorded, retry delivery" are [`CoordinatorError`]s.

use std::fmt;
use thiserror::Error;

use crate::domain::events::EventType;
use crate::domain::journal::JournalError;
use crate::domain::repository::RepositoryError;
use crate::domain::transaction::{GlobalTxId, TransitionError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Journaled and applied.
    Accepted { sequence: u64 },
    /// Already journaled earlier; nothing changed.
    Duplicate,
    /// Not journaled; transaction state unchanged.
    Rejected(RejectReason),
}

impl SubmitOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmitOutcome::Accepted { .. })
    }

    /// Label used for the `outcome` metric dimension.
    pub fn label(&self) -> &'static str {
        match self {
            SubmitOutcome::Accepted { .. } => "accepted",
            SubmitOutcome::Duplicate => "duplicate",
            SubmitOutcome::Rejected(RejectReason::Orphan) => "orphan",
            SubmitOutcome::Rejected(RejectReason::CoordinatorOnly(_)) => "coordinator_only",
            SubmitOutcome::Rejected(RejectReason::IllegalTransition(_)) => "illegal_transition",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Unknown global transaction and not a start event.
    Orphan,
    /// Event type only the coordinator itself may record.
    CoordinatorOnly(EventType),
    IllegalTransition(TransitionError),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Orphan => f.write_str("orphan event for unknown transaction"),
            RejectReason::CoordinatorOnly(event_type) => {
                write!(f, "{} is recorded by the coordinator only", event_type)
            }
            RejectReason::IllegalTransition(e) => write!(f, "illegal transition: {}", e),
        }
    }
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Event could not be journaled: {0}")]
    Journal(#[from] JournalError),

    #[error("Worker for transaction {0} has stopped")]
    WorkerStopped(GlobalTxId),

    #[error("Transaction {0} is not live")]
    NotFound(GlobalTxId),

    #[error("Transaction history error: {0}")]
    Repository(#[from] RepositoryError),
}
