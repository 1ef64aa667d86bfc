// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Participant Sink
//!
//! Outbound side of the protocol: compensation commands are handed to a
//! [`ParticipantSink`], which delivers them to the owning participant. Delivery
//! is fire-and-forget; the acknowledgement comes back later as a
//! `TxCompensatedEvent` through the normal submit path.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::events::{CompensationPayload, ParticipantId};
use crate::domain::transaction::{GlobalTxId, LocalTxId};

/// Instruction for a participant to undo one completed sub-transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationCommand {
    pub global_tx_id: GlobalTxId,
    pub local_tx_id: LocalTxId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_tx_id: Option<LocalTxId>,
    pub participant: ParticipantId,
    pub payload: CompensationPayload,
    /// 1-based dispatch attempt.
    pub attempt: u32,
}

#[async_trait]
pub trait ParticipantSink: Send + Sync {
    async fn dispatch_compensation(&self, command: &CompensationCommand) -> Result<(), DispatchError>;
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Participant {0} is unavailable")]
    Unavailable(String),

    #[error("Participant sink closed")]
    Closed,

    #[error("Dispatch failed: {0}")]
    Failed(String),
}
