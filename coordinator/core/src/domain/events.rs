// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Transaction Events
//!
//! Two families of events live here:
//!
//! - [`TransactionEvent`]: immutable lifecycle facts emitted by participants
//!   (plus the coordinator-internal `SagaTimeoutEvent`). These are what the
//!   journal stores and what the state machine applies.
//! - [`CoordinatorEvent`]: observations published on the in-process event bus
//!   after the engine reacts (state changes, compensation progress, role changes).
//!
//! The `type` tag of [`EventKind`] uses the participant wire names
//! (`SagaStartedEvent`, `TxEndedEvent`, ...).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::cluster::NodeRole;
use crate::domain::transaction::{GlobalTxId, LocalTxId, SagaState, TxState};

/// Service (and optionally instance) that emitted an event or must receive a
/// compensation command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantId {
    pub service_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

impl ParticipantId {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            instance_id: None,
        }
    }

    pub fn with_instance(service_name: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            instance_id: Some(instance_id.into()),
        }
    }

    /// Identity used for events the coordinator synthesizes itself.
    pub fn coordinator() -> Self {
        Self::new("saga-coordinator")
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instance_id {
            Some(instance) => write!(f, "{}/{}", self.service_name, instance),
            None => write!(f, "{}", self.service_name),
        }
    }
}

/// Data a participant needs to undo a completed sub-transaction.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CompensationPayload {
    /// Compensation method reference declared by the participant.
    pub method: String,
    /// Arguments captured when the sub-transaction started.
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl CompensationPayload {
    pub fn new(method: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }
}

/// Kind-specific part of a [`TransactionEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventKind {
    #[serde(rename = "SagaStartedEvent")]
    SagaStarted {
        /// `0` means the saga never times out.
        #[serde(default)]
        timeout_seconds: u64,
    },
    #[serde(rename = "SagaEndedEvent")]
    SagaEnded,
    #[serde(rename = "SagaAbortedEvent")]
    SagaAborted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename = "SagaTimeoutEvent")]
    SagaTimeout,
    #[serde(rename = "TxStartedEvent")]
    TxStarted {
        local_tx_id: LocalTxId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_tx_id: Option<LocalTxId>,
        #[serde(default)]
        compensation: CompensationPayload,
        /// Per-participant override of the compensation attempt ceiling.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reverse_retries: Option<u32>,
        /// Per-participant override of the initial compensation backoff.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_delay_ms: Option<u64>,
    },
    #[serde(rename = "TxEndedEvent")]
    TxEnded { local_tx_id: LocalTxId },
    #[serde(rename = "TxAbortedEvent")]
    TxAborted {
        local_tx_id: LocalTxId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename = "TxCompensatedEvent")]
    TxCompensated { local_tx_id: LocalTxId },
}

/// Fieldless discriminant of [`EventKind`], used for logs, metrics and dedup keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    SagaStartedEvent,
    SagaEndedEvent,
    SagaAbortedEvent,
    SagaTimeoutEvent,
    TxStartedEvent,
    TxEndedEvent,
    TxAbortedEvent,
    TxCompensatedEvent,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SagaStartedEvent => "SagaStartedEvent",
            EventType::SagaEndedEvent => "SagaEndedEvent",
            EventType::SagaAbortedEvent => "SagaAbortedEvent",
            EventType::SagaTimeoutEvent => "SagaTimeoutEvent",
            EventType::TxStartedEvent => "TxStartedEvent",
            EventType::TxEndedEvent => "TxEndedEvent",
            EventType::TxAbortedEvent => "TxAbortedEvent",
            EventType::TxCompensatedEvent => "TxCompensatedEvent",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EventKind {
    pub fn event_type(&self) -> EventType {
        match self {
            EventKind::SagaStarted { .. } => EventType::SagaStartedEvent,
            EventKind::SagaEnded => EventType::SagaEndedEvent,
            EventKind::SagaAborted { .. } => EventType::SagaAbortedEvent,
            EventKind::SagaTimeout => EventType::SagaTimeoutEvent,
            EventKind::TxStarted { .. } => EventType::TxStartedEvent,
            EventKind::TxEnded { .. } => EventType::TxEndedEvent,
            EventKind::TxAborted { .. } => EventType::TxAbortedEvent,
            EventKind::TxCompensated { .. } => EventType::TxCompensatedEvent,
        }
    }

    /// Local transaction id for sub-transaction events, `None` for saga-level events.
    pub fn local_tx_id(&self) -> Option<&LocalTxId> {
        match self {
            EventKind::TxStarted { local_tx_id, .. }
            | EventKind::TxEnded { local_tx_id }
            | EventKind::TxAborted { local_tx_id, .. }
            | EventKind::TxCompensated { local_tx_id } => Some(local_tx_id),
            _ => None,
        }
    }
}

/// A lifecycle fact about one global transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub global_tx_id: GlobalTxId,
    pub participant: ParticipantId,
    /// Distinguishes two genuinely different events that share kind and ids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default = "default_created_at")]
    pub created_at: DateTime<Utc>,
    pub kind: EventKind,
}

fn default_created_at() -> DateTime<Utc> {
    Utc::now()
}

impl TransactionEvent {
    pub fn new(global_tx_id: GlobalTxId, participant: ParticipantId, kind: EventKind) -> Self {
        Self {
            global_tx_id,
            participant,
            idempotency_key: None,
            created_at: Utc::now(),
            kind,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn saga_started(global_tx_id: GlobalTxId, participant: ParticipantId, timeout_seconds: u64) -> Self {
        Self::new(global_tx_id, participant, EventKind::SagaStarted { timeout_seconds })
    }

    pub fn saga_ended(global_tx_id: GlobalTxId, participant: ParticipantId) -> Self {
        Self::new(global_tx_id, participant, EventKind::SagaEnded)
    }

    pub fn saga_aborted(global_tx_id: GlobalTxId, participant: ParticipantId, reason: Option<String>) -> Self {
        Self::new(global_tx_id, participant, EventKind::SagaAborted { reason })
    }

    /// Synthetic timeout raised by the coordinator itself.
    pub fn saga_timeout(global_tx_id: GlobalTxId) -> Self {
        Self::new(global_tx_id, ParticipantId::coordinator(), EventKind::SagaTimeout)
    }

    pub fn tx_started(
        global_tx_id: GlobalTxId,
        local_tx_id: LocalTxId,
        participant: ParticipantId,
        compensation: CompensationPayload,
    ) -> Self {
        Self::new(
            global_tx_id,
            participant,
            EventKind::TxStarted {
                local_tx_id,
                parent_tx_id: None,
                compensation,
                reverse_retries: None,
                retry_delay_ms: None,
            },
        )
    }

    pub fn tx_ended(global_tx_id: GlobalTxId, local_tx_id: LocalTxId, participant: ParticipantId) -> Self {
        Self::new(global_tx_id, participant, EventKind::TxEnded { local_tx_id })
    }

    pub fn tx_aborted(
        global_tx_id: GlobalTxId,
        local_tx_id: LocalTxId,
        participant: ParticipantId,
        reason: Option<String>,
    ) -> Self {
        Self::new(global_tx_id, participant, EventKind::TxAborted { local_tx_id, reason })
    }

    pub fn tx_compensated(global_tx_id: GlobalTxId, local_tx_id: LocalTxId, participant: ParticipantId) -> Self {
        Self::new(global_tx_id, participant, EventKind::TxCompensated { local_tx_id })
    }

    pub fn event_type(&self) -> EventType {
        self.kind.event_type()
    }

    pub fn local_tx_id(&self) -> Option<&LocalTxId> {
        self.kind.local_tx_id()
    }

    pub fn is_saga_start(&self) -> bool {
        matches!(self.kind, EventKind::SagaStarted { .. })
    }

    /// Key the journal uses to detect redelivery: kind + ids + idempotency key.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.event_type(),
            self.global_tx_id,
            self.local_tx_id().map(LocalTxId::as_str).unwrap_or("-"),
            self.idempotency_key.as_deref().unwrap_or("-"),
        )
    }
}

/// An event as stored in the journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// Journal-wide arrival sequence number (starts at 1).
    pub sequence: u64,
    pub recorded_at: DateTime<Utc>,
    pub event: TransactionEvent,
}

/// Observations published by the engine on the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    SagaStateChanged {
        global_tx_id: GlobalTxId,
        from: Option<SagaState>,
        to: SagaState,
        changed_at: DateTime<Utc>,
    },
    SubTransactionStateChanged {
        global_tx_id: GlobalTxId,
        local_tx_id: LocalTxId,
        from: Option<TxState>,
        to: TxState,
        changed_at: DateTime<Utc>,
    },
    CompensationDispatched {
        global_tx_id: GlobalTxId,
        local_tx_id: LocalTxId,
        participant: ParticipantId,
        attempt: u32,
        dispatched_at: DateTime<Utc>,
    },
    CompensationDispatchFailed {
        global_tx_id: GlobalTxId,
        local_tx_id: LocalTxId,
        attempt: u32,
        error: String,
        failed_at: DateTime<Utc>,
    },
    CompensationExhausted {
        global_tx_id: GlobalTxId,
        local_tx_id: LocalTxId,
        attempts: u32,
        last_error: String,
        exhausted_at: DateTime<Utc>,
    },
    TimeoutFired {
        global_tx_id: GlobalTxId,
        fired_at: DateTime<Utc>,
    },
    EventRejected {
        global_tx_id: GlobalTxId,
        event_type: EventType,
        reason: String,
        rejected_at: DateTime<Utc>,
    },
    RoleChanged {
        from: NodeRole,
        to: NodeRole,
        changed_at: DateTime<Utc>,
    },
    TransactionEvicted {
        global_tx_id: GlobalTxId,
        final_state: Option<SagaState>,
        evicted_at: DateTime<Utc>,
    },
}

impl CoordinatorEvent {
    /// Transaction the observation belongs to, if any.
    pub fn global_tx_id(&self) -> Option<&GlobalTxId> {
        match self {
            CoordinatorEvent::SagaStateChanged { global_tx_id, .. }
            | CoordinatorEvent::SubTransactionStateChanged { global_tx_id, .. }
            | CoordinatorEvent::CompensationDispatched { global_tx_id, .. }
            | CoordinatorEvent::CompensationDispatchFailed { global_tx_id, .. }
            | CoordinatorEvent::CompensationExhausted { global_tx_id, .. }
            | CoordinatorEvent::TimeoutFired { global_tx_id, .. }
            | CoordinatorEvent::EventRejected { global_tx_id, .. }
            | CoordinatorEvent::TransactionEvicted { global_tx_id, .. } => Some(global_tx_id),
            CoordinatorEvent::RoleChanged { .. } => None,
        }
    }
}
