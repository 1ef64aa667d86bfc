// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Coordinator Events
//
// Provides in-memory event streaming using tokio broadcast channels.
// Operators, the CLI and tests observe state changes and compensation
// progress through it. Events are lost on restart; the journal is the
// durable record.

use crate::domain::events::CoordinatorEvent;
use crate::domain::transaction::GlobalTxId;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Event bus for publishing and subscribing to coordinator events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<CoordinatorEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    /// Capacity determines how many events can be buffered before dropping old ones
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1024)
    pub fn with_default_capacity() -> Self {
        Self::new(1024)
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: CoordinatorEvent) {
        debug!("Publishing event: {:?}", event);

        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all coordinator events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe and filter for one global transaction
    pub fn subscribe_transaction(&self, global_tx_id: GlobalTxId) -> TransactionEventReceiver {
        TransactionEventReceiver {
            receiver: self.sender.subscribe(),
            global_tx_id,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all coordinator events
pub struct EventReceiver {
    receiver: broadcast::Receiver<CoordinatorEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<CoordinatorEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<CoordinatorEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver for one transaction's events (filtered)
pub struct TransactionEventReceiver {
    receiver: broadcast::Receiver<CoordinatorEvent>,
    global_tx_id: GlobalTxId,
}

impl TransactionEventReceiver {
    /// Receive the next event belonging to the subscribed transaction
    pub async fn recv(&mut self) -> Result<CoordinatorEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if event.global_tx_id() == Some(&self.global_tx_id) {
                return Ok(event);
            }
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}
