// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Channel-backed participant sink.
//!
//! Hands compensation commands to whatever transport owns the receiving end
//! (the CLI writes them to stdout; a network front end would forward them to
//! the participant's connection).

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::participant::{CompensationCommand, DispatchError, ParticipantSink};

pub struct ChannelParticipantSink {
    sender: mpsc::Sender<CompensationCommand>,
}

impl ChannelParticipantSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<CompensationCommand>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl ParticipantSink for ChannelParticipantSink {
    async fn dispatch_compensation(&self, command: &CompensationCommand) -> Result<(), DispatchError> {
        self.sender
            .send(command.clone())
            .await
            .map_err(|_| DispatchError::Closed)
    }
}
