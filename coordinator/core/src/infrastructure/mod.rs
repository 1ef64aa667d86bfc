// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod event_bus;
pub mod journal;
pub mod participant;
pub mod repositories;
pub mod role;

pub use event_bus::EventBus;
pub use journal::{FileEventJournal, InMemoryEventJournal};
pub use participant::ChannelParticipantSink;
pub use repositories::InMemoryTransactionRepository;
pub use role::{StaticRoleProvider, SwitchableRoleProvider};
