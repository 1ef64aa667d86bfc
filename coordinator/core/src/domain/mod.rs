// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Pure types and collaborator contracts of the coordinator.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Events, the transaction state machine, and the traits the
//!   application layer depends on

pub mod cluster;
pub mod compensation;
pub mod config;
pub mod events;
pub mod journal;
pub mod participant;
pub mod repository;
pub mod transaction;
