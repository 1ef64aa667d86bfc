// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Saga Coordinator Core
//!
//! Event-sourced transaction state-machine engine for saga / TCC coordination.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Journal, per-transaction state machines, timeout detection
//!   and compensation ordering

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
