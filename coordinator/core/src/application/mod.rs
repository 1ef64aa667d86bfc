// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod compensation;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod role_gate;
pub mod timeout_monitor;
pub mod worker;

pub use coordinator::{CoordinatorSettings, SagaCoordinator};
pub use error::{CoordinatorError, RejectReason, SubmitOutcome};
pub use registry::{RebuildSummary, TransactionRegistry};
pub use worker::TransactionHandle;
