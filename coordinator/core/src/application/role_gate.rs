// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Cluster Role Gate
//!
//! Answers "may this node drive timeouts and compensation right now?".
//! Event intake, journaling and state tracking run on every node; only the
//! side-effecting drivers consult the gate.

use std::sync::Arc;
use tokio::sync::watch;

use crate::domain::cluster::{NodeRole, RoleProvider};

#[derive(Clone)]
pub struct ClusterRoleGate {
    provider: Arc<dyn RoleProvider>,
}

impl ClusterRoleGate {
    pub fn new(provider: Arc<dyn RoleProvider>) -> Self {
        Self { provider }
    }

    pub fn role(&self) -> NodeRole {
        self.provider.current_role()
    }

    pub fn is_primary(&self) -> bool {
        self.role().is_primary()
    }

    /// Observe role changes.
    pub fn changes(&self) -> watch::Receiver<NodeRole> {
        self.provider.subscribe()
    }
}
