// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Role providers.

use tokio::sync::watch;
use tracing::info;

use crate::domain::cluster::{NodeRole, RoleProvider};

/// Fixed role, for single-node deployments.
pub struct StaticRoleProvider {
    role: NodeRole,
    // Held so subscribers never observe a closed channel.
    sender: watch::Sender<NodeRole>,
}

impl StaticRoleProvider {
    pub fn new(role: NodeRole) -> Self {
        let (sender, _) = watch::channel(role);
        Self { role, sender }
    }

    pub fn primary() -> Self {
        Self::new(NodeRole::Primary)
    }
}

impl RoleProvider for StaticRoleProvider {
    fn current_role(&self) -> NodeRole {
        self.role
    }

    fn subscribe(&self) -> watch::Receiver<NodeRole> {
        self.sender.subscribe()
    }
}

/// Role driven by an external leader-election component.
pub struct SwitchableRoleProvider {
    sender: watch::Sender<NodeRole>,
}

impl SwitchableRoleProvider {
    pub fn new(initial: NodeRole) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    /// Record the outcome of an election. Returns the previous role.
    pub fn set_role(&self, role: NodeRole) -> NodeRole {
        let previous = self.sender.send_replace(role);
        if previous != role {
            info!(from = %previous, to = %role, "Node role changed");
        }
        previous
    }
}

impl RoleProvider for SwitchableRoleProvider {
    fn current_role(&self) -> NodeRole {
        *self.sender.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<NodeRole> {
        self.sender.subscribe()
    }
}
