// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Cluster Role
//!
//! Only the primary coordinator of a cluster drives timeouts and compensation.
//! Leader election itself is external; the engine only observes its outcome
//! through a [`RoleProvider`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    #[default]
    Primary,
    Secondary,
}

impl NodeRole {
    pub fn is_primary(self) -> bool {
        self == NodeRole::Primary
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Primary => f.write_str("primary"),
            NodeRole::Secondary => f.write_str("secondary"),
        }
    }
}

impl FromStr for NodeRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "primary" | "master" => Ok(NodeRole::Primary),
            "secondary" | "slave" | "standby" => Ok(NodeRole::Secondary),
            other => Err(format!("unknown node role '{}'", other)),
        }
    }
}

/// Source of truth for this node's role.
pub trait RoleProvider: Send + Sync {
    fn current_role(&self) -> NodeRole;

    /// Receiver that observes every role change.
    fn subscribe(&self) -> watch::Receiver<NodeRole>;
}
