// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Compensation retry policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::transaction::SubTransaction;

/// Bounded exponential backoff for compensation dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationPolicy {
    /// Attempts before a child is marked `CompensationFailed`.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// How long to wait for a `TxCompensatedEvent` after a successful send.
    pub ack_timeout: Duration,
}

impl Default for CompensationPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            ack_timeout: Duration::from_secs(30),
        }
    }
}

impl CompensationPolicy {
    /// Delay before retrying after failed attempt `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_backoff.as_millis() as f64 {
            return self.max_backoff;
        }
        Duration::from_millis(scaled.max(0.0).round() as u64)
    }

    /// Apply the per-participant overrides carried on `TxStartedEvent`.
    pub fn for_child(&self, child: &SubTransaction) -> CompensationPolicy {
        let mut policy = self.clone();
        if let Some(retries) = child.reverse_retries {
            policy.max_attempts = retries.max(1);
        }
        if let Some(delay) = child.retry_delay_ms {
            policy.initial_backoff = Duration::from_millis(delay);
        }
        policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = CompensationPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            multiplier: 2.0,
            ..Default::default()
        };

        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(60), Duration::from_millis(500));
    }
}
