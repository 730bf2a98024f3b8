// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Exponential backoff with per-agent deterministic jitter.

use sb_core::AgentId;
use sha2::{Digest, Sha256};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
    /// Upper bound (inclusive) of the per-agent jitter
    pub max_jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            max: Duration::from_secs(60),
            max_attempts: 10,
            max_jitter: Duration::from_secs(1),
        }
    }
}

impl BackoffPolicy {
    /// Delay before reconnect attempt number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32, agent: &AgentId) -> Duration {
        self.base_delay(attempt) + self.jitter(agent)
    }

    /// `min(max, base * 2^attempt)` without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
    }

    /// Jitter derived from the agent identity.
    ///
    /// Constant for one agent, spread across agents so a fleet-wide outage
    /// does not reconnect everyone in lockstep.
    pub fn jitter(&self, agent: &AgentId) -> Duration {
        let span = self.max_jitter.as_millis() as u64;
        if span == 0 {
            return Duration::ZERO;
        }
        let digest = Sha256::digest(agent.as_str().as_bytes());
        let mut seed = [0u8; 8];
        seed.copy_from_slice(&digest[..8]);
        Duration::from_millis(u64::from_be_bytes(seed) % (span + 1))
    }
}

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;
