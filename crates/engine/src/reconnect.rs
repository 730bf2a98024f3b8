// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconnection bookkeeping.
//!
//! At most one pending attempt exists per agent. The record is destroyed on
//! a successful open, on cancellation, and when the ceiling is exceeded.

use crate::backoff::BackoffPolicy;
use sb_core::AgentId;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryMode {
    /// Retry now without counting toward the ceiling
    Immediate,
    Backoff,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectionAttempt {
    pub attempt_count: u32,
    pub next_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    Retry { delay: Duration, attempt: u32 },
    Exhausted { attempts: u32 },
}

#[derive(Debug)]
pub struct ReconnectScheduler {
    policy: BackoffPolicy,
    attempts: HashMap<AgentId, ReconnectionAttempt>,
}

impl ReconnectScheduler {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempts: HashMap::new() }
    }

    pub fn schedule(&mut self, agent: &AgentId, mode: RetryMode) -> ReconnectDecision {
        let entry = self
            .attempts
            .entry(agent.clone())
            .or_insert(ReconnectionAttempt { attempt_count: 0, next_delay: Duration::ZERO });

        if mode == RetryMode::Immediate {
            entry.next_delay = Duration::ZERO;
            return ReconnectDecision::Retry { delay: Duration::ZERO, attempt: entry.attempt_count };
        }

        if entry.attempt_count >= self.policy.max_attempts {
            let attempts = entry.attempt_count;
            self.attempts.remove(agent);
            return ReconnectDecision::Exhausted { attempts };
        }

        let delay = self.policy.delay(entry.attempt_count, agent);
        entry.attempt_count += 1;
        entry.next_delay = delay;
        ReconnectDecision::Retry { delay, attempt: entry.attempt_count }
    }

    /// Drop the pending attempt and reset the counter.
    pub fn cancel(&mut self, agent: &AgentId) -> Option<ReconnectionAttempt> {
        self.attempts.remove(agent)
    }

    pub fn attempts(&self, agent: &AgentId) -> u32 {
        self.attempts.get(agent).map_or(0, |a| a.attempt_count)
    }

    pub fn pending(&self, agent: &AgentId) -> Option<&ReconnectionAttempt> {
        self.attempts.get(agent)
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}

#[cfg(test)]
#[path = "reconnect_tests.rs"]
mod tests;
