// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-agent initialization locks.
//!
//! Concurrent initialize calls for one agent collapse to one. A lock older
//! than the TTL is presumed abandoned and force-cleared.

use parking_lot::Mutex;
use sb_core::AgentId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
struct Held {
    token: u64,
    acquired_at_ms: u64,
}

#[derive(Debug)]
pub struct InitLocks {
    ttl: Duration,
    held: Mutex<HashMap<AgentId, Held>>,
    next_token: AtomicU64,
}

/// Releases the lock on drop, unless it was force-cleared meanwhile.
#[derive(Debug)]
pub struct InitLockGuard<'a> {
    locks: &'a InitLocks,
    agent: AgentId,
    token: u64,
}

impl InitLocks {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, held: Mutex::new(HashMap::new()), next_token: AtomicU64::new(1) }
    }

    pub fn try_acquire(&self, agent: &AgentId, now_ms: u64) -> Option<InitLockGuard<'_>> {
        let mut held = self.held.lock();
        if let Some(existing) = held.get(agent) {
            let age_ms = now_ms.saturating_sub(existing.acquired_at_ms);
            if age_ms < self.ttl.as_millis() as u64 {
                return None;
            }
            tracing::warn!(agent_id = %agent, age_ms, "clearing stale initialization lock");
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        held.insert(agent.clone(), Held { token, acquired_at_ms: now_ms });
        Some(InitLockGuard { locks: self, agent: agent.clone(), token })
    }

    pub fn is_held(&self, agent: &AgentId) -> bool {
        self.held.lock().contains_key(agent)
    }

    fn release(&self, agent: &AgentId, token: u64) {
        let mut held = self.held.lock();
        if held.get(agent).is_some_and(|h| h.token == token) {
            held.remove(agent);
        }
    }
}

impl Drop for InitLockGuard<'_> {
    fn drop(&mut self) {
        self.locks.release(&self.agent, self.token);
    }
}

#[cfg(test)]
#[path = "locks_tests.rs"]
mod tests;
