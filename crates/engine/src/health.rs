// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error counters and the fleet health snapshot.

use crate::cache::CacheStats;
use crate::classify::Classification;
use sb_core::{AgentStatus, InstanceId};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counters, incremented from any task.
#[derive(Debug, Default)]
pub struct Counters {
    pub conflicts: AtomicU64,
    pub reconnects: AtomicU64,
    pub holds: AtomicU64,
    pub exhausted: AtomicU64,
    pub relinks_issued: AtomicU64,
    pub stale_events: AtomicU64,
    pub flush_failures: AtomicU64,
    pub retry_failures: AtomicU64,
    /// Deferred records dropped because the backlog was full
    pub backlog_shed: AtomicU64,
    pub forward_give_ups: AtomicU64,
    pub dedup_drops: AtomicU64,
    pub echo_drops: AtomicU64,
    pub filtered: AtomicU64,
    pub effect_errors: AtomicU64,
    /// Agents released after a peer took ownership
    pub ownership_lost: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        Self::add(counter, 1);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_classification(&self, class: Classification) {
        let counter = match class {
            Classification::LoggedOut
            | Classification::Superseded
            | Classification::Corrupted
            | Classification::Rejected => &self.conflicts,
            Classification::PairingRestart | Classification::Transient => &self.reconnects,
            Classification::RateLimited => &self.holds,
        };
        Self::bump(counter);
    }

    pub fn snapshot(&self) -> ErrorStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        ErrorStats {
            conflicts: get(&self.conflicts),
            reconnects: get(&self.reconnects),
            holds: get(&self.holds),
            exhausted: get(&self.exhausted),
            relinks_issued: get(&self.relinks_issued),
            stale_events: get(&self.stale_events),
            flush_failures: get(&self.flush_failures),
            retry_failures: get(&self.retry_failures),
            backlog_shed: get(&self.backlog_shed),
            forward_give_ups: get(&self.forward_give_ups),
            dedup_drops: get(&self.dedup_drops),
            echo_drops: get(&self.echo_drops),
            filtered: get(&self.filtered),
            effect_errors: get(&self.effect_errors),
            ownership_lost: get(&self.ownership_lost),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorStats {
    pub conflicts: u64,
    pub reconnects: u64,
    pub holds: u64,
    pub exhausted: u64,
    pub relinks_issued: u64,
    pub stale_events: u64,
    pub flush_failures: u64,
    pub retry_failures: u64,
    pub backlog_shed: u64,
    pub forward_give_ups: u64,
    pub dedup_drops: u64,
    pub echo_drops: u64,
    pub filtered: u64,
    pub effect_errors: u64,
    pub ownership_lost: u64,
}

/// Point-in-time view of this instance and its peers.
#[derive(Debug, Clone, Serialize)]
pub struct FleetHealth {
    pub instance_id: InstanceId,
    pub live_instances: usize,
    /// Load of every live instance, this one included
    pub peers: BTreeMap<InstanceId, usize>,
    pub local_agents: usize,
    pub capacity: usize,
    pub agents_by_status: BTreeMap<AgentStatus, usize>,
    pub cache: CacheStats,
    pub errors: ErrorStats,
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;
