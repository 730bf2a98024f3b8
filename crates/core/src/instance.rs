// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker instance records for fleet coordination.

use crate::session::AgentId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

crate::define_id! {
    /// Identity of one worker process; regenerated on every start.
    pub struct InstanceId;
}

impl InstanceId {
    pub const PREFIX: &'static str = "ins-";

    pub fn random() -> Self {
        Self::generate(Self::PREFIX)
    }
}

/// One record per live worker process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub instance_id: InstanceId,
    pub host: String,
    pub process_id: u32,
    pub started_at_ms: u64,
    pub last_heartbeat_ms: u64,
    #[serde(default)]
    pub assigned: BTreeSet<AgentId>,
    pub capacity: usize,
}

impl InstanceRecord {
    /// A record whose heartbeat is older than `timeout_ms` is dead.
    pub fn is_live(&self, now_ms: u64, timeout_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_heartbeat_ms) < timeout_ms
    }

    pub fn load(&self) -> usize {
        self.assigned.len()
    }

    pub fn has_capacity(&self) -> bool {
        self.load() < self.capacity
    }
}

#[cfg(test)]
#[path = "instance_tests.rs"]
mod tests;
