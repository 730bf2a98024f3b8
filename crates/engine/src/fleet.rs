// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fleet coordination across worker instances.
//!
//! Every ownership change goes through the store's compare-and-set claim, so
//! two instances racing for one agent produce exactly one winner.

use sb_adapters::ProcessProbe;
use sb_core::{AgentId, Clock, InstanceId, InstanceRecord, OwnerStamp};
use sb_storage::{AgentStore, ClaimOutcome, StoreError};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FleetError {
    #[error("agent {agent_id} is owned by live instance {} on {}", owner.instance_id, owner.host)]
    OwnedElsewhere { agent_id: AgentId, owner: OwnerStamp },
    #[error("instance at capacity ({capacity} agents)")]
    CapacityExceeded { capacity: usize, redirect: Option<InstanceId> },
    #[error("agent not found: {0}")]
    AgentNotFound(AgentId),
    #[error("ownership of {0} changed during the claim")]
    ClaimRaced(AgentId),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("store request timed out")]
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    /// This instance already held the agent
    AlreadyOwned,
    /// Newly claimed; carries the dead owner that was superseded, if any
    Claimed { superseded: Option<OwnerStamp> },
}

/// An agent whose recorded owner is no longer alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Orphan {
    pub agent_id: AgentId,
    pub owner: OwnerStamp,
}

pub struct FleetCoordinator<C: Clock> {
    store: Arc<dyn AgentStore>,
    probe: Arc<dyn ProcessProbe>,
    clock: C,
    instance_id: InstanceId,
    host: String,
    process_id: u32,
    started_at_ms: u64,
    capacity: usize,
    liveness_timeout: Duration,
    op_timeout: Duration,
}

impl<C: Clock> FleetCoordinator<C> {
    pub fn new(
        store: Arc<dyn AgentStore>,
        probe: Arc<dyn ProcessProbe>,
        clock: C,
        capacity: usize,
        liveness_timeout: Duration,
        op_timeout: Duration,
    ) -> Self {
        let host = probe.host();
        let process_id = probe.process_id();
        let started_at_ms = clock.epoch_ms();
        Self {
            store,
            probe,
            clock,
            instance_id: InstanceId::random(),
            host,
            process_id,
            started_at_ms,
            capacity,
            liveness_timeout,
            op_timeout,
        }
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn record(&self, assigned: BTreeSet<AgentId>) -> InstanceRecord {
        InstanceRecord {
            instance_id: self.instance_id.clone(),
            host: self.host.clone(),
            process_id: self.process_id,
            started_at_ms: self.started_at_ms,
            last_heartbeat_ms: self.clock.epoch_ms(),
            assigned,
            capacity: self.capacity,
        }
    }

    fn stamp(&self) -> OwnerStamp {
        OwnerStamp {
            instance_id: self.instance_id.clone(),
            host: self.host.clone(),
            process_id: self.process_id,
            claimed_at_ms: self.clock.epoch_ms(),
        }
    }

    pub async fn register(&self) -> Result<InstanceRecord, FleetError> {
        let record = self.record(BTreeSet::new());
        self.bounded(self.store.upsert_instance(record.clone())).await?;
        tracing::info!(
            instance_id = %self.instance_id,
            host = %self.host,
            pid = self.process_id,
            capacity = self.capacity,
            "instance registered"
        );
        Ok(record)
    }

    /// Refresh liveness. Re-registers if a peer pruned this record.
    pub async fn heartbeat(&self, assigned: BTreeSet<AgentId>) -> Result<(), FleetError> {
        let now_ms = self.clock.epoch_ms();
        let refreshed = self
            .bounded(self.store.heartbeat_instance(&self.instance_id, now_ms, assigned.clone()))
            .await?;
        if !refreshed {
            tracing::warn!(
                instance_id = %self.instance_id,
                "instance record missing, re-registering"
            );
            self.bounded(self.store.upsert_instance(self.record(assigned))).await?;
        }
        Ok(())
    }

    pub async fn list_live(&self) -> Result<Vec<InstanceRecord>, FleetError> {
        let now_ms = self.clock.epoch_ms();
        let timeout_ms = self.liveness_timeout.as_millis() as u64;
        let instances = self.bounded(self.store.list_instances()).await?;
        Ok(instances
            .into_iter()
            .filter(|r| r.instance_id == self.instance_id || r.is_live(now_ms, timeout_ms))
            .collect())
    }

    /// Live peer with spare capacity and the fewest assigned agents.
    pub async fn least_loaded(&self) -> Result<Option<InstanceRecord>, FleetError> {
        let live = self.list_live().await?;
        Ok(live
            .into_iter()
            .filter(|r| r.instance_id != self.instance_id && r.has_capacity())
            .min_by_key(|r| (r.load(), r.instance_id.clone())))
    }

    /// Claim an agent for this instance.
    ///
    /// `local_count` is the number of agents currently held locally.
    pub async fn assign(
        &self,
        agent: &AgentId,
        local_count: usize,
    ) -> Result<Assignment, FleetError> {
        let session = self
            .bounded(self.store.get_session(agent))
            .await?
            .ok_or_else(|| FleetError::AgentNotFound(agent.clone()))?;

        if session.owner_instance() == Some(&self.instance_id) {
            return Ok(Assignment::AlreadyOwned);
        }

        if local_count >= self.capacity {
            let redirect = self.least_loaded().await?.map(|r| r.instance_id);
            tracing::warn!(
                agent_id = %agent,
                capacity = self.capacity,
                ?redirect,
                "at capacity, refusing agent"
            );
            return Err(FleetError::CapacityExceeded { capacity: self.capacity, redirect });
        }

        let superseded = match &session.owner {
            None => None,
            Some(owner) => {
                let live = self.list_live().await?;
                if self.owner_is_live(owner, &live) {
                    return Err(FleetError::OwnedElsewhere {
                        agent_id: agent.clone(),
                        owner: owner.clone(),
                    });
                }
                Some(owner.clone())
            }
        };

        let expected = superseded.as_ref().map(|o| o.instance_id.clone());
        match self.bounded(self.store.claim_owner(agent, expected, self.stamp())).await? {
            ClaimOutcome::Claimed(_) => {
                if let Some(dead) = &superseded {
                    tracing::info!(
                        agent_id = %agent,
                        previous = %dead.instance_id,
                        previous_host = %dead.host,
                        "superseded dead owner"
                    );
                }
                Ok(Assignment::Claimed { superseded })
            }
            ClaimOutcome::Conflict(Some(owner)) => {
                Err(FleetError::OwnedElsewhere { agent_id: agent.clone(), owner })
            }
            // Owner cleared between read and claim; the next attempt may win
            ClaimOutcome::Conflict(None) => Err(FleetError::ClaimRaced(agent.clone())),
            ClaimOutcome::Missing => Err(FleetError::AgentNotFound(agent.clone())),
        }
    }

    /// Release this instance's claim. Returns whether it held one.
    pub async fn unassign(&self, agent: &AgentId) -> Result<bool, FleetError> {
        self.bounded(self.store.release_owner(agent, &self.instance_id)).await
    }

    /// An owner is dead if its instance record is missing or stale, or if it
    /// ran on this host and its process is gone.
    pub fn owner_is_live(&self, owner: &OwnerStamp, live: &[InstanceRecord]) -> bool {
        if owner.instance_id == self.instance_id {
            return true;
        }
        if !live.iter().any(|r| r.instance_id == owner.instance_id) {
            return false;
        }
        if owner.host == self.host && !self.probe.is_running(owner.process_id) {
            return false;
        }
        true
    }

    pub async fn detect_orphans(&self) -> Result<Vec<Orphan>, FleetError> {
        let live = self.list_live().await?;
        let sessions = self.bounded(self.store.list_sessions()).await?;
        Ok(sessions
            .into_iter()
            .filter_map(|s| {
                let owner = s.owner?;
                let live_owner = self.owner_is_live(&owner, &live);
                (!live_owner).then_some(Orphan { agent_id: s.agent_id, owner })
            })
            .collect())
    }

    /// Clear dead owners and prune their instance records.
    ///
    /// Each release is a compare-and-set against the dead owner, so an agent
    /// a peer already re-claimed is left alone.
    pub async fn release_orphans(&self, orphans: &[Orphan]) -> Result<usize, FleetError> {
        let mut released = 0;
        let mut dead = BTreeSet::new();
        for orphan in orphans {
            let cleared = self
                .bounded(self.store.release_owner(&orphan.agent_id, &orphan.owner.instance_id))
                .await?;
            if cleared {
                released += 1;
                tracing::info!(
                    agent_id = %orphan.agent_id,
                    previous = %orphan.owner.instance_id,
                    "released orphaned agent"
                );
            }
            dead.insert(orphan.owner.instance_id.clone());
        }

        let now_ms = self.clock.epoch_ms();
        let timeout_ms = self.liveness_timeout.as_millis() as u64;
        for record in self.bounded(self.store.list_instances()).await? {
            if record.instance_id != self.instance_id && !record.is_live(now_ms, timeout_ms) {
                dead.insert(record.instance_id);
            }
        }
        for instance_id in dead {
            if self.bounded(self.store.remove_instance(&instance_id)).await? {
                tracing::info!(instance_id = %instance_id, "pruned dead instance");
            }
        }
        Ok(released)
    }

    pub async fn deregister(&self) -> Result<(), FleetError> {
        self.bounded(self.store.remove_instance(&self.instance_id)).await?;
        tracing::info!(instance_id = %self.instance_id, "instance deregistered");
        Ok(())
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, StoreError>>,
    ) -> Result<T, FleetError> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result.map_err(FleetError::from),
            Err(_) => Err(FleetError::Timeout),
        }
    }
}

#[cfg(test)]
#[path = "fleet_tests.rs"]
mod tests;
