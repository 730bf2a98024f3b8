// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-local store for tests and single-instance runs.

use crate::{AgentStore, ClaimOutcome, StoreError, StoreState};
use async_trait::async_trait;
use parking_lot::Mutex;
use sb_core::{
    AgentId, AgentSession, InstanceId, InstanceRecord, MessageRecord, OwnerStamp,
    SealedCredential, SessionPatch,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Faults {
    unavailable: AtomicBool,
    failing_message_writes: AtomicUsize,
    race_next_claim: AtomicBool,
}

/// Store held entirely in memory. Clones share the same state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
    faults: Arc<Faults>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> StoreState {
        self.state.lock().clone()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected outage".to_string()));
        }
        Ok(())
    }

    fn check_message_write(&self) -> Result<(), StoreError> {
        self.check()?;
        let failed = self
            .faults
            .failing_message_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StoreError::Unavailable("injected message write failure".to_string()));
        }
        Ok(())
    }
}

#[cfg(any(test, feature = "test-support"))]
impl MemoryStore {
    /// Make every operation fail until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `count` message inserts.
    pub fn fail_message_writes(&self, count: usize) {
        self.faults.failing_message_writes.store(count, Ordering::SeqCst);
    }

    /// Clear the agent's owner right before the next claim lands, as a peer
    /// releasing it mid-claim would.
    pub fn race_next_claim(&self) {
        self.faults.race_next_claim.store(true, Ordering::SeqCst);
    }

    /// Write a record directly, bypassing the contract.
    pub fn put_session(&self, session: AgentSession) {
        self.state.lock().sessions.insert(session.agent_id.clone(), session);
    }
}

#[async_trait]
impl AgentStore for MemoryStore {
    async fn get_session(&self, agent_id: &AgentId) -> Result<Option<AgentSession>, StoreError> {
        self.check()?;
        Ok(self.state.lock().sessions.get(agent_id).cloned())
    }

    async fn list_sessions(&self) -> Result<Vec<AgentSession>, StoreError> {
        self.check()?;
        Ok(self.state.lock().sessions.values().cloned().collect())
    }

    async fn ensure_session(
        &self,
        agent_id: &AgentId,
        now_ms: u64,
    ) -> Result<AgentSession, StoreError> {
        self.check()?;
        Ok(self.state.lock().ensure_session(agent_id, now_ms))
    }

    async fn update_session(
        &self,
        agent_id: &AgentId,
        patch: SessionPatch,
        now_ms: u64,
    ) -> Result<Option<AgentSession>, StoreError> {
        self.check()?;
        Ok(self.state.lock().update_session(agent_id, &patch, now_ms))
    }

    async fn set_credential(
        &self,
        agent_id: &AgentId,
        credential: Option<SealedCredential>,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.state.lock().set_credential(agent_id, credential, now_ms)
    }

    async fn claim_owner(
        &self,
        agent_id: &AgentId,
        expected: Option<InstanceId>,
        claim: OwnerStamp,
    ) -> Result<ClaimOutcome, StoreError> {
        self.check()?;
        let mut state = self.state.lock();
        if self.faults.race_next_claim.swap(false, Ordering::SeqCst) {
            if let Some(session) = state.sessions.get_mut(agent_id) {
                session.owner = None;
            }
        }
        Ok(state.claim_owner(agent_id, expected.as_ref(), claim))
    }

    async fn release_owner(
        &self,
        agent_id: &AgentId,
        owner: &InstanceId,
    ) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self.state.lock().release_owner(agent_id, owner))
    }

    async fn delete_session(&self, agent_id: &AgentId) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self.state.lock().delete_session(agent_id))
    }

    async fn upsert_instance(&self, record: InstanceRecord) -> Result<(), StoreError> {
        self.check()?;
        self.state.lock().instances.insert(record.instance_id.clone(), record);
        Ok(())
    }

    async fn heartbeat_instance(
        &self,
        instance_id: &InstanceId,
        now_ms: u64,
        assigned: BTreeSet<AgentId>,
    ) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self.state.lock().heartbeat_instance(instance_id, now_ms, assigned))
    }

    async fn list_instances(&self) -> Result<Vec<InstanceRecord>, StoreError> {
        self.check()?;
        Ok(self.state.lock().instances.values().cloned().collect())
    }

    async fn remove_instance(&self, instance_id: &InstanceId) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self.state.lock().instances.remove(instance_id).is_some())
    }

    async fn insert_messages(&self, records: Vec<MessageRecord>) -> Result<usize, StoreError> {
        self.check_message_write()?;
        Ok(self.state.lock().insert_messages(records))
    }

    async fn list_messages(&self, agent_id: &AgentId) -> Result<Vec<MessageRecord>, StoreError> {
        self.check()?;
        Ok(self.state.lock().list_messages(agent_id))
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
