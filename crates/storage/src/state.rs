// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory image of the durable store.
//!
//! Both store implementations apply operations through these methods; the
//! file store wraps each call in a lock-load-apply-save cycle.

use crate::{ClaimOutcome, StoreError};
use sb_core::{
    AgentId, AgentSession, InstanceId, InstanceRecord, MessageRecord, OwnerStamp,
    SealedCredential, SessionPatch,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(default)]
    pub sessions: BTreeMap<AgentId, AgentSession>,
    #[serde(default)]
    pub instances: BTreeMap<InstanceId, InstanceRecord>,
    #[serde(default)]
    pub messages: BTreeMap<AgentId, Vec<MessageRecord>>,
}

impl StoreState {
    pub fn ensure_session(&mut self, agent_id: &AgentId, now_ms: u64) -> AgentSession {
        self.sessions
            .entry(agent_id.clone())
            .or_insert_with(|| AgentSession::new(agent_id.clone(), now_ms))
            .clone()
    }

    pub fn update_session(
        &mut self,
        agent_id: &AgentId,
        patch: &SessionPatch,
        now_ms: u64,
    ) -> Option<AgentSession> {
        let session = self.sessions.get_mut(agent_id)?;
        session.apply(patch, now_ms);
        Some(session.clone())
    }

    pub fn set_credential(
        &mut self,
        agent_id: &AgentId,
        credential: Option<SealedCredential>,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        let session =
            self.sessions.get_mut(agent_id).ok_or_else(|| StoreError::NotFound(agent_id.clone()))?;
        session.credential = credential;
        session.updated_at_ms = now_ms;
        Ok(())
    }

    pub fn claim_owner(
        &mut self,
        agent_id: &AgentId,
        expected: Option<&InstanceId>,
        claim: OwnerStamp,
    ) -> ClaimOutcome {
        let Some(session) = self.sessions.get_mut(agent_id) else {
            return ClaimOutcome::Missing;
        };
        let current = session.owner_instance();
        let matches = current == expected || current == Some(&claim.instance_id);
        if !matches {
            return ClaimOutcome::Conflict(session.owner.clone());
        }
        if current != Some(&claim.instance_id) {
            session.updated_at_ms = claim.claimed_at_ms;
            session.owner = Some(claim);
        }
        ClaimOutcome::Claimed(session.clone())
    }

    pub fn release_owner(&mut self, agent_id: &AgentId, owner: &InstanceId) -> bool {
        match self.sessions.get_mut(agent_id) {
            Some(session) if session.owner_instance() == Some(owner) => {
                session.owner = None;
                true
            }
            _ => false,
        }
    }

    pub fn delete_session(&mut self, agent_id: &AgentId) -> bool {
        self.messages.remove(agent_id);
        self.sessions.remove(agent_id).is_some()
    }

    pub fn heartbeat_instance(
        &mut self,
        instance_id: &InstanceId,
        now_ms: u64,
        assigned: BTreeSet<AgentId>,
    ) -> bool {
        match self.instances.get_mut(instance_id) {
            Some(record) => {
                record.last_heartbeat_ms = now_ms;
                record.assigned = assigned;
                true
            }
            None => false,
        }
    }

    pub fn insert_messages(&mut self, records: Vec<MessageRecord>) -> usize {
        let mut inserted = 0;
        for record in records {
            let stored = self.messages.entry(record.agent_id.clone()).or_default();
            if stored.iter().any(|m| m.native_id == record.native_id) {
                continue;
            }
            stored.push(record);
            inserted += 1;
        }
        inserted
    }

    pub fn list_messages(&self, agent_id: &AgentId) -> Vec<MessageRecord> {
        self.messages.get(agent_id).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
