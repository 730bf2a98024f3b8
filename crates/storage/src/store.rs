// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The durable store contract.

use crate::StoreError;
use async_trait::async_trait;
use sb_core::{
    AgentId, AgentSession, InstanceId, InstanceRecord, MessageRecord, OwnerStamp,
    SealedCredential, SessionPatch,
};
use std::collections::BTreeSet;

/// Result of a compare-and-set ownership claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The claim was written; carries the updated record
    Claimed(AgentSession),
    /// Ownership did not match the expected owner; carries the current owner
    Conflict(Option<OwnerStamp>),
    Missing,
}

/// Durable storage keyed by agent id.
///
/// Every write is a keyed upsert or conditional update applied atomically,
/// so peers sharing a store never lose each other's unrelated fields.
#[async_trait]
pub trait AgentStore: Send + Sync + 'static {
    async fn get_session(&self, agent_id: &AgentId) -> Result<Option<AgentSession>, StoreError>;

    async fn list_sessions(&self) -> Result<Vec<AgentSession>, StoreError>;

    /// Return the existing record or create a pending one.
    async fn ensure_session(
        &self,
        agent_id: &AgentId,
        now_ms: u64,
    ) -> Result<AgentSession, StoreError>;

    /// Apply a field-level patch. Returns `None` if the record does not exist.
    async fn update_session(
        &self,
        agent_id: &AgentId,
        patch: SessionPatch,
        now_ms: u64,
    ) -> Result<Option<AgentSession>, StoreError>;

    /// Replace (or clear) the sealed credential. Never touches other fields.
    async fn set_credential(
        &self,
        agent_id: &AgentId,
        credential: Option<SealedCredential>,
        now_ms: u64,
    ) -> Result<(), StoreError>;

    /// Set the owner to `claim` iff the current owner is `expected`.
    ///
    /// Re-claiming an agent already owned by `claim.instance_id` succeeds.
    async fn claim_owner(
        &self,
        agent_id: &AgentId,
        expected: Option<InstanceId>,
        claim: OwnerStamp,
    ) -> Result<ClaimOutcome, StoreError>;

    /// Clear the owner iff it is `owner`. Returns whether it was cleared.
    async fn release_owner(
        &self,
        agent_id: &AgentId,
        owner: &InstanceId,
    ) -> Result<bool, StoreError>;

    /// Remove the record and its messages.
    async fn delete_session(&self, agent_id: &AgentId) -> Result<bool, StoreError>;

    async fn upsert_instance(&self, record: InstanceRecord) -> Result<(), StoreError>;

    /// Refresh heartbeat and assigned set. Returns `false` if the record is gone.
    async fn heartbeat_instance(
        &self,
        instance_id: &InstanceId,
        now_ms: u64,
        assigned: BTreeSet<AgentId>,
    ) -> Result<bool, StoreError>;

    async fn list_instances(&self) -> Result<Vec<InstanceRecord>, StoreError>;

    async fn remove_instance(&self, instance_id: &InstanceId) -> Result<bool, StoreError>;

    /// Insert messages, skipping any whose `(agent_id, native_id)` already
    /// exists. Returns the number inserted.
    async fn insert_messages(&self, records: Vec<MessageRecord>) -> Result<usize, StoreError>;

    async fn list_messages(&self, agent_id: &AgentId) -> Result<Vec<MessageRecord>, StoreError>;
}
