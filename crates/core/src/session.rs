// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable per-agent session record.

use crate::connection::AgentStatus;
use crate::credential::SealedCredential;
use crate::instance::InstanceId;
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Stable tenant-assigned identity of an agent.
    pub struct AgentId;
}

/// Which instance process currently owns an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerStamp {
    pub instance_id: InstanceId,
    pub host: String,
    pub process_id: u32,
    pub claimed_at_ms: u64,
}

/// Time-boxed, single-use pairing challenge (the QR equivalent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelinkChallenge {
    /// Opaque token identifying this issuance
    pub token: String,
    /// Challenge payload rendered to the user
    pub payload: String,
    pub issued_at_ms: u64,
    pub expires_at_ms: u64,
}

impl RelinkChallenge {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub reason: String,
    pub at_ms: u64,
}

/// One durable record per agent.
///
/// Survives terminal disconnects; only deleting the agent removes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSession {
    pub agent_id: AgentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerStamp>,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_identity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relink: Option<RelinkChallenge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paired_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disconnected_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<SealedCredential>,
    /// Last time the owning instance confirmed the transport was open
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_at_ms: Option<u64>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

crate::builder! {
    pub struct AgentSessionBuilder => AgentSession {
        into {
            agent_id: AgentId = "agent-1",
        }
        set {
            status: AgentStatus = AgentStatus::Pending,
            created_at_ms: u64 = 1_000,
            updated_at_ms: u64 = 1_000,
        }
        option {
            owner: OwnerStamp = None,
            phone_identity: String = None,
            relink: RelinkChallenge = None,
            failure: Failure = None,
            connected_at_ms: u64 = None,
            paired_at_ms: u64 = None,
            disconnected_at_ms: u64 = None,
            credential: SealedCredential = None,
            heartbeat_at_ms: u64 = None,
        }
    }
}

impl AgentSession {
    pub fn new(agent_id: AgentId, now_ms: u64) -> Self {
        Self {
            agent_id,
            owner: None,
            status: AgentStatus::Pending,
            phone_identity: None,
            relink: None,
            failure: None,
            connected_at_ms: None,
            paired_at_ms: None,
            disconnected_at_ms: None,
            credential: None,
            heartbeat_at_ms: None,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    /// The relink challenge a caller may see.
    ///
    /// Never returned once the agent is paired and connected, and never past
    /// its expiry.
    pub fn visible_relink(&self, now_ms: u64) -> Option<&RelinkChallenge> {
        if self.phone_identity.is_some() && self.status == AgentStatus::Connected {
            return None;
        }
        self.relink.as_ref().filter(|r| !r.is_expired(now_ms))
    }

    pub fn owner_instance(&self) -> Option<&InstanceId> {
        self.owner.as_ref().map(|o| &o.instance_id)
    }

    /// Apply a patch in place, stamping `updated_at_ms`.
    pub fn apply(&mut self, patch: &SessionPatch, now_ms: u64) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        patch.phone_identity.apply_to(&mut self.phone_identity);
        patch.relink.apply_to(&mut self.relink);
        patch.failure.apply_to(&mut self.failure);
        patch.connected_at_ms.apply_to(&mut self.connected_at_ms);
        patch.paired_at_ms.apply_to(&mut self.paired_at_ms);
        patch.disconnected_at_ms.apply_to(&mut self.disconnected_at_ms);
        patch.heartbeat_at_ms.apply_to(&mut self.heartbeat_at_ms);
        self.updated_at_ms = now_ms;
    }
}

/// Tri-state field update used by [`SessionPatch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Change<T> {
    #[default]
    Keep,
    Set(T),
    Clear,
}

impl<T: Clone> Change<T> {
    pub fn apply_to(&self, slot: &mut Option<T>) {
        match self {
            Change::Keep => {}
            Change::Set(v) => *slot = Some(v.clone()),
            Change::Clear => *slot = None,
        }
    }

    pub fn is_keep(&self) -> bool {
        matches!(self, Change::Keep)
    }
}

/// Field-level update of an [`AgentSession`].
///
/// Stores apply patches atomically per agent so concurrent writers (this
/// process and peers) never lose each other's unrelated fields.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AgentStatus>,
    #[serde(default, skip_serializing_if = "Change::is_keep")]
    pub phone_identity: Change<String>,
    #[serde(default, skip_serializing_if = "Change::is_keep")]
    pub relink: Change<RelinkChallenge>,
    #[serde(default, skip_serializing_if = "Change::is_keep")]
    pub failure: Change<Failure>,
    #[serde(default, skip_serializing_if = "Change::is_keep")]
    pub connected_at_ms: Change<u64>,
    #[serde(default, skip_serializing_if = "Change::is_keep")]
    pub paired_at_ms: Change<u64>,
    #[serde(default, skip_serializing_if = "Change::is_keep")]
    pub disconnected_at_ms: Change<u64>,
    #[serde(default, skip_serializing_if = "Change::is_keep")]
    pub heartbeat_at_ms: Change<u64>,
}

impl SessionPatch {
    pub fn status(status: AgentStatus) -> Self {
        Self { status: Some(status), ..Self::default() }
    }

    pub fn with_failure(mut self, reason: impl Into<String>, at_ms: u64) -> Self {
        self.failure = Change::Set(Failure { reason: reason.into(), at_ms });
        self
    }

    pub fn clear_failure(mut self) -> Self {
        self.failure = Change::Clear;
        self
    }

    pub fn with_relink(mut self, relink: RelinkChallenge) -> Self {
        self.relink = Change::Set(relink);
        self
    }

    pub fn clear_relink(mut self) -> Self {
        self.relink = Change::Clear;
        self
    }

    pub fn with_phone_identity(mut self, phone: impl Into<String>) -> Self {
        self.phone_identity = Change::Set(phone.into());
        self
    }

    pub fn disconnected_at(mut self, at_ms: u64) -> Self {
        self.disconnected_at_ms = Change::Set(at_ms);
        self
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
