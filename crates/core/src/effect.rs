// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Effects represent side effects the orchestrator needs to perform

use crate::session::{AgentId, SessionPatch};
use crate::timer::TimerId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Commands produced by the pure state machine and run by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    // === Durable record ===
    /// Apply a field-level patch to the agent's durable record
    PersistSession { agent_id: AgentId, patch: SessionPatch },

    // === Credential vault ===
    /// Validate, seal and store transport-reported credentials
    StoreCredential { agent_id: AgentId, credential: Value },

    /// Remove the credential from every tier and the durable record
    WipeCredential { agent_id: AgentId },

    // === Transport ===
    /// Open a transport session tagged with `generation`
    Connect {
        agent_id: AgentId,
        generation: u64,
        /// Restore from stored credentials instead of starting a fresh pairing
        restore: bool,
    },

    /// Close the live transport session, optionally logging the device out
    CloseSession { agent_id: AgentId, logout: bool },

    // === Timer effects ===
    SetTimer {
        id: TimerId,
        #[serde(with = "duration_serde")]
        duration: Duration,
    },

    CancelTimer { id: TimerId },

    // === Reconnection ===
    /// Ask the reconnection scheduler for the next attempt
    ScheduleReconnect { agent_id: AgentId, generation: u64, immediate: bool },

    /// Cancel the pending attempt and reset the attempt counter
    CancelReconnect { agent_id: AgentId },

    // === Inbound pipeline ===
    StartInbound { agent_id: AgentId },

    /// Flush the pending batch and keep the deferred backlog for the next session
    PauseInbound { agent_id: AgentId },

    /// Flush what is queued, then forget the agent's queue
    StopInbound { agent_id: AgentId, flush: bool },

    // === Fleet ===
    /// Clear this instance's assignment of the agent
    ReleaseOwnership { agent_id: AgentId },
}

impl Effect {
    /// Effect name for log spans (e.g., "connect", "persist_session")
    pub fn name(&self) -> &'static str {
        match self {
            Effect::PersistSession { .. } => "persist_session",
            Effect::StoreCredential { .. } => "store_credential",
            Effect::WipeCredential { .. } => "wipe_credential",
            Effect::Connect { .. } => "connect",
            Effect::CloseSession { .. } => "close_session",
            Effect::SetTimer { .. } => "set_timer",
            Effect::CancelTimer { .. } => "cancel_timer",
            Effect::ScheduleReconnect { .. } => "schedule_reconnect",
            Effect::CancelReconnect { .. } => "cancel_reconnect",
            Effect::StartInbound { .. } => "start_inbound",
            Effect::PauseInbound { .. } => "pause_inbound",
            Effect::StopInbound { .. } => "stop_inbound",
            Effect::ReleaseOwnership { .. } => "release_ownership",
        }
    }

    pub fn agent_id(&self) -> Option<AgentId> {
        match self {
            Effect::PersistSession { agent_id, .. }
            | Effect::StoreCredential { agent_id, .. }
            | Effect::WipeCredential { agent_id }
            | Effect::Connect { agent_id, .. }
            | Effect::CloseSession { agent_id, .. }
            | Effect::ScheduleReconnect { agent_id, .. }
            | Effect::CancelReconnect { agent_id }
            | Effect::StartInbound { agent_id }
            | Effect::PauseInbound { agent_id }
            | Effect::StopInbound { agent_id, .. }
            | Effect::ReleaseOwnership { agent_id } => Some(agent_id.clone()),
            Effect::SetTimer { id, .. } | Effect::CancelTimer { id } => id.agent_id(),
        }
    }

    /// Key-value pairs for structured logging
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        match self {
            Effect::PersistSession { agent_id, patch } => {
                let mut fields = vec![("agent_id", agent_id.to_string())];
                if let Some(status) = patch.status {
                    fields.push(("status", status.to_string()));
                }
                fields
            }
            Effect::StoreCredential { agent_id, .. }
            | Effect::WipeCredential { agent_id }
            | Effect::CancelReconnect { agent_id }
            | Effect::StartInbound { agent_id }
            | Effect::PauseInbound { agent_id }
            | Effect::ReleaseOwnership { agent_id } => vec![("agent_id", agent_id.to_string())],
            Effect::Connect { agent_id, generation, restore } => vec![
                ("agent_id", agent_id.to_string()),
                ("generation", generation.to_string()),
                ("restore", restore.to_string()),
            ],
            Effect::CloseSession { agent_id, logout } => {
                vec![("agent_id", agent_id.to_string()), ("logout", logout.to_string())]
            }
            Effect::SetTimer { id, duration } => vec![
                ("timer_id", id.to_string()),
                ("duration_ms", duration.as_millis().to_string()),
            ],
            Effect::CancelTimer { id } => vec![("timer_id", id.to_string())],
            Effect::ScheduleReconnect { agent_id, immediate, .. } => {
                vec![("agent_id", agent_id.to_string()), ("immediate", immediate.to_string())]
            }
            Effect::StopInbound { agent_id, flush } => {
                vec![("agent_id", agent_id.to_string()), ("flush", flush.to_string())]
            }
        }
    }

    /// Whether to show both 'started' and 'completed' or just 'executed',
    /// to control the verbosity for frequent effects.
    pub fn verbose(&self) -> bool {
        match self {
            Effect::SetTimer { .. } => false,
            Effect::CancelTimer { .. } => false,
            Effect::PersistSession { .. } => false,
            Effect::CancelReconnect { .. } => false,
            _ => true,
        }
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
        duration.as_millis().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
#[path = "effect_tests.rs"]
mod tests;
