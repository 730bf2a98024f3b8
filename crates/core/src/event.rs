// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Events that drive per-agent state transitions.

use crate::session::AgentId;
use crate::termination::Termination;
use crate::timer::TimerId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events delivered to the orchestrator.
///
/// Session events carry the `generation` of the transport connection that
/// produced them; events from an older generation are stale and dropped.
///
/// Serializes with `{"type": "area:name", ...fields}` format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "system:shutdown")]
    Shutdown,

    #[serde(rename = "timer:start")]
    TimerStart { id: TimerId },

    /// Transport produced a pairing challenge
    #[serde(rename = "session:qr")]
    SessionQr { agent_id: AgentId, generation: u64, payload: String },

    /// Transport finished the handshake
    #[serde(rename = "session:opened")]
    SessionOpened {
        agent_id: AgentId,
        generation: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        phone_identity: Option<String>,
    },

    /// Transport rotated key material
    #[serde(rename = "session:creds")]
    CredentialsUpdated { agent_id: AgentId, generation: u64, credential: Value },

    #[serde(rename = "session:message")]
    MessageReceived { agent_id: AgentId, generation: u64, payload: Value },

    #[serde(rename = "session:terminated")]
    SessionTerminated { agent_id: AgentId, generation: u64, termination: Termination },

    /// Reconnection ceiling reached
    #[serde(rename = "reconnect:exhausted")]
    ReconnectExhausted { agent_id: AgentId, generation: u64 },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Shutdown => "system:shutdown",
            Event::TimerStart { .. } => "timer:start",
            Event::SessionQr { .. } => "session:qr",
            Event::SessionOpened { .. } => "session:opened",
            Event::CredentialsUpdated { .. } => "session:creds",
            Event::MessageReceived { .. } => "session:message",
            Event::SessionTerminated { .. } => "session:terminated",
            Event::ReconnectExhausted { .. } => "reconnect:exhausted",
        }
    }

    pub fn agent_id(&self) -> Option<&AgentId> {
        match self {
            Event::Shutdown | Event::TimerStart { .. } => None,
            Event::SessionQr { agent_id, .. }
            | Event::SessionOpened { agent_id, .. }
            | Event::CredentialsUpdated { agent_id, .. }
            | Event::MessageReceived { agent_id, .. }
            | Event::SessionTerminated { agent_id, .. }
            | Event::ReconnectExhausted { agent_id, .. } => Some(agent_id),
        }
    }

    pub fn generation(&self) -> Option<u64> {
        match self {
            Event::Shutdown | Event::TimerStart { .. } => None,
            Event::SessionQr { generation, .. }
            | Event::SessionOpened { generation, .. }
            | Event::CredentialsUpdated { generation, .. }
            | Event::MessageReceived { generation, .. }
            | Event::SessionTerminated { generation, .. }
            | Event::ReconnectExhausted { generation, .. } => Some(*generation),
        }
    }

    /// One-line summary for logs. Never includes credential or message content.
    pub fn log_summary(&self) -> String {
        let t = self.name();
        match self {
            Event::Shutdown => t.to_string(),
            Event::TimerStart { id } => format!("{t} id={id}"),
            Event::SessionTerminated { agent_id, generation, termination } => {
                format!("{t} agent={agent_id} gen={generation} termination={termination}")
            }
            Event::SessionOpened { agent_id, generation, phone_identity } => format!(
                "{t} agent={agent_id} gen={generation} phone={}",
                phone_identity.as_deref().unwrap_or("-")
            ),
            Event::SessionQr { agent_id, generation, .. }
            | Event::CredentialsUpdated { agent_id, generation, .. }
            | Event::MessageReceived { agent_id, generation, .. }
            | Event::ReconnectExhausted { agent_id, generation } => {
                format!("{t} agent={agent_id} gen={generation}")
            }
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
