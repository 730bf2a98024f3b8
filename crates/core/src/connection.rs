// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection states (in-memory) and agent statuses (durable).
//!
//! ```text
//! Uninitialized → Initializing → {QrPending | Connecting} → Connected
//! Connected → {Reconnecting → Connecting → Connected | Conflict | Disconnected}
//! ```
//!
//! `Conflict` and `Disconnected` are absorbing until a new initialize request
//! restarts the agent from `Uninitialized`.

use serde::{Deserialize, Serialize};

/// Per-agent connection state held by the owning instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Uninitialized,
    Initializing,
    QrPending,
    Connecting,
    Connected,
    Reconnecting,
    Conflict,
    Disconnected,
}

crate::simple_display! {
    ConnectionState {
        Uninitialized => "uninitialized",
        Initializing => "initializing",
        QrPending => "qr_pending",
        Connecting => "connecting",
        Connected => "connected",
        Reconnecting => "reconnecting",
        Conflict => "conflict",
        Disconnected => "disconnected",
    }
}

impl ConnectionState {
    /// States that ignore transport events until re-initialized.
    pub fn is_absorbing(&self) -> bool {
        matches!(self, ConnectionState::Conflict | ConnectionState::Disconnected)
    }

    /// States in which a transport is expected to exist.
    pub fn expects_transport(&self) -> bool {
        matches!(
            self,
            ConnectionState::QrPending | ConnectionState::Connecting | ConnectionState::Connected
        )
    }
}

/// Status written to the durable record so the whole fleet can observe it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Record exists but no instance has initialized the agent yet
    #[default]
    Pending,
    Initializing,
    /// Waiting for the relink challenge to be answered
    QrPending,
    Connecting,
    Connected,
    /// Backing off between reconnect attempts
    Reconnecting,
    /// Rate limiting suspected: credentials kept, auto-retry disabled until
    /// the next manual initialize
    Held,
    /// Credentials wiped; a fresh relink is required
    Conflict,
    /// User-initiated disconnect
    Disconnected,
    /// Reconnect attempts exhausted
    Failed,
}

crate::simple_display! {
    AgentStatus {
        Pending => "pending",
        Initializing => "initializing",
        QrPending => "qr_pending",
        Connecting => "connecting",
        Connected => "connected",
        Reconnecting => "reconnecting",
        Held => "held",
        Conflict => "conflict",
        Disconnected => "disconnected",
        Failed => "failed",
    }
}

impl AgentStatus {
    /// A relink is required exactly when credentials have been discarded.
    pub fn requires_relink(&self) -> bool {
        matches!(self, AgentStatus::Conflict)
    }

    /// Statuses under which the system keeps working without caller action.
    pub fn is_autonomous(&self) -> bool {
        matches!(
            self,
            AgentStatus::Initializing
                | AgentStatus::QrPending
                | AgentStatus::Connecting
                | AgentStatus::Connected
                | AgentStatus::Reconnecting
        )
    }

    /// Statuses that startup recovery should pick back up.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AgentStatus::Pending
                | AgentStatus::Initializing
                | AgentStatus::Connecting
                | AgentStatus::Connected
                | AgentStatus::Reconnecting
        )
    }

    pub const ALL: [AgentStatus; 10] = [
        AgentStatus::Pending,
        AgentStatus::Initializing,
        AgentStatus::QrPending,
        AgentStatus::Connecting,
        AgentStatus::Connected,
        AgentStatus::Reconnecting,
        AgentStatus::Held,
        AgentStatus::Conflict,
        AgentStatus::Disconnected,
        AgentStatus::Failed,
    ];
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
