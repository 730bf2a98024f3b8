// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Messaging-network session transport.
//!
//! A transport opens one [`Session`] per agent connection. The session
//! reports protocol activity by sending [`Event`]s tagged with its
//! generation into the channel handed to [`SessionTransport::connect`].

mod sidecar;

#[cfg(any(test, feature = "test-support"))]
mod fake;

pub use sidecar::SidecarTransport;

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeSession, FakeTransport, TransportCall};

use async_trait::async_trait;
use sb_core::{AgentId, Event};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from transport operations
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("session is not open")]
    NotOpen,
    #[error("session closed")]
    Closed,
    #[error("request timed out")]
    Timeout,
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Parameters for opening a session.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectRequest {
    pub agent_id: AgentId,
    pub generation: u64,
    /// Canonical credential to restore from; `None` starts a fresh pairing
    pub credential: Option<Value>,
}

/// Acknowledgement of an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub native_id: String,
    pub timestamp_ms: u64,
}

/// Whether an identity is registered on the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistsResult {
    pub on_network: bool,
    /// Canonical identity reported by the network, when registered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<String>,
}

/// One live connection for one agent.
#[async_trait]
pub trait Session: Send + Sync + 'static {
    fn agent_id(&self) -> &AgentId;

    fn generation(&self) -> u64;

    /// Whether the handshake completed and the connection is still up
    fn is_open(&self) -> bool;

    async fn send_text(&self, to: &str, text: &str) -> Result<SendReceipt, TransportError>;

    async fn exists(&self, phone_jid: &str) -> Result<ExistsResult, TransportError>;

    /// Unlink this device from the account
    async fn logout(&self) -> Result<(), TransportError>;

    /// Close the connection. Emits no termination event.
    async fn close(&self);
}

#[async_trait]
pub trait SessionTransport: Send + Sync + 'static {
    async fn connect(
        &self,
        request: ConnectRequest,
        events: mpsc::Sender<Event>,
    ) -> Result<Arc<dyn Session>, TransportError>;
}
