// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runtime error types

use crate::config::ConfigError;
use crate::executor::ExecuteError;
use crate::fleet::FleetError;
use crate::vault::VaultError;
use sb_adapters::TransportError;
use sb_core::{AgentId, AgentStatus};
use sb_storage::StoreError;
use thiserror::Error;

/// Errors surfaced by orchestrator operations
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Fleet(#[from] FleetError),
    #[error("initialization already in progress for agent {0}")]
    InitInProgress(AgentId),
    #[error("agent not found: {0}")]
    AgentNotFound(AgentId),
    #[error("agent {agent_id} is not connected (status {status})")]
    NotConnected { agent_id: AgentId, status: AgentStatus },
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("vault error: {0}")]
    Vault(#[from] VaultError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("effect failed: {0}")]
    Execute(#[from] ExecuteError),
}
