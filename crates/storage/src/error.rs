// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use sb_core::AgentId;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from durable store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to lock {path}: {source}")]
    Lock { path: PathBuf, source: std::io::Error },
    #[error("agent not found: {0}")]
    NotFound(AgentId),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
