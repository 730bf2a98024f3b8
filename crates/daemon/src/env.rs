// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;

use crate::lifecycle::LifecycleError;

/// Resolve state directory: SB_STATE_DIR > XDG_STATE_HOME/switchboard > ~/.local/state/switchboard
pub fn state_dir() -> Result<PathBuf, LifecycleError> {
    if let Ok(dir) = std::env::var("SB_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("switchboard"));
    }
    let home = std::env::var("HOME").map_err(|_| LifecycleError::NoStateDir)?;
    Ok(PathBuf::from(home).join(".local/state/switchboard"))
}

/// Explicit config file path. Defaults to `<state_dir>/switchboard.toml` when unset.
pub fn config_path() -> Option<PathBuf> {
    non_empty("SB_CONFIG").map(PathBuf::from)
}

/// Override for the number of agents this instance accepts.
///
/// Unparseable values are ignored so a typo falls back to the file setting.
pub fn instance_capacity() -> Option<usize> {
    non_empty("SB_INSTANCE_CAPACITY").and_then(|s| s.parse::<usize>().ok())
}

/// Base64 credential sealing key
pub fn master_key() -> Option<String> {
    non_empty("SB_MASTER_KEY")
}

pub fn webhook_url() -> Option<String> {
    non_empty("SB_WEBHOOK_URL")
}

/// WebSocket URL of the protocol sidecar
pub fn transport_url() -> Option<String> {
    non_empty("SB_TRANSPORT_URL")
}

/// Log filter directive (default `info`)
pub fn log_filter() -> String {
    non_empty("SB_LOG").unwrap_or_else(|| "info".to_string())
}

fn non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
