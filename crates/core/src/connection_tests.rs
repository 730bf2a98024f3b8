// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn only_conflict_requires_relink() {
    let relink: Vec<_> = AgentStatus::ALL.iter().filter(|s| s.requires_relink()).collect();
    assert_eq!(relink, vec![&AgentStatus::Conflict]);
}

#[test]
fn held_and_failed_are_not_autonomous() {
    assert!(!AgentStatus::Held.is_autonomous());
    assert!(!AgentStatus::Failed.is_autonomous());
    assert!(AgentStatus::Reconnecting.is_autonomous());
}

#[test]
fn recovery_skips_terminal_and_held_statuses() {
    for status in [
        AgentStatus::Held,
        AgentStatus::Conflict,
        AgentStatus::Disconnected,
        AgentStatus::Failed,
        AgentStatus::QrPending,
    ] {
        assert!(!status.is_recoverable(), "{status} should not be recovered");
    }
}

#[test]
fn absorbing_states() {
    assert!(ConnectionState::Conflict.is_absorbing());
    assert!(ConnectionState::Disconnected.is_absorbing());
    assert!(!ConnectionState::Reconnecting.is_absorbing());
}

#[test]
fn status_serializes_snake_case() {
    assert_eq!(serde_json::to_string(&AgentStatus::QrPending).unwrap(), "\"qr_pending\"");
    assert_eq!(AgentStatus::QrPending.to_string(), "qr_pending");
    assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
}
