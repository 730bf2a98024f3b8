// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use sb_adapters::{ConnectRequest, FakeTransport, SessionTransport};
use tokio::sync::mpsc;

fn agent() -> AgentId {
    AgentId::new("agent-1")
}

#[test]
fn retired_slot_keeps_generation() {
    let mut slot = Slot::default();
    let session = AgentSession::builder().build();
    let mut machine = slot.machine_or_seed(&session).clone();
    machine.generation = 4;
    slot.replace(machine);
    slot.retire();

    assert!(slot.machine().is_none());
    assert_eq!(slot.generation(), 4);
    assert_eq!(slot.machine_or_seed(&session).generation, 4);
}

#[test]
fn seeded_machine_reflects_durable_status() {
    let mut slot = Slot::default();
    let session = AgentSession::builder().status(AgentStatus::Held).build();
    assert_eq!(slot.machine_or_seed(&session).status, AgentStatus::Held);
}

#[tokio::test]
async fn slot_handles_are_shared() {
    let registry = Registry::new();
    let a = registry.slot(&agent());
    let b = registry.slot(&agent());
    assert!(Arc::ptr_eq(&a, &b));

    registry.remove_slot(&agent());
    let c = registry.slot(&agent());
    assert!(!Arc::ptr_eq(&a, &c));
}

#[tokio::test]
async fn insert_session_returns_previous() {
    let registry = Registry::new();
    let transport = FakeTransport::new();
    let (tx, _rx) = mpsc::channel(8);
    let request = |generation| ConnectRequest { agent_id: agent(), generation, credential: None };

    let first = transport.connect(request(1), tx.clone()).await.unwrap();
    let second = transport.connect(request(2), tx).await.unwrap();

    assert!(registry.insert_session(&agent(), first).is_none());
    let replaced = registry.insert_session(&agent(), second).unwrap();
    assert_eq!(replaced.generation(), 1);
    assert_eq!(registry.session(&agent()).unwrap().generation(), 2);
    assert!(registry.take_session(&agent()).is_some());
    assert!(registry.session(&agent()).is_none());
}

#[test]
fn tracked_counts_group_by_status() {
    let registry = Registry::new();
    registry.set_tracked(&AgentId::new("a"), Some(AgentStatus::Connected));
    registry.set_tracked(&AgentId::new("b"), Some(AgentStatus::Connected));
    registry.set_tracked(&AgentId::new("c"), Some(AgentStatus::Reconnecting));
    registry.set_tracked(&AgentId::new("c"), None);

    assert_eq!(registry.tracked_count(), 2);
    assert_eq!(registry.tracked_status(&AgentId::new("a")), Some(AgentStatus::Connected));
    assert_eq!(registry.tracked_status(&AgentId::new("c")), None);
    assert_eq!(registry.tracked_by_status().get(&AgentStatus::Connected), Some(&2));
    assert_eq!(registry.tracked_ids(), vec![AgentId::new("a"), AgentId::new("b")]);
}
