// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agents survive the loss of the instance driving them.

use crate::prelude::*;
use std::sync::Arc;

#[tokio::test]
async fn crashed_instance_agents_move_to_survivor() {
    let store = MemoryStore::new();
    let clock = FakeClock::new();
    let a = Instance::start(Arc::new(store.clone()), &clock, "host-a", 100).await;
    let b = Instance::start(Arc::new(store.clone()), &clock, "host-b", 200).await;
    a.pair("agent-1").await;
    a.pair("agent-2").await;

    // A stops heartbeating without shutting down
    clock.advance(a.runtime.config().liveness_timeout * 2);
    b.runtime.heartbeat().await.unwrap();
    let report = b.runtime.scan_orphans().await.unwrap();

    assert_eq!(report.released, 2);
    assert_eq!(report.initialized, 2);
    for agent in ["agent-1", "agent-2"] {
        let connects = b.transport.connects(agent);
        assert_eq!(connects.len(), 1, "{agent} restored once");
        assert!(connects[0].1.is_some(), "{agent} restored from its credential");
        b.open(agent).await;
        assert_eq!(b.status(agent).await, AgentStatus::Connected);
        let status = b.runtime.get_status(&AgentId::new(agent)).await.unwrap();
        assert_eq!(
            status.owner.map(|o| o.instance_id).as_ref(),
            Some(b.runtime.instance_id())
        );
    }
}

#[tokio::test]
async fn stalled_owner_yields_to_adopter_when_it_resumes() {
    let store = MemoryStore::new();
    let clock = FakeClock::new();
    let a = Instance::start(Arc::new(store.clone()), &clock, "host-a", 100).await;
    let b = Instance::start(Arc::new(store.clone()), &clock, "host-b", 200).await;
    a.pair("agent-1").await;
    let agent = AgentId::new("agent-1");

    // A stalls long enough for B to adopt the agent
    clock.advance(a.runtime.config().liveness_timeout * 2);
    b.runtime.heartbeat().await.unwrap();
    assert_eq!(b.runtime.scan_orphans().await.unwrap().initialized, 1);
    b.open("agent-1").await;

    // A resumes and beats again
    a.runtime.heartbeat().await.unwrap();
    a.runtime.tick_timers().await;

    assert!(!a.runtime.is_tracked(&agent));
    assert!(a.transport.session("agent-1").unwrap().is_closed());
    assert!(b.runtime.is_tracked(&agent));
    assert!(!b.transport.session("agent-1").unwrap().is_closed());

    for instance in [&a, &b] {
        let status = instance.runtime.get_status(&agent).await.unwrap();
        assert!(status.connected);
        assert_eq!(
            status.owner.map(|o| o.instance_id).as_ref(),
            Some(b.runtime.instance_id())
        );
    }
    let instances = store.snapshot().instances;
    assert!(!instances[a.runtime.instance_id()].assigned.contains(&agent));
}

#[tokio::test]
async fn graceful_shutdown_hands_agents_to_next_instance() {
    let store = MemoryStore::new();
    let clock = FakeClock::new();
    let a = Instance::start(Arc::new(store.clone()), &clock, "host-a", 100).await;
    a.pair("agent-1").await;

    let shutdown = a.runtime.shutdown().await;
    assert_eq!(shutdown.agents_released, 1);
    assert!(a.transport.session("agent-1").unwrap().is_closed());
    // Durable status stays connected for the next owner, but nothing is live
    let status = a.runtime.get_status(&AgentId::new("agent-1")).await.unwrap();
    assert_eq!(status.status, AgentStatus::Connected);
    assert!(!status.connected);

    let b = Instance::start(Arc::new(store.clone()), &clock, "host-b", 200).await;
    b.open("agent-1").await;

    assert_eq!(b.status("agent-1").await, AgentStatus::Connected);
    assert!(b.runtime.is_tracked(&AgentId::new("agent-1")));
}

#[tokio::test]
async fn logged_out_agent_is_not_restored_by_peers() {
    let store = MemoryStore::new();
    let clock = FakeClock::new();
    let a = Instance::start(Arc::new(store.clone()), &clock, "host-a", 100).await;
    a.pair("agent-1").await;
    a.transport.emit_code("agent-1", DisconnectCode::LoggedOut).await;
    a.pump().await;
    a.runtime.shutdown().await;

    let b = Instance::start(Arc::new(store.clone()), &clock, "host-b", 200).await;

    assert!(b.transport.connects("agent-1").is_empty());
    let status = b.runtime.get_status(&AgentId::new("agent-1")).await.unwrap();
    assert_eq!(status.status, AgentStatus::Conflict);
    assert!(status.requires_relink);
}

#[tokio::test]
async fn file_store_carries_agents_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    let clock = FakeClock::new();

    let first = Instance::start(
        Arc::new(FileStore::open(&path).unwrap()),
        &clock,
        "host-a",
        100,
    )
    .await;
    first.pair("agent-1").await;
    first.runtime.shutdown().await;
    drop(first);

    let second = Instance::start(
        Arc::new(FileStore::open(&path).unwrap()),
        &clock,
        "host-a",
        101,
    )
    .await;

    let connects = second.transport.connects("agent-1");
    assert_eq!(connects.len(), 1);
    let credential = connects[0].1.clone().unwrap();
    assert_eq!(credential["me"], PHONE_JID);
    second.open("agent-1").await;
    assert_eq!(second.status("agent-1").await, AgentStatus::Connected);
}
