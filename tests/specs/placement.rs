// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Where agents run: ownership, capacity and redirects.

use crate::prelude::*;
use std::sync::Arc;

#[tokio::test]
async fn second_instance_cannot_take_a_live_agent() {
    let store = MemoryStore::new();
    let clock = FakeClock::new();
    let a = Instance::start(Arc::new(store.clone()), &clock, "host-a", 100).await;
    let b = Instance::start(Arc::new(store.clone()), &clock, "host-b", 200).await;
    a.pair("agent-1").await;

    let agent = AgentId::new("agent-1");
    assert!(matches!(
        b.runtime.initialize(&agent).await,
        Err(RuntimeError::Fleet(FleetError::OwnedElsewhere { .. }))
    ));
    assert!(matches!(
        b.runtime.delete(&agent).await,
        Err(RuntimeError::Fleet(FleetError::OwnedElsewhere { .. }))
    ));

    // Any instance can still read the status
    let status = b.runtime.get_status(&agent).await.unwrap();
    assert!(status.connected);
    assert_eq!(status.owner.map(|o| o.instance_id).as_ref(), Some(a.runtime.instance_id()));
}

#[tokio::test]
async fn full_instance_redirects_to_least_loaded_peer() {
    let store = MemoryStore::new();
    let clock = FakeClock::new();
    let a = Instance::start_with(
        config().capacity(1),
        Arc::new(store.clone()),
        &clock,
        FakeProcessProbe::new("host-a", 100),
    )
    .await;
    let b = Instance::start(Arc::new(store.clone()), &clock, "host-b", 200).await;
    a.pair("agent-1").await;
    a.runtime.heartbeat().await.unwrap();

    let result = a.runtime.initialize(&AgentId::new("agent-2")).await;

    match result {
        Err(RuntimeError::Fleet(FleetError::CapacityExceeded { capacity, redirect })) => {
            assert_eq!(capacity, 1);
            assert_eq!(redirect.as_ref(), Some(b.runtime.instance_id()));
        }
        other => panic!("expected capacity refusal, got {other:?}"),
    }
    b.pair("agent-2").await;
}

#[tokio::test]
async fn delete_removes_agent_everywhere() {
    let store = MemoryStore::new();
    let clock = FakeClock::new();
    let a = Instance::start(Arc::new(store.clone()), &clock, "host-a", 100).await;
    let b = Instance::start(Arc::new(store.clone()), &clock, "host-b", 200).await;
    a.pair("agent-1").await;

    assert!(a.runtime.delete(&AgentId::new("agent-1")).await.unwrap());

    assert!(matches!(
        b.runtime.get_status(&AgentId::new("agent-1")).await,
        Err(RuntimeError::AgentNotFound(_))
    ));
    assert!(store.snapshot().sessions.is_empty());
    assert!(a.transport.session("agent-1").unwrap().is_closed());
}
