// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ownership across instances, capacity, recovery and orphan adoption

use super::*;
use crate::fleet::FleetError;

/// Two instances on different hosts sharing one store and clock.
async fn pair_of_instances() -> (TestContext, TestContext) {
    let store = MemoryStore::new();
    let clock = FakeClock::new();
    let a = build(test_config(), store.clone(), clock.clone(), FakeProcessProbe::new("host-a", 100))
        .await;
    let b = build(test_config(), store, clock, FakeProcessProbe::new("host-b", 200)).await;
    (a, b)
}

#[tokio::test]
async fn agent_is_driven_by_one_instance_at_a_time() {
    let (a, b) = pair_of_instances().await;
    a.pair().await;

    let result = b.runtime.initialize(&agent()).await;

    match result {
        Err(RuntimeError::Fleet(FleetError::OwnedElsewhere { owner, .. })) => {
            assert_eq!(&owner.instance_id, a.runtime.instance_id());
        }
        other => panic!("expected ownership conflict, got {other:?}"),
    }
    assert!(b.transport.connects(AGENT).is_empty());
    assert!(!b.runtime.is_tracked(&agent()));
    assert_eq!(a.status().await, AgentStatus::Connected);
}

#[tokio::test]
async fn operator_disconnect_refused_for_agent_owned_by_live_peer() {
    let (a, b) = pair_of_instances().await;
    a.pair().await;

    let result = b.runtime.disconnect(&agent()).await;

    assert!(matches!(result, Err(RuntimeError::Fleet(FleetError::OwnedElsewhere { .. }))));
    assert_eq!(a.status().await, AgentStatus::Connected);
}

#[tokio::test]
async fn orphan_is_adopted_only_after_liveness_timeout() {
    let (a, b) = pair_of_instances().await;
    a.pair().await;
    let timeout = a.runtime.config().liveness_timeout;

    // Instance A stops heartbeating; B keeps going
    a.clock.advance(timeout / 2);
    b.runtime.heartbeat().await.unwrap();
    let early = b.runtime.scan_orphans().await.unwrap();
    assert_eq!(early, RecoveryReport::default());
    assert!(b.transport.connects(AGENT).is_empty());

    a.clock.advance(timeout);
    b.runtime.heartbeat().await.unwrap();
    let report = b.runtime.scan_orphans().await.unwrap();

    assert_eq!(report.released, 1);
    assert_eq!(report.initialized, 1);
    let connects = b.transport.connects(AGENT);
    assert_eq!(connects.len(), 1);
    assert!(connects[0].1.is_some());
    assert_eq!(b.session().owner_instance(), Some(b.runtime.instance_id()));
    assert!(b.runtime.is_tracked(&agent()));
    assert!(!b.store.snapshot().instances.contains_key(a.runtime.instance_id()));
}

#[tokio::test]
async fn heartbeat_tick_releases_agent_claimed_by_peer() {
    let ctx = setup().await;
    ctx.pair().await;
    let peer = InstanceId::new("peer-instance");
    let mut session = ctx.session();
    if let Some(owner) = session.owner.as_mut() {
        owner.instance_id = peer.clone();
    }
    ctx.store.put_session(session);

    ctx.advance(ctx.runtime.config().heartbeat_interval).await;

    assert!(!ctx.runtime.is_tracked(&agent()));
    assert!(ctx.transport.session(AGENT).unwrap().is_closed());
    assert_eq!(ctx.runtime.counters().snapshot().ownership_lost, 1);
    // The peer's record is left alone
    let session = ctx.session();
    assert_eq!(session.owner_instance(), Some(&peer));
    assert_eq!(session.status, AgentStatus::Connected);
}

#[tokio::test]
async fn fleet_heartbeat_drops_agents_owned_elsewhere_from_assigned_set() {
    let ctx = setup().await;
    ctx.pair().await;
    let mut session = ctx.session();
    session.owner = None;
    ctx.store.put_session(session);

    ctx.runtime.heartbeat().await.unwrap();

    assert!(!ctx.runtime.is_tracked(&agent()));
    assert!(ctx.transport.session(AGENT).unwrap().is_closed());
    let instances = ctx.store.snapshot().instances;
    assert!(instances[ctx.runtime.instance_id()].assigned.is_empty());
}

#[tokio::test]
async fn dead_process_on_same_host_is_superseded_immediately() {
    let store = MemoryStore::new();
    let clock = FakeClock::new();
    let a_probe = FakeProcessProbe::new("host-a", 100);
    let a = build(test_config(), store.clone(), clock.clone(), a_probe).await;
    a.pair().await;

    let b_probe = FakeProcessProbe::new("host-a", 200);
    b_probe.kill(100);
    let b = build(test_config(), store, clock, b_probe).await;

    // Startup recovery already released the dead owner and adopted the agent
    assert_eq!(b.session().owner_instance(), Some(b.runtime.instance_id()));
    assert_eq!(b.transport.connects(AGENT).len(), 1);
}

#[tokio::test]
async fn capacity_limit_refuses_new_agents() {
    let ctx = setup_with(test_config().capacity(1)).await;
    ctx.runtime.initialize(&agent()).await.unwrap();

    let result = ctx.runtime.initialize(&AgentId::new("agent-2")).await;

    assert!(matches!(
        result,
        Err(RuntimeError::Fleet(FleetError::CapacityExceeded { capacity: 1, .. }))
    ));
    let stored = ctx.store.snapshot().sessions[&AgentId::new("agent-2")].clone();
    assert_eq!(stored.owner, None);
    assert_eq!(stored.status, AgentStatus::Pending);
}

#[tokio::test]
async fn startup_recovery_restores_released_agents() {
    let store = MemoryStore::new();
    let clock = FakeClock::new();
    let a = build(test_config(), store.clone(), clock.clone(), FakeProcessProbe::new("host-a", 100))
        .await;
    a.pair().await;
    let shutdown = a.runtime.shutdown().await;
    assert_eq!(shutdown.agents_released, 1);

    let b = build(test_config(), store, clock, FakeProcessProbe::new("host-b", 200)).await;

    let connects = b.transport.connects(AGENT);
    assert_eq!(connects.len(), 1);
    assert!(connects[0].1.is_some());
    assert!(b.runtime.is_tracked(&agent()));
}

#[tokio::test]
async fn recovery_skips_agents_without_credentials() {
    let store = MemoryStore::new();
    let clock = FakeClock::new();
    let a = build(test_config(), store.clone(), clock.clone(), FakeProcessProbe::new("host-a", 100))
        .await;
    a.runtime.initialize(&agent()).await.unwrap();
    a.runtime.shutdown().await;

    let b = build(test_config(), store, clock, FakeProcessProbe::new("host-b", 200)).await;
    let report = b.runtime.recover().await.unwrap();

    assert_eq!(report.attempted, 0);
    assert!(b.transport.connects(AGENT).is_empty());
}

#[tokio::test]
async fn fleet_health_reports_peers_and_local_agents() {
    let (a, b) = pair_of_instances().await;
    a.pair().await;
    a.runtime.heartbeat().await.unwrap();

    let health = a.runtime.fleet_health().await.unwrap();

    assert_eq!(health.live_instances, 2);
    assert_eq!(health.local_agents, 1);
    assert_eq!(health.peers.get(a.runtime.instance_id()), Some(&1));
    assert_eq!(health.peers.get(b.runtime.instance_id()), Some(&0));
    assert_eq!(health.agents_by_status.get(&AgentStatus::Connected), Some(&1));
    assert_eq!(health.capacity, a.runtime.config().capacity);
}
