// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use sb_adapters::FakeProcessProbe;
use sb_core::FakeClock;
use sb_storage::MemoryStore;

const LIVENESS: Duration = Duration::from_secs(30);

struct Node {
    fleet: FleetCoordinator<FakeClock>,
    probe: FakeProcessProbe,
}

fn node(store: &MemoryStore, clock: &FakeClock, host: &str, pid: u32, capacity: usize) -> Node {
    let probe = FakeProcessProbe::new(host, pid);
    let fleet = FleetCoordinator::new(
        Arc::new(store.clone()),
        Arc::new(probe.clone()),
        clock.clone(),
        capacity,
        LIVENESS,
        Duration::from_secs(1),
    );
    Node { fleet, probe }
}

async fn agent(store: &MemoryStore, clock: &FakeClock, name: &str) -> AgentId {
    let id = AgentId::new(name);
    store.ensure_session(&id, clock.epoch_ms()).await.unwrap();
    id
}

#[tokio::test]
async fn assign_claims_unowned_agent() {
    let store = MemoryStore::new();
    let clock = FakeClock::new();
    let a = node(&store, &clock, "host-a", 100, 10);
    a.fleet.register().await.unwrap();
    let agent = agent(&store, &clock, "agent-1").await;

    assert_eq!(
        a.fleet.assign(&agent, 0).await.unwrap(),
        Assignment::Claimed { superseded: None }
    );
    assert_eq!(a.fleet.assign(&agent, 1).await.unwrap(), Assignment::AlreadyOwned);

    let session = store.get_session(&agent).await.unwrap().unwrap();
    assert_eq!(session.owner_instance(), Some(a.fleet.instance_id()));
}

#[tokio::test]
async fn live_owner_blocks_peer() {
    let store = MemoryStore::new();
    let clock = FakeClock::new();
    let a = node(&store, &clock, "host-a", 100, 10);
    let b = node(&store, &clock, "host-b", 200, 10);
    a.fleet.register().await.unwrap();
    b.fleet.register().await.unwrap();
    let agent = agent(&store, &clock, "agent-1").await;

    a.fleet.assign(&agent, 0).await.unwrap();
    let err = b.fleet.assign(&agent, 0).await.unwrap_err();
    match err {
        FleetError::OwnedElsewhere { owner, .. } => {
            assert_eq!(&owner.instance_id, a.fleet.instance_id());
            assert_eq!(owner.host, "host-a");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn concurrent_assign_has_one_winner() {
    let store = MemoryStore::new();
    let clock = FakeClock::new();
    let a = node(&store, &clock, "host-a", 100, 10);
    let b = node(&store, &clock, "host-b", 200, 10);
    a.fleet.register().await.unwrap();
    b.fleet.register().await.unwrap();
    let agent = agent(&store, &clock, "agent-1").await;

    let (ra, rb) = tokio::join!(a.fleet.assign(&agent, 0), b.fleet.assign(&agent, 0));
    assert_eq!(usize::from(ra.is_ok()) + usize::from(rb.is_ok()), 1);
}

#[tokio::test]
async fn stale_heartbeat_owner_is_superseded() {
    let store = MemoryStore::new();
    let clock = FakeClock::new();
    let a = node(&store, &clock, "host-a", 100, 10);
    let b = node(&store, &clock, "host-b", 200, 10);
    a.fleet.register().await.unwrap();
    b.fleet.register().await.unwrap();
    let agent = agent(&store, &clock, "agent-1").await;
    a.fleet.assign(&agent, 0).await.unwrap();

    clock.advance(LIVENESS);
    b.fleet.heartbeat(BTreeSet::new()).await.unwrap();

    match b.fleet.assign(&agent, 0).await.unwrap() {
        Assignment::Claimed { superseded: Some(dead) } => {
            assert_eq!(&dead.instance_id, a.fleet.instance_id());
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn owner_cleared_mid_claim_is_retryable() {
    let store = MemoryStore::new();
    let clock = FakeClock::new();
    let a = node(&store, &clock, "host-a", 100, 10);
    let b = node(&store, &clock, "host-b", 200, 10);
    a.fleet.register().await.unwrap();
    b.fleet.register().await.unwrap();
    let agent = agent(&store, &clock, "agent-1").await;
    a.fleet.assign(&agent, 0).await.unwrap();
    clock.advance(LIVENESS);
    b.fleet.heartbeat(BTreeSet::new()).await.unwrap();

    store.race_next_claim();
    let err = b.fleet.assign(&agent, 0).await.unwrap_err();
    assert!(matches!(&err, FleetError::ClaimRaced(id) if *id == agent));

    assert_eq!(
        b.fleet.assign(&agent, 0).await.unwrap(),
        Assignment::Claimed { superseded: None }
    );
}

#[tokio::test]
async fn same_host_dead_process_is_superseded_before_timeout() {
    let store = MemoryStore::new();
    let clock = FakeClock::new();
    let a = node(&store, &clock, "shared-host", 100, 10);
    let b = node(&store, &clock, "shared-host", 200, 10);
    a.fleet.register().await.unwrap();
    b.fleet.register().await.unwrap();
    let agent = agent(&store, &clock, "agent-1").await;
    a.fleet.assign(&agent, 0).await.unwrap();

    b.probe.kill(100);
    assert!(matches!(b.fleet.assign(&agent, 0).await, Ok(Assignment::Claimed { .. })));
}

#[tokio::test]
async fn capacity_refusal_redirects_to_least_loaded_peer() {
    let store = MemoryStore::new();
    let clock = FakeClock::new();
    let a = node(&store, &clock, "host-a", 100, 1);
    let b = node(&store, &clock, "host-b", 200, 5);
    let c = node(&store, &clock, "host-c", 300, 5);
    a.fleet.register().await.unwrap();
    b.fleet.register().await.unwrap();
    c.fleet.register().await.unwrap();
    b.fleet.heartbeat(BTreeSet::from([AgentId::new("x"), AgentId::new("y")])).await.unwrap();
    c.fleet.heartbeat(BTreeSet::from([AgentId::new("z")])).await.unwrap();

    let agent = agent(&store, &clock, "agent-1").await;
    match a.fleet.assign(&agent, 1).await.unwrap_err() {
        FleetError::CapacityExceeded { capacity, redirect } => {
            assert_eq!(capacity, 1);
            assert_eq!(redirect.as_ref(), Some(c.fleet.instance_id()));
        }
        other => panic!("unexpected {other:?}"),
    }
    // Nothing was claimed
    assert!(store.get_session(&agent).await.unwrap().unwrap().owner.is_none());
}

#[tokio::test]
async fn orphans_are_detected_and_released() {
    let store = MemoryStore::new();
    let clock = FakeClock::new();
    let a = node(&store, &clock, "host-a", 100, 10);
    let b = node(&store, &clock, "host-b", 200, 10);
    a.fleet.register().await.unwrap();
    b.fleet.register().await.unwrap();
    let one = agent(&store, &clock, "agent-1").await;
    let two = agent(&store, &clock, "agent-2").await;
    a.fleet.assign(&one, 0).await.unwrap();
    b.fleet.assign(&two, 0).await.unwrap();

    clock.advance(LIVENESS + Duration::from_secs(1));
    b.fleet.heartbeat(BTreeSet::from([two.clone()])).await.unwrap();

    let orphans = b.fleet.detect_orphans().await.unwrap();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0].agent_id, one);

    assert_eq!(b.fleet.release_orphans(&orphans).await.unwrap(), 1);
    assert!(store.get_session(&one).await.unwrap().unwrap().owner.is_none());
    let instances = store.list_instances().await.unwrap();
    assert_eq!(instances.len(), 1);
    assert_eq!(&instances[0].instance_id, b.fleet.instance_id());
}

#[tokio::test]
async fn release_of_reclaimed_orphan_is_a_noop() {
    let store = MemoryStore::new();
    let clock = FakeClock::new();
    let a = node(&store, &clock, "host-a", 100, 10);
    let b = node(&store, &clock, "host-b", 200, 10);
    a.fleet.register().await.unwrap();
    b.fleet.register().await.unwrap();
    let one = agent(&store, &clock, "agent-1").await;
    a.fleet.assign(&one, 0).await.unwrap();

    clock.advance(LIVENESS);
    b.fleet.heartbeat(BTreeSet::new()).await.unwrap();
    let orphans = b.fleet.detect_orphans().await.unwrap();
    // A peer claims it between detection and release
    b.fleet.assign(&one, 0).await.unwrap();

    assert_eq!(b.fleet.release_orphans(&orphans).await.unwrap(), 0);
    let session = store.get_session(&one).await.unwrap().unwrap();
    assert_eq!(session.owner_instance(), Some(b.fleet.instance_id()));
}

#[tokio::test]
async fn heartbeat_reregisters_pruned_instance() {
    let store = MemoryStore::new();
    let clock = FakeClock::new();
    let a = node(&store, &clock, "host-a", 100, 10);
    a.fleet.register().await.unwrap();
    store.remove_instance(a.fleet.instance_id()).await.unwrap();

    a.fleet.heartbeat(BTreeSet::from([AgentId::new("agent-1")])).await.unwrap();
    let live = a.fleet.list_live().await.unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].load(), 1);
}

#[tokio::test]
async fn unassign_only_clears_own_claim() {
    let store = MemoryStore::new();
    let clock = FakeClock::new();
    let a = node(&store, &clock, "host-a", 100, 10);
    let b = node(&store, &clock, "host-b", 200, 10);
    a.fleet.register().await.unwrap();
    b.fleet.register().await.unwrap();
    let one = agent(&store, &clock, "agent-1").await;
    a.fleet.assign(&one, 0).await.unwrap();

    assert!(!b.fleet.unassign(&one).await.unwrap());
    assert!(a.fleet.unassign(&one).await.unwrap());
}

#[tokio::test]
async fn deregister_removes_record() {
    let store = MemoryStore::new();
    let clock = FakeClock::new();
    let a = node(&store, &clock, "host-a", 100, 10);
    a.fleet.register().await.unwrap();
    a.fleet.deregister().await.unwrap();
    assert!(store.list_instances().await.unwrap().is_empty());
}
