// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use sb_adapters::{FakeNotifier, FakeProcessProbe, FakeTransport, MemorySharedCache};
use sb_core::test_support::{credential_value, PHONE_JID};
use sb_core::{AgentId, AgentStatus, DisconnectCode, FakeClock};
use sb_engine::{EngineConfig, OrchestratorDeps};
use sb_storage::MemoryStore;

type TestRuntime = Orchestrator<FakeTransport, FakeNotifier, FakeClock>;

fn runtime(
    transport: FakeTransport,
    store: MemoryStore,
) -> (Arc<TestRuntime>, mpsc::Receiver<Event>) {
    runtime_at(transport, store, FakeClock::new())
}

fn runtime_at(
    transport: FakeTransport,
    store: MemoryStore,
    clock: FakeClock,
) -> (Arc<TestRuntime>, mpsc::Receiver<Event>) {
    let config = EngineConfig::default()
        .master_key("KioqKioqKioqKioqKioqKioqKioqKioqKioqKioqKio=")
        .heartbeat_interval(Duration::from_millis(20))
        .liveness_timeout(Duration::from_millis(100))
        .orphan_scan_interval(Duration::from_millis(20));
    let (tx, rx) = mpsc::channel(64);
    let runtime = Orchestrator::new(
        config,
        OrchestratorDeps {
            store: Arc::new(store),
            transport,
            shared_cache: Arc::new(MemorySharedCache::new()),
            notifier: FakeNotifier::new(),
            probe: Arc::new(FakeProcessProbe::new("host-a", 100)),
        },
        clock,
        tx,
    )
    .unwrap();
    (Arc::new(runtime), rx)
}

fn status(store: &MemoryStore, agent: &str) -> Option<AgentStatus> {
    store.snapshot().sessions.get(&AgentId::new(agent)).map(|s| s.status)
}

/// Handle whatever the transport has queued, bypassing the loop.
async fn drain(runtime: &TestRuntime, events: &mut mpsc::Receiver<Event>) {
    while let Ok(event) = events.try_recv() {
        runtime.handle_event(event).await.unwrap();
    }
}

/// Route whatever the transport has queued through the dispatcher.
async fn dispatch_queued(
    dispatcher: &mut Dispatcher<FakeTransport, FakeNotifier, FakeClock>,
    events: &mut mpsc::Receiver<Event>,
) {
    while let Ok(event) = events.try_recv() {
        dispatcher.dispatch(event).await;
    }
}

async fn wait_for(mut done: impl FnMut() -> bool) {
    for _ in 0..200 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn engine_loop_feeds_transport_events_to_runtime() {
    let transport = FakeTransport::new();
    let store = MemoryStore::new();
    let (runtime, events) = runtime(transport.clone(), store.clone());
    let agent = AgentId::new("agent-1");
    runtime.initialize(&agent).await.unwrap();

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(run_engine_loop(
        Arc::clone(&runtime),
        events,
        Duration::from_millis(10),
        cancel.clone(),
    ));

    transport.emit_qr("agent-1", "qr-1").await;
    wait_for(|| {
        store.snapshot().sessions.get(&agent).map(|s| s.status) == Some(AgentStatus::QrPending)
    })
    .await;

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn fleet_loops_heartbeat_and_stop_on_cancel() {
    let store = MemoryStore::new();
    let (runtime, _events) = runtime(FakeTransport::new(), store.clone());
    runtime.recover().await.unwrap();
    let agent = AgentId::new("agent-1");
    runtime.initialize(&agent).await.unwrap();

    let cancel = CancellationToken::new();
    let handles = spawn_fleet_loops(Arc::clone(&runtime), cancel.clone());

    // The heartbeat publishes the assigned set on the instance record
    let instance = runtime.instance_id().clone();
    wait_for(|| {
        store
            .snapshot()
            .instances
            .get(&instance)
            .is_some_and(|record| record.assigned.contains(&agent))
    })
    .await;

    cancel.cancel();
    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn slow_connect_holds_up_only_its_own_agent() {
    let transport = FakeTransport::new();
    let store = MemoryStore::new();
    let clock = FakeClock::new();
    let (runtime, mut events) = runtime_at(transport.clone(), store.clone(), clock.clone());
    runtime.recover().await.unwrap();

    // agent-1 pairs and later drops; agent-2 waits for its challenge
    runtime.initialize(&AgentId::new("agent-1")).await.unwrap();
    runtime.initialize(&AgentId::new("agent-2")).await.unwrap();
    transport.emit_qr("agent-1", "qr-1").await;
    transport.emit_creds("agent-1", credential_value(true)).await;
    transport.emit_opened("agent-1", Some(PHONE_JID)).await;
    drain(&runtime, &mut events).await;
    assert_eq!(status(&store, "agent-1"), Some(AgentStatus::Connected));
    clock.advance(Duration::from_secs(120));
    transport.emit_code("agent-1", DisconnectCode::ConnectionClosed).await;
    drain(&runtime, &mut events).await;
    assert_eq!(status(&store, "agent-1"), Some(AgentStatus::Reconnecting));

    let mut dispatcher = Dispatcher::new(Arc::clone(&runtime), WORKER_IDLE);
    transport.hold_connects("agent-1");
    let backoff = &runtime.config().backoff;
    clock.advance(backoff.max + backoff.max_jitter);
    let fired = runtime.take_fired_timers();
    assert!(!fired.is_empty());
    for event in fired {
        dispatcher.dispatch(event).await;
    }

    // agent-2 progresses while agent-1's reconnect is parked
    transport.emit_qr("agent-2", "qr-1").await;
    dispatch_queued(&mut dispatcher, &mut events).await;
    wait_for(|| status(&store, "agent-2") == Some(AgentStatus::QrPending)).await;
    assert_eq!(transport.connects("agent-1").len(), 1);
    assert_eq!(dispatcher.worker_count(), 2);

    transport.release_connects("agent-1");
    wait_for(|| transport.connects("agent-1").len() == 2).await;
    dispatcher.stop().await;
    assert_eq!(dispatcher.worker_count(), 0);
}

#[tokio::test]
async fn idle_worker_exits_and_a_fresh_one_takes_over() {
    let transport = FakeTransport::new();
    let store = MemoryStore::new();
    let (runtime, mut events) = runtime(transport.clone(), store.clone());
    runtime.recover().await.unwrap();
    runtime.initialize(&AgentId::new("agent-1")).await.unwrap();
    let mut dispatcher = Dispatcher::new(Arc::clone(&runtime), Duration::from_millis(10));

    transport.emit_qr("agent-1", "qr-1").await;
    dispatch_queued(&mut dispatcher, &mut events).await;
    wait_for(|| status(&store, "agent-1") == Some(AgentStatus::QrPending)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    dispatcher.prune();
    assert_eq!(dispatcher.worker_count(), 0);

    transport.emit_creds("agent-1", credential_value(true)).await;
    transport.emit_opened("agent-1", Some(PHONE_JID)).await;
    dispatch_queued(&mut dispatcher, &mut events).await;
    wait_for(|| status(&store, "agent-1") == Some(AgentStatus::Connected)).await;
    dispatcher.stop().await;
}
