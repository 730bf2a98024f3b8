// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

mod fleet;
mod inbound;
mod lifecycle;
mod operator;
mod reconnect;

use super::*;
use crate::config::EngineConfig;
use sb_adapters::{FakeNotifier, FakeProcessProbe, FakeTransport, MemorySharedCache};
use sb_core::test_support::{bytes_b64, credential_value, PHONE_JID};
use sb_core::{AgentStatus, DisconnectCode, FakeClock};
use sb_storage::MemoryStore;
use std::time::Duration;

const AGENT: &str = "agent-1";

type TestRuntime = Orchestrator<FakeTransport, FakeNotifier, FakeClock>;

struct TestContext {
    runtime: TestRuntime,
    store: MemoryStore,
    transport: FakeTransport,
    notifier: FakeNotifier,
    clock: FakeClock,
    events: tokio::sync::Mutex<mpsc::Receiver<Event>>,
}

impl TestContext {
    /// Feed every queued transport event through the runtime.
    async fn pump(&self) {
        let mut events = self.events.lock().await;
        while let Ok(event) = events.try_recv() {
            self.runtime.handle_event(event).await.unwrap();
        }
    }

    async fn status(&self) -> AgentStatus {
        self.runtime.get_status(&agent()).await.unwrap().status
    }

    fn session(&self) -> AgentSession {
        self.store.snapshot().sessions[&agent()].clone()
    }

    /// Initialize a fresh agent and walk it through a complete pairing.
    async fn pair(&self) {
        self.runtime.initialize(&agent()).await.unwrap();
        self.transport.emit_qr(AGENT, "qr-1").await;
        self.pump().await;
        self.transport.emit_creds(AGENT, credential_value(true)).await;
        self.transport.emit_opened(AGENT, Some(PHONE_JID)).await;
        self.pump().await;
        assert_eq!(self.status().await, AgentStatus::Connected);
    }

    /// Advance past `duration` and fire whatever timers came due.
    async fn advance(&self, duration: Duration) -> usize {
        self.clock.advance(duration);
        self.runtime.tick_timers().await
    }
}

fn agent() -> AgentId {
    AgentId::new(AGENT)
}

fn test_config() -> EngineConfig {
    EngineConfig::default()
        .master_key(bytes_b64(42, 32))
        .startup_stagger(Duration::from_millis(1))
        .forward_base_delay(Duration::from_millis(1))
}

async fn setup() -> TestContext {
    setup_with(test_config()).await
}

async fn setup_with(config: EngineConfig) -> TestContext {
    build(config, MemoryStore::new(), FakeClock::new(), FakeProcessProbe::new("host-a", 100)).await
}

/// Build an instance over a shared store and clock, registered with the
/// fleet.
async fn build(
    config: EngineConfig,
    store: MemoryStore,
    clock: FakeClock,
    probe: FakeProcessProbe,
) -> TestContext {
    let transport = FakeTransport::new();
    let notifier = FakeNotifier::new();
    let (event_tx, events) = mpsc::channel(256);
    let deps = OrchestratorDeps {
        store: Arc::new(store.clone()),
        transport: transport.clone(),
        shared_cache: Arc::new(MemorySharedCache::new()),
        notifier: notifier.clone(),
        probe: Arc::new(probe),
    };
    let runtime = Orchestrator::new(config, deps, clock.clone(), event_tx).unwrap();
    runtime.recover().await.unwrap();
    TestContext {
        runtime,
        store,
        transport,
        notifier,
        clock,
        events: tokio::sync::Mutex::new(events),
    }
}

#[tokio::test]
async fn invalid_master_key_is_rejected() {
    let (event_tx, _events) = mpsc::channel(1);
    let deps = OrchestratorDeps {
        store: Arc::new(MemoryStore::new()),
        transport: FakeTransport::new(),
        shared_cache: Arc::new(MemorySharedCache::new()),
        notifier: FakeNotifier::new(),
        probe: Arc::new(FakeProcessProbe::new("host-a", 100)),
    };
    let config = test_config().master_key("c2hvcnQ=");

    let result = Orchestrator::new(config, deps, FakeClock::new(), event_tx);

    assert!(matches!(result, Err(RuntimeError::Config(_))));
}

#[tokio::test]
async fn shutdown_event_is_ignored() {
    let ctx = setup().await;
    ctx.runtime.handle_event(Event::Shutdown).await.unwrap();
}

#[tokio::test]
async fn unknown_timer_is_ignored() {
    let ctx = setup().await;
    let result = ctx
        .runtime
        .handle_event(Event::TimerStart { id: sb_core::TimerId::new("other:timer") })
        .await;
    assert!(result.is_ok());
}
