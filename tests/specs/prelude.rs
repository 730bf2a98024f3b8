// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared harness for the workspace specs.

use std::sync::Arc;
use std::time::Duration;

pub use sb_adapters::{FakeNotifier, FakeProcessProbe, FakeTransport, MemorySharedCache};
pub use sb_core::test_support::{bytes_b64, credential_value, text_payload, PHONE_JID};
pub use sb_core::{AgentId, AgentStatus, DisconnectCode, FakeClock};
pub use sb_engine::{EngineConfig, FleetError, Orchestrator, OrchestratorDeps, RuntimeError};
pub use sb_storage::{AgentStore, FileStore, MemoryStore};
use tokio::sync::{mpsc, Mutex};

pub type Runtime = Orchestrator<FakeTransport, FakeNotifier, FakeClock>;

/// One orchestrator instance with its own transport and notifier.
pub struct Instance {
    pub runtime: Runtime,
    pub transport: FakeTransport,
    pub notifier: FakeNotifier,
    events: Mutex<mpsc::Receiver<sb_core::Event>>,
}

pub fn config() -> EngineConfig {
    EngineConfig::default()
        .master_key(bytes_b64(9, 32))
        .startup_stagger(Duration::from_millis(1))
        .forward_base_delay(Duration::from_millis(1))
}

impl Instance {
    /// Build an instance on `host`/`pid` and run startup recovery.
    pub async fn start(
        store: Arc<dyn AgentStore>,
        clock: &FakeClock,
        host: &str,
        pid: u32,
    ) -> Self {
        Self::start_with(config(), store, clock, FakeProcessProbe::new(host, pid)).await
    }

    pub async fn start_with(
        config: EngineConfig,
        store: Arc<dyn AgentStore>,
        clock: &FakeClock,
        probe: FakeProcessProbe,
    ) -> Self {
        let transport = FakeTransport::new();
        let notifier = FakeNotifier::new();
        let (tx, rx) = mpsc::channel(256);
        let runtime = Orchestrator::new(
            config,
            OrchestratorDeps {
                store,
                transport: transport.clone(),
                shared_cache: Arc::new(MemorySharedCache::new()),
                notifier: notifier.clone(),
                probe: Arc::new(probe),
            },
            clock.clone(),
            tx,
        )
        .unwrap();
        runtime.recover().await.unwrap();
        Self { runtime, transport, notifier, events: Mutex::new(rx) }
    }

    /// Feed every queued transport event through the runtime.
    pub async fn pump(&self) {
        let mut events = self.events.lock().await;
        while let Ok(event) = events.try_recv() {
            self.runtime.handle_event(event).await.unwrap();
        }
    }

    /// Pair a fresh agent through the challenge flow.
    pub async fn pair(&self, agent: &str) {
        self.runtime.initialize(&AgentId::new(agent)).await.unwrap();
        self.transport.emit_qr(agent, "qr").await;
        self.pump().await;
        self.transport.emit_creds(agent, credential_value(true)).await;
        self.transport.emit_opened(agent, Some(PHONE_JID)).await;
        self.pump().await;
        assert_eq!(self.status(agent).await, AgentStatus::Connected);
    }

    /// Complete a restore connect the transport has already been asked for.
    pub async fn open(&self, agent: &str) {
        self.transport.emit_opened(agent, Some(PHONE_JID)).await;
        self.pump().await;
    }

    pub async fn status(&self, agent: &str) -> AgentStatus {
        self.runtime.get_status(&AgentId::new(agent)).await.unwrap().status
    }
}
