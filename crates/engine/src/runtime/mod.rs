// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Orchestrator runtime: drives agent state machines from events, timers
//! and operator calls.

mod api;
mod handlers;

pub use api::{
    CleanupReport, ExistsReport, InitReport, InitTrigger, RecoveryReport, ShutdownReport,
    StatusReport,
};

use crate::cache::SessionCache;
use crate::config::EngineConfig;
use crate::error::RuntimeError;
use crate::executor::{Executor, ExecutorParts};
use crate::fleet::FleetCoordinator;
use crate::health::Counters;
use crate::locks::InitLocks;
use crate::machine::{transition, AgentMachine, Input, MachineContext, Transition};
use crate::pipeline::Pipeline;
use crate::reconnect::ReconnectScheduler;
use crate::registry::{Registry, Slot};
use crate::scheduler::Scheduler;
use crate::vault::Vault;
use parking_lot::Mutex;
use sb_adapters::{Notifier, ProcessProbe, SessionTransport, SharedCache};
use sb_core::{AgentId, AgentSession, Clock, Event, InstanceId};
use sb_storage::{AgentStore, StoreError};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

/// External collaborators the orchestrator is built from.
pub struct OrchestratorDeps<T, N> {
    pub store: Arc<dyn AgentStore>,
    pub transport: T,
    pub shared_cache: Arc<dyn SharedCache>,
    pub notifier: N,
    pub probe: Arc<dyn ProcessProbe>,
}

/// Runtime that coordinates the orchestrator's components
pub struct Orchestrator<T, N: Notifier, C: Clock> {
    pub(crate) config: EngineConfig,
    pub(crate) store: Arc<dyn AgentStore>,
    pub(crate) executor: Executor<T, N, C>,
    pub(crate) vault: Arc<Vault<C>>,
    pub(crate) cache: Arc<SessionCache<C>>,
    pub(crate) fleet: Arc<FleetCoordinator<C>>,
    pub(crate) pipeline: Arc<Pipeline<N, C>>,
    pub(crate) registry: Arc<Registry>,
    pub(crate) scheduler: Arc<Mutex<Scheduler>>,
    pub(crate) reconnects: Arc<Mutex<ReconnectScheduler>>,
    pub(crate) locks: InitLocks,
    pub(crate) counters: Arc<Counters>,
    pub(crate) clock: C,
}

impl<T, N, C> Orchestrator<T, N, C>
where
    T: SessionTransport,
    N: Notifier,
    C: Clock,
{
    /// Create a new orchestrator.
    ///
    /// Transport events for every session are sent on `event_tx`; the caller
    /// feeds them back through [`Orchestrator::handle_event`].
    pub fn new(
        config: EngineConfig,
        deps: OrchestratorDeps<T, N>,
        clock: C,
        event_tx: mpsc::Sender<Event>,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;
        let key = config.key_bytes()?;

        let store = deps.store;
        let counters = Arc::new(Counters::default());
        let cache = Arc::new(SessionCache::new(
            &config.cache,
            deps.shared_cache,
            config.op_timeout,
            clock.clone(),
        ));
        let vault = Arc::new(Vault::new(
            &key,
            Arc::clone(&store),
            Arc::clone(&cache),
            clock.clone(),
            config.freshness_window,
            config.op_timeout,
        ));
        let fleet = Arc::new(FleetCoordinator::new(
            Arc::clone(&store),
            deps.probe,
            clock.clone(),
            config.capacity,
            config.liveness_timeout,
            config.op_timeout,
        ));
        let pipeline = Arc::new(Pipeline::new(
            &config,
            Arc::clone(&store),
            deps.notifier,
            Arc::clone(&cache),
            clock.clone(),
            Arc::clone(&counters),
        ));
        let registry = Arc::new(Registry::new());
        let scheduler = Arc::new(Mutex::new(Scheduler::new()));
        let reconnects = Arc::new(Mutex::new(ReconnectScheduler::new(config.backoff.clone())));

        let executor = Executor::new(ExecutorParts {
            store: Arc::clone(&store),
            transport: deps.transport,
            vault: Arc::clone(&vault),
            fleet: Arc::clone(&fleet),
            pipeline: Arc::clone(&pipeline),
            registry: Arc::clone(&registry),
            scheduler: Arc::clone(&scheduler),
            reconnects: Arc::clone(&reconnects),
            clock: clock.clone(),
            event_tx,
            max_concurrent_connects: config.max_concurrent_connects,
            connect_timeout: config.connect_timeout,
            op_timeout: config.op_timeout,
            flush_retry_delay: config.flush_retry_delay,
        });

        Ok(Self {
            locks: InitLocks::new(config.init_lock_ttl),
            config,
            store,
            executor,
            vault,
            cache,
            fleet,
            pipeline,
            registry,
            scheduler,
            reconnects,
            counters,
            clock,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn instance_id(&self) -> &InstanceId {
        self.fleet.instance_id()
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn pipeline(&self) -> &Pipeline<N, C> {
        &self.pipeline
    }

    /// Get the next timer deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.lock().next_deadline()
    }

    /// Whether this instance currently drives the agent.
    pub fn is_tracked(&self, agent: &AgentId) -> bool {
        self.registry.is_tracked(agent)
    }

    pub fn tracked_agents(&self) -> Vec<AgentId> {
        self.registry.tracked_ids()
    }

    fn machine_context(&self) -> MachineContext {
        MachineContext {
            now_ms: self.clock.epoch_ms(),
            relink_ttl: self.config.relink_ttl,
            pairing_window: self.config.pairing_restart_window,
            heartbeat_interval: self.config.heartbeat_interval,
        }
    }

    /// Feed one input through the agent's machine and execute the resulting
    /// effects. Events the executor produces for the current generation are
    /// applied in the same pass.
    ///
    /// The slot must already hold a machine. Returns the final machine; the
    /// slot is retired when the agent is no longer tracked.
    pub(crate) async fn drive(
        &self,
        slot: &mut Slot,
        agent: &AgentId,
        input: Input,
    ) -> Result<AgentMachine, RuntimeError> {
        let mut pending = VecDeque::from([input]);
        let mut last = None;

        while let Some(input) = pending.pop_front() {
            let Some(machine) = slot.machine() else {
                break;
            };
            let input_name = input.name();
            let Transition { next, effects, classification } =
                transition(machine, input, &self.machine_context());

            if let Some(class) = classification {
                self.counters.record_classification(class);
            }
            let new_relink = next.relink.as_ref().map(|r| &r.token);
            if new_relink.is_some() && new_relink != machine.relink.as_ref().map(|r| &r.token) {
                Counters::bump(&self.counters.relinks_issued);
            }
            if next.status != machine.status {
                tracing::info!(
                    agent_id = %agent,
                    from = %machine.status,
                    to = %next.status,
                    input = input_name,
                    generation = next.generation,
                    "agent status changed"
                );
            }

            let generation = next.generation;
            self.registry.set_tracked(agent, next.is_tracked().then_some(next.status));
            slot.replace(next.clone());
            last = Some(next);

            for effect in effects {
                match self.executor.execute(effect).await {
                    Ok(Some(event)) if event.generation() == Some(generation) => {
                        if let Some(input) = self.event_input(&event) {
                            pending.push_back(input);
                        }
                    }
                    Ok(Some(event)) => {
                        tracing::debug!(event = %event.log_summary(), "dropping stale follow-up");
                        Counters::bump(&self.counters.stale_events);
                    }
                    Ok(None) => {}
                    Err(_) => Counters::bump(&self.counters.effect_errors),
                }
            }
        }

        if !slot.machine().is_some_and(AgentMachine::is_tracked) {
            slot.retire();
        }
        last.ok_or_else(|| RuntimeError::AgentNotFound(agent.clone()))
    }

    /// Read the durable record, failing if the agent was never created.
    pub(crate) async fn load_session(&self, agent: &AgentId) -> Result<AgentSession, RuntimeError> {
        self.bounded("session load", self.store.get_session(agent))
            .await?
            .ok_or_else(|| RuntimeError::AgentNotFound(agent.clone()))
    }

    pub(crate) async fn bounded<F, R>(&self, what: &'static str, fut: F) -> Result<R, RuntimeError>
    where
        F: Future<Output = Result<R, StoreError>>,
    {
        match tokio::time::timeout(self.config.op_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(RuntimeError::Timeout(what)),
        }
    }
}

#[cfg(test)]
#[path = "../runtime_tests/mod.rs"]
mod tests;
