// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The daemon's long-running loops.
//!
//! Transport events and fired timers are routed to one worker task per agent.
//! A worker handles its agent's events in arrival order while agents run in
//! parallel, so a slow connect only holds up its own agent. Fleet heartbeats
//! and orphan scans run on their own intervals.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sb_adapters::{Notifier, SessionTransport};
use sb_core::{AgentId, Clock, Event};
use sb_engine::Orchestrator;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How often fired timers are collected
pub const TIMER_TICK: Duration = Duration::from_millis(100);

/// How long an agent's worker waits for work before exiting
pub const WORKER_IDLE: Duration = Duration::from_secs(60);

/// Process transport events and fire timers until `cancel` is triggered.
pub async fn run_engine_loop<T, N, C>(
    runtime: Arc<Orchestrator<T, N, C>>,
    mut events: mpsc::Receiver<Event>,
    timer_tick: Duration,
    cancel: CancellationToken,
) where
    T: SessionTransport,
    N: Notifier,
    C: Clock,
{
    let mut tick = tokio::time::interval(timer_tick);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut dispatcher = Dispatcher::new(Arc::clone(&runtime), WORKER_IDLE);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(event) = events.recv() => dispatcher.dispatch(event).await,
            _ = tick.tick() => {
                for event in runtime.take_fired_timers() {
                    dispatcher.dispatch(event).await;
                }
                dispatcher.prune();
            }
        }
    }
    dispatcher.stop().await;
    info!("engine loop stopped");
}

struct Worker {
    tx: mpsc::UnboundedSender<Event>,
    handle: JoinHandle<()>,
}

/// Routes events to per-agent workers, spawning them on demand.
pub(crate) struct Dispatcher<T, N: Notifier, C: Clock> {
    runtime: Arc<Orchestrator<T, N, C>>,
    workers: HashMap<AgentId, Worker>,
    idle: Duration,
}

impl<T, N, C> Dispatcher<T, N, C>
where
    T: SessionTransport,
    N: Notifier,
    C: Clock,
{
    pub(crate) fn new(runtime: Arc<Orchestrator<T, N, C>>, idle: Duration) -> Self {
        Self { runtime, workers: HashMap::new(), idle }
    }

    /// Hand the event to its agent's worker. Events that belong to no agent
    /// are handled inline.
    pub(crate) async fn dispatch(&mut self, mut event: Event) {
        let Some(agent) = route(&event) else {
            handle(&self.runtime, event).await;
            return;
        };

        let mut previous = None;
        if let Some(worker) = self.workers.remove(&agent) {
            match worker.tx.send(event) {
                Ok(()) => {
                    self.workers.insert(agent, worker);
                    return;
                }
                // The worker went idle; its successor waits for it to finish
                Err(mpsc::error::SendError(returned)) => {
                    event = returned;
                    previous = Some(worker.handle);
                }
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if tx.send(event).is_err() {
            warn!(agent_id = %agent, "agent worker queue closed before start");
            return;
        }
        debug!(agent_id = %agent, "starting agent worker");
        let handle =
            tokio::spawn(run_worker(Arc::clone(&self.runtime), rx, previous, self.idle));
        self.workers.insert(agent, Worker { tx, handle });
    }

    /// Forget workers that have exited.
    pub(crate) fn prune(&mut self) {
        self.workers.retain(|_, worker| !worker.handle.is_finished());
    }

    #[cfg(test)]
    pub(crate) fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Close every queue and wait for the workers to finish what they hold.
    pub(crate) async fn stop(&mut self) {
        for (agent, worker) in self.workers.drain() {
            drop(worker.tx);
            if let Err(e) = worker.handle.await {
                warn!(agent_id = %agent, error = %e, "agent worker failed");
            }
        }
    }
}

/// The agent an event is serialized under.
fn route(event: &Event) -> Option<AgentId> {
    match event {
        Event::TimerStart { id } => id.agent_id(),
        event => event.agent_id().cloned(),
    }
}

async fn handle<T, N, C>(runtime: &Orchestrator<T, N, C>, event: Event)
where
    T: SessionTransport,
    N: Notifier,
    C: Clock,
{
    if let Err(e) = runtime.handle_event(event).await {
        warn!(error = %e, "event handling failed");
    }
}

async fn run_worker<T, N, C>(
    runtime: Arc<Orchestrator<T, N, C>>,
    mut rx: mpsc::UnboundedReceiver<Event>,
    previous: Option<JoinHandle<()>>,
    idle: Duration,
) where
    T: SessionTransport,
    N: Notifier,
    C: Clock,
{
    if let Some(previous) = previous {
        if let Err(e) = previous.await {
            warn!(error = %e, "previous agent worker failed");
        }
    }
    loop {
        match tokio::time::timeout(idle, rx.recv()).await {
            Ok(Some(event)) => handle(&runtime, event).await,
            Ok(None) => break,
            Err(_) => {
                // Refuse new work, then finish anything that raced the close
                rx.close();
                while let Some(event) = rx.recv().await {
                    handle(&runtime, event).await;
                }
                break;
            }
        }
    }
}

/// Spawn the instance heartbeat and orphan scan loops.
pub fn spawn_fleet_loops<T, N, C>(
    runtime: Arc<Orchestrator<T, N, C>>,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>>
where
    T: SessionTransport,
    N: Notifier,
    C: Clock,
{
    let heartbeat_every = runtime.config().heartbeat_interval;
    let scan_every = runtime.config().orphan_scan_interval;

    let heartbeat = {
        let runtime = Arc::clone(&runtime);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(heartbeat_every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = runtime.heartbeat().await {
                            warn!(error = %e, "instance heartbeat failed");
                        }
                    }
                }
            }
        })
    };

    let orphan_scan = tokio::spawn(async move {
        let mut interval = tokio::time::interval(scan_every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately and startup already recovered
        interval.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => match runtime.scan_orphans().await {
                    Ok(report) if report.released > 0 => info!(
                        released = report.released,
                        initialized = report.initialized,
                        failed = report.failed,
                        "adopted orphaned agents"
                    ),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "orphan scan failed"),
                },
            }
        }
    });

    vec![heartbeat, orphan_scan]
}

/// Resolve when the process receives SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}

#[cfg(test)]
#[path = "engine_loop_tests.rs"]
mod tests;
