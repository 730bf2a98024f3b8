// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Effect executor

use crate::fleet::{FleetCoordinator, FleetError};
use crate::pipeline::{FlushOutcome, Pipeline};
use crate::reconnect::{ReconnectDecision, ReconnectScheduler, RetryMode};
use crate::registry::Registry;
use crate::scheduler::Scheduler;
use crate::vault::{Vault, VaultError};
use parking_lot::Mutex;
use sb_adapters::{ConnectRequest, Notifier, SessionTransport, TransportError};
use sb_core::{AgentId, Clock, DisconnectCode, Effect, Event, Termination, TimerId};
use sb_storage::{AgentStore, StoreError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};

/// Errors that can occur during effect execution
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("vault error: {0}")]
    Vault(#[from] VaultError),
    #[error("fleet error: {0}")]
    Fleet(#[from] FleetError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("{0} timed out")]
    Timeout(&'static str),
}

/// Everything the executor acts on.
pub(crate) struct ExecutorParts<T, N: Notifier, C: Clock> {
    pub store: Arc<dyn AgentStore>,
    pub transport: T,
    pub vault: Arc<Vault<C>>,
    pub fleet: Arc<FleetCoordinator<C>>,
    pub pipeline: Arc<Pipeline<N, C>>,
    pub registry: Arc<Registry>,
    pub scheduler: Arc<Mutex<Scheduler>>,
    pub reconnects: Arc<Mutex<ReconnectScheduler>>,
    pub clock: C,
    pub event_tx: mpsc::Sender<Event>,
    pub max_concurrent_connects: usize,
    pub connect_timeout: Duration,
    pub op_timeout: Duration,
    pub flush_retry_delay: Duration,
}

/// Executes effects using the configured adapters
pub struct Executor<T, N: Notifier, C: Clock> {
    store: Arc<dyn AgentStore>,
    transport: T,
    vault: Arc<Vault<C>>,
    fleet: Arc<FleetCoordinator<C>>,
    pipeline: Arc<Pipeline<N, C>>,
    registry: Arc<Registry>,
    scheduler: Arc<Mutex<Scheduler>>,
    reconnects: Arc<Mutex<ReconnectScheduler>>,
    clock: C,
    /// Handed to every transport session for its events
    event_tx: mpsc::Sender<Event>,
    /// Global limit on simultaneous session establishment
    connect_limit: Semaphore,
    connect_timeout: Duration,
    op_timeout: Duration,
    flush_retry_delay: Duration,
}

fn terminated(agent_id: AgentId, generation: u64, termination: Termination) -> Event {
    Event::SessionTerminated { agent_id, generation, termination }
}

impl<T, N, C> Executor<T, N, C>
where
    T: SessionTransport,
    N: Notifier,
    C: Clock,
{
    pub(crate) fn new(parts: ExecutorParts<T, N, C>) -> Self {
        Self {
            store: parts.store,
            transport: parts.transport,
            vault: parts.vault,
            fleet: parts.fleet,
            pipeline: parts.pipeline,
            registry: parts.registry,
            scheduler: parts.scheduler,
            reconnects: parts.reconnects,
            clock: parts.clock,
            event_tx: parts.event_tx,
            connect_limit: Semaphore::new(parts.max_concurrent_connects),
            connect_timeout: parts.connect_timeout,
            op_timeout: parts.op_timeout,
            flush_retry_delay: parts.flush_retry_delay,
        }
    }

    /// Get a reference to the clock
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Execute a single effect with tracing
    ///
    /// Returns an optional event for the same agent that should be fed
    /// straight back into its state machine.
    pub async fn execute(&self, effect: Effect) -> Result<Option<Event>, ExecuteError> {
        // Format the fields as `key=val`
        let info = {
            let fields = effect.fields();
            let cap = fields.iter().map(|(a, b)| a.len() + b.len() + 2).sum();
            let mut fmt = String::with_capacity(cap);
            for (key, val) in fields {
                fmt.push_str(key);
                fmt.push('=');
                fmt.push_str(&val);
                fmt.push(' ');
            }
            fmt.pop();
            fmt
        };

        let op = effect.name();
        let verbose = effect.verbose();
        if verbose {
            tracing::info!("executing effect={} {}", op, info);
        }

        let start = std::time::Instant::now();
        let result = self.execute_inner(effect).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        if verbose {
            match &result {
                Ok(event) => tracing::info!(event = event.is_some(), elapsed_ms, "completed"),
                Err(e) => tracing::error!(error = %e, elapsed_ms, "failed"),
            }
        } else {
            match &result {
                Ok(event) => tracing::info!(
                    event = event.is_some(),
                    elapsed_ms,
                    "executed effect={} {}",
                    op,
                    info
                ),
                Err(e) => tracing::error!(error = %e, elapsed_ms, "error effect={} {}", op, info),
            }
        }

        result
    }

    async fn execute_inner(&self, effect: Effect) -> Result<Option<Event>, ExecuteError> {
        match effect {
            // === Durable record ===
            Effect::PersistSession { agent_id, patch } => {
                let now_ms = self.clock.epoch_ms();
                let updated = self
                    .bounded("session update", self.store.update_session(&agent_id, patch, now_ms))
                    .await?;
                if updated.is_none() {
                    tracing::warn!(agent_id = %agent_id, "session record missing, patch dropped");
                }
                Ok(None)
            }

            // === Credential vault ===
            Effect::StoreCredential { agent_id, credential } => {
                self.vault.store(&agent_id, &credential).await?;
                Ok(None)
            }

            Effect::WipeCredential { agent_id } => {
                self.vault.wipe(&agent_id).await?;
                Ok(None)
            }

            // === Transport ===
            Effect::Connect { agent_id, generation, restore } => {
                self.connect(agent_id, generation, restore).await
            }

            Effect::CloseSession { agent_id, logout } => {
                let Some(session) = self.registry.take_session(&agent_id) else {
                    return Ok(None);
                };
                if logout {
                    match tokio::time::timeout(self.op_timeout, session.logout()).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            tracing::warn!(agent_id = %agent_id, error = %e, "logout failed")
                        }
                        Err(_) => tracing::warn!(agent_id = %agent_id, "logout timed out"),
                    }
                }
                session.close().await;
                Ok(None)
            }

            // === Timer effects ===
            Effect::SetTimer { id, duration } => {
                self.scheduler.lock().set_timer(id, duration, self.clock.now());
                Ok(None)
            }

            Effect::CancelTimer { id } => {
                self.scheduler.lock().cancel_timer(&id);
                Ok(None)
            }

            // === Reconnection ===
            Effect::ScheduleReconnect { agent_id, generation, immediate } => {
                let mode = if immediate { RetryMode::Immediate } else { RetryMode::Backoff };
                let decision = self.reconnects.lock().schedule(&agent_id, mode);
                match decision {
                    ReconnectDecision::Retry { delay, attempt } => {
                        tracing::info!(
                            agent_id = %agent_id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "reconnect scheduled"
                        );
                        self.scheduler.lock().set_timer(
                            TimerId::reconnect(&agent_id),
                            delay,
                            self.clock.now(),
                        );
                        Ok(None)
                    }
                    ReconnectDecision::Exhausted { attempts } => {
                        tracing::warn!(
                            agent_id = %agent_id,
                            attempts,
                            "reconnect attempts exhausted"
                        );
                        Ok(Some(Event::ReconnectExhausted { agent_id, generation }))
                    }
                }
            }

            Effect::CancelReconnect { agent_id } => {
                self.reconnects.lock().cancel(&agent_id);
                self.scheduler.lock().cancel_timer(&TimerId::reconnect(&agent_id));
                Ok(None)
            }

            // === Inbound pipeline ===
            Effect::StartInbound { agent_id } => {
                self.pipeline.open_agent(&agent_id);
                Ok(None)
            }

            Effect::PauseInbound { agent_id } => {
                self.scheduler.lock().cancel_timer(&TimerId::batch_flush(&agent_id));
                let outcome = self.pipeline.flush_agent(&agent_id).await;
                if let FlushOutcome::Deferred { count } = outcome {
                    let armed = self.scheduler.lock().arm_timer(
                        TimerId::flush_retry(&agent_id),
                        self.flush_retry_delay,
                        self.clock.now(),
                    );
                    tracing::warn!(agent_id = %agent_id, count, armed, "batch deferred for retry");
                }
                Ok(None)
            }

            Effect::StopInbound { agent_id, flush } => {
                {
                    let mut scheduler = self.scheduler.lock();
                    scheduler.cancel_timer(&TimerId::batch_flush(&agent_id));
                    scheduler.cancel_timer(&TimerId::flush_retry(&agent_id));
                }
                if flush {
                    self.pipeline.flush_agent(&agent_id).await;
                    if self.pipeline.retry_count(&agent_id) > 0 {
                        self.pipeline.retry_flush(&agent_id).await;
                    }
                }
                let dropped = self.pipeline.drop_agent(&agent_id);
                if dropped > 0 {
                    tracing::warn!(agent_id = %agent_id, dropped, "inbound queue dropped");
                }
                Ok(None)
            }

            // === Fleet ===
            Effect::ReleaseOwnership { agent_id } => {
                self.fleet.unassign(&agent_id).await?;
                Ok(None)
            }
        }
    }

    /// Open a transport session. Failures come back as a termination event
    /// so the state machine classifies them like any other close.
    async fn connect(
        &self,
        agent_id: AgentId,
        generation: u64,
        restore: bool,
    ) -> Result<Option<Event>, ExecuteError> {
        let credential = if restore {
            match self.vault.load(&agent_id).await {
                Ok(Some(credential)) => Some(credential.to_value()),
                Ok(None) => {
                    let t = Termination::of(DisconnectCode::LoggedOut)
                        .with_reason("stored credential unavailable");
                    return Ok(Some(terminated(agent_id, generation, t)));
                }
                Err(e @ (VaultError::Invalid(_)
                | VaultError::Corrupt(_)
                | VaultError::UnsupportedSeal { .. })) => {
                    let t = Termination::new(
                        None,
                        Some(format!("credential integrity check failed: {e}")),
                    );
                    return Ok(Some(terminated(agent_id, generation, t)));
                }
                Err(e) => {
                    tracing::warn!(agent_id = %agent_id, error = %e, "credential load failed");
                    let t = Termination::of(DisconnectCode::ServiceUnavailable)
                        .with_reason("credential store unavailable");
                    return Ok(Some(terminated(agent_id, generation, t)));
                }
            }
        } else {
            None
        };

        let Ok(_permit) = self.connect_limit.acquire().await else {
            let t = Termination::of(DisconnectCode::ServiceUnavailable)
                .with_reason("connect limiter closed");
            return Ok(Some(terminated(agent_id, generation, t)));
        };

        let request = ConnectRequest { agent_id: agent_id.clone(), generation, credential };
        let connect = self.transport.connect(request, self.event_tx.clone());
        match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(session)) => {
                if let Some(previous) = self.registry.insert_session(&agent_id, session) {
                    previous.close().await;
                }
                Ok(None)
            }
            Ok(Err(e)) => {
                let t = Termination::of(DisconnectCode::TimedOut).with_reason(e.to_string());
                Ok(Some(terminated(agent_id, generation, t)))
            }
            Err(_) => {
                let t = Termination::of(DisconnectCode::TimedOut).with_reason("connect timed out");
                Ok(Some(terminated(agent_id, generation, t)))
            }
        }
    }

    async fn bounded<F, R, E>(&self, what: &'static str, fut: F) -> Result<R, ExecuteError>
    where
        F: Future<Output = Result<R, E>>,
        ExecuteError: From<E>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ExecuteError::Timeout(what)),
        }
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
