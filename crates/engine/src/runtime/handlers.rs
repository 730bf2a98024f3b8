// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event and timer handling

use super::Orchestrator;
use crate::error::RuntimeError;
use crate::health::Counters;
use crate::machine::Input;
use crate::pipeline::{Admission, FlushOutcome};
use sb_adapters::{Notifier, SessionTransport};
use sb_core::jid::phone_jid;
use sb_core::{AgentId, Clock, ConnectionState, Credential, Event, TimerId, TimerKind};
use serde_json::Value;

impl<T, N, C> Orchestrator<T, N, C>
where
    T: SessionTransport,
    N: Notifier,
    C: Clock,
{
    /// Handle one event from a transport session or the timer scheduler.
    pub async fn handle_event(&self, event: Event) -> Result<(), RuntimeError> {
        tracing::debug!(event = %event.log_summary(), "handling event");
        match event {
            Event::Shutdown => Ok(()),
            Event::TimerStart { id } => self.on_timer(&id).await,
            Event::MessageReceived { agent_id, generation, payload } => {
                self.on_message(&agent_id, generation, &payload).await
            }
            event => {
                let (Some(agent), Some(generation)) = (event.agent_id(), event.generation())
                else {
                    return Ok(());
                };
                if !self.registry.is_tracked(agent) {
                    return self.drop_stale(&event);
                }
                let slot = self.registry.slot(agent);
                let mut slot = slot.lock().await;
                if slot.machine().is_none() || slot.generation() != generation {
                    return self.drop_stale(&event);
                }
                let Some(input) = self.event_input(&event) else {
                    return Ok(());
                };
                self.drive(&mut slot, agent, input).await.map(|_| ())
            }
        }
    }

    /// Fire every expired timer. Returns how many fired.
    pub async fn tick_timers(&self) -> usize {
        let fired = self.take_fired_timers();
        let count = fired.len();
        for event in fired {
            if let Err(e) = self.handle_event(event).await {
                tracing::warn!(error = %e, "timer handling failed");
            }
        }
        count
    }

    /// Remove every expired timer and return its start event, leaving the
    /// caller to route each one through [`Orchestrator::handle_event`].
    pub fn take_fired_timers(&self) -> Vec<Event> {
        self.scheduler.lock().fired_timers(self.clock.now())
    }

    /// Translate a session event into a machine input.
    pub(crate) fn event_input(&self, event: &Event) -> Option<Input> {
        match event {
            Event::SessionQr { payload, .. } => Some(Input::Qr {
                payload: payload.clone(),
                token: uuid::Uuid::new_v4().to_string(),
            }),
            Event::SessionOpened { phone_identity, .. } => Some(Input::Opened {
                phone_identity: phone_identity.as_deref().and_then(phone_jid),
            }),
            Event::CredentialsUpdated { credential, .. } => Some(credentials_input(credential)),
            Event::SessionTerminated { termination, .. } => {
                Some(Input::Terminated(termination.clone()))
            }
            Event::ReconnectExhausted { .. } => {
                Counters::bump(&self.counters.exhausted);
                Some(Input::ReconnectExhausted)
            }
            Event::Shutdown | Event::TimerStart { .. } | Event::MessageReceived { .. } => None,
        }
    }

    fn drop_stale(&self, event: &Event) -> Result<(), RuntimeError> {
        tracing::debug!(event = %event.log_summary(), "dropping stale event");
        Counters::bump(&self.counters.stale_events);
        Ok(())
    }

    async fn on_timer(&self, id: &TimerId) -> Result<(), RuntimeError> {
        let Some(kind) = id.kind() else {
            tracing::debug!(timer_id = %id, "ignoring unknown timer");
            return Ok(());
        };
        let agent = kind.agent_id().clone();

        match kind {
            TimerKind::BatchFlush(_) => return self.flush_inbound(&agent).await,
            TimerKind::FlushRetry(_) => {
                self.pipeline.retry_flush(&agent).await;
                return Ok(());
            }
            _ => {}
        }

        if !self.registry.is_tracked(&agent) {
            return Ok(());
        }
        let slot = self.registry.slot(&agent);
        let mut slot = slot.lock().await;
        let Some(machine) = slot.machine() else {
            return Ok(());
        };

        let input = match kind {
            TimerKind::Reconnect(_) => {
                if machine.state != ConnectionState::Reconnecting {
                    return Ok(());
                }
                match self.still_owned(&agent).await {
                    Ok(true) => Input::ReconnectDue,
                    Ok(false) => self.ownership_lost(),
                    Err(e) => {
                        tracing::warn!(agent_id = %agent, error = %e, "ownership check failed");
                        self.scheduler.lock().set_timer(
                            TimerId::reconnect(&agent),
                            self.config.heartbeat_interval,
                            self.clock.now(),
                        );
                        return Ok(());
                    }
                }
            }
            TimerKind::Heartbeat(_) => match self.still_owned(&agent).await {
                Ok(false) => self.ownership_lost(),
                owned => {
                    if let Err(e) = owned {
                        tracing::warn!(agent_id = %agent, error = %e, "ownership check failed");
                    }
                    let open = self.registry.session(&agent).is_some_and(|s| s.is_open());
                    if open {
                        Input::HeartbeatOk
                    } else {
                        Input::HeartbeatLost
                    }
                }
            },
            TimerKind::RelinkExpiry(_) => Input::RelinkExpired,
            TimerKind::BatchFlush(_) | TimerKind::FlushRetry(_) => return Ok(()),
        };

        self.drive(&mut slot, &agent, input).await.map(|_| ())
    }

    async fn on_message(
        &self,
        agent: &AgentId,
        generation: u64,
        payload: &Value,
    ) -> Result<(), RuntimeError> {
        if !self.registry.is_tracked(agent) {
            return self.drop_stale_message(agent, generation);
        }
        let own_phone = {
            let slot = self.registry.slot(agent);
            let slot = slot.lock().await;
            match slot.machine() {
                Some(m) if m.generation == generation && m.state == ConnectionState::Connected => {
                    m.phone_identity.clone()
                }
                _ => return self.drop_stale_message(agent, generation),
            }
        };

        match self.pipeline.on_event(agent, payload, own_phone.as_deref()).await {
            Admission::Queued { flush_now: true, .. } => {
                self.scheduler.lock().cancel_timer(&TimerId::batch_flush(agent));
                self.flush_inbound(agent).await
            }
            Admission::Queued { first: true, .. } => {
                self.scheduler.lock().set_timer(
                    TimerId::batch_flush(agent),
                    self.config.flush_interval,
                    self.clock.now(),
                );
                Ok(())
            }
            Admission::Queued { .. }
            | Admission::Filtered(_)
            | Admission::Duplicate
            | Admission::Echo => Ok(()),
        }
    }

    fn drop_stale_message(&self, agent: &AgentId, generation: u64) -> Result<(), RuntimeError> {
        tracing::debug!(agent_id = %agent, generation, "dropping message from stale session");
        Counters::bump(&self.counters.stale_events);
        Ok(())
    }

    /// Flush the agent's pending batch. A deferred batch joins the backlog
    /// and arms the retry timer unless one is already pending.
    pub(crate) async fn flush_inbound(&self, agent: &AgentId) -> Result<(), RuntimeError> {
        if let FlushOutcome::Deferred { count } = self.pipeline.flush_agent(agent).await {
            let armed = self.scheduler.lock().arm_timer(
                TimerId::flush_retry(agent),
                self.config.flush_retry_delay,
                self.clock.now(),
            );
            tracing::warn!(agent_id = %agent, count, armed, "batch deferred for retry");
        }
        Ok(())
    }

    /// Whether the durable record still names this instance as the owner.
    pub(crate) async fn still_owned(&self, agent: &AgentId) -> Result<bool, RuntimeError> {
        let session = self.bounded("session load", self.store.get_session(agent)).await?;
        let owner = session.as_ref().and_then(|s| s.owner_instance());
        if owner == Some(self.instance_id()) {
            return Ok(true);
        }
        tracing::warn!(agent_id = %agent, owner = ?owner, "ownership lost, releasing agent");
        Ok(false)
    }

    pub(crate) fn ownership_lost(&self) -> Input {
        Counters::bump(&self.counters.ownership_lost);
        Input::Release { release_owner: false }
    }
}

fn credentials_input(credential: &Value) -> Input {
    let (paired, phone_identity) = match Credential::from_value(credential) {
        Ok(parsed) => (parsed.is_paired(), parsed.phone_identity().and_then(phone_jid)),
        Err(_) => (false, None),
    };
    Input::CredentialsUpdated { credential: credential.clone(), paired, phone_identity }
}
