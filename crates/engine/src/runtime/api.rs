// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operator-facing orchestrator operations

use super::Orchestrator;
use crate::error::RuntimeError;
use crate::fleet::{Assignment, FleetError};
use crate::health::FleetHealth;
use crate::machine::Input;
use crate::vault::VaultError;
use futures_util::stream::{self, StreamExt};
use sb_adapters::{Notifier, SendReceipt, Session, SessionTransport};
use sb_core::jid::phone_jid;
use sb_core::{
    AgentId, AgentSession, AgentStatus, Clock, ConnectionState, Failure, InstanceId, OwnerStamp,
    RelinkChallenge,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// What started an initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitTrigger {
    /// Operator request; pairs from scratch when nothing can be restored
    Manual,
    /// Startup or orphan recovery; only restorable agents are started
    Recovery,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InitReport {
    pub agent_id: AgentId,
    pub status: AgentStatus,
    /// Whether a connection attempt was started
    pub started: bool,
    /// The agent was already being driven by this instance
    pub already_running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relink_challenge: Option<RelinkChallenge>,
    /// Dead owner this instance took the agent over from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded: Option<OwnerStamp>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub agent_id: AgentId,
    pub connected: bool,
    pub status: AgentStatus,
    pub phone_identity: Option<String>,
    pub relink_challenge: Option<RelinkChallenge>,
    pub requires_relink: bool,
    pub failure: Option<Failure>,
    pub reconnect_attempts: u32,
    pub owner: Option<OwnerStamp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub agent_id: AgentId,
    pub was_tracked: bool,
    pub timers_cancelled: usize,
    /// Queued inbound records written out during teardown
    pub events_flushed: usize,
    pub status: AgentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExistsReport {
    pub phone_jid: String,
    pub on_network: bool,
    pub resolved: Option<String>,
    /// Answered from the validation cache
    pub cached: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Dead owners cleared
    pub released: usize,
    pub attempted: usize,
    pub initialized: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub agents_released: usize,
    pub events_flushed: usize,
    pub timers_cancelled: usize,
}

impl<T, N, C> Orchestrator<T, N, C>
where
    T: SessionTransport,
    N: Notifier,
    C: Clock,
{
    /// Start (or restore) a connection for the agent, creating its record
    /// when missing.
    pub async fn initialize(&self, agent: &AgentId) -> Result<InitReport, RuntimeError> {
        self.initialize_with(agent, InitTrigger::Manual).await
    }

    pub async fn initialize_with(
        &self,
        agent: &AgentId,
        trigger: InitTrigger,
    ) -> Result<InitReport, RuntimeError> {
        let Some(_guard) = self.locks.try_acquire(agent, self.clock.epoch_ms()) else {
            return Err(RuntimeError::InitInProgress(agent.clone()));
        };

        let now_ms = self.clock.epoch_ms();
        let session =
            self.bounded("session create", self.store.ensure_session(agent, now_ms)).await?;

        let slot = self.registry.slot(agent);
        let mut slot = slot.lock().await;
        if let Some(machine) = slot.machine().filter(|m| m.is_tracked()) {
            return Ok(InitReport {
                agent_id: agent.clone(),
                status: machine.status,
                started: false,
                already_running: true,
                relink_challenge: machine.relink.clone(),
                superseded: None,
            });
        }

        let superseded = match self.fleet.assign(agent, self.registry.tracked_count()).await? {
            Assignment::AlreadyOwned => None,
            Assignment::Claimed { superseded } => superseded,
        };

        let (restorable, discard_credential) = match self.vault.load(agent).await {
            Ok(Some(credential)) => {
                let freshness = self.vault.validate_freshness(&session, &credential);
                if let Some(reason) = &freshness.reason {
                    tracing::info!(agent_id = %agent, reason = %reason, "discarding credential");
                }
                (freshness.valid, !freshness.valid)
            }
            Ok(None) => (false, false),
            Err(e @ (VaultError::Invalid(_)
            | VaultError::Corrupt(_)
            | VaultError::UnsupportedSeal { .. })) => {
                tracing::warn!(agent_id = %agent, error = %e, "discarding unreadable credential");
                (false, true)
            }
            Err(e) => {
                self.release_claim(agent).await;
                return Err(e.into());
            }
        };

        if trigger == InitTrigger::Recovery && !restorable {
            tracing::info!(agent_id = %agent, "nothing to restore, leaving agent idle");
            self.release_claim(agent).await;
            return Ok(InitReport {
                agent_id: agent.clone(),
                status: session.status,
                started: false,
                already_running: false,
                relink_challenge: None,
                superseded,
            });
        }

        tracing::info!(agent_id = %agent, restorable, ?trigger, "initializing agent");
        slot.machine_or_seed(&session);
        let machine = self
            .drive(&mut slot, agent, Input::Initialize { restorable, discard_credential })
            .await?;

        Ok(InitReport {
            agent_id: agent.clone(),
            status: machine.status,
            started: true,
            already_running: false,
            relink_challenge: machine.relink,
            superseded,
        })
    }

    /// Close the agent's session, keeping its credentials for a later restore.
    pub async fn disconnect(&self, agent: &AgentId) -> Result<CleanupReport, RuntimeError> {
        let slot = self.registry.slot(agent);
        let mut slot = slot.lock().await;
        let was_tracked = slot.machine().is_some_and(|m| m.is_tracked());

        let session = self.load_session(agent).await?;
        if !was_tracked {
            self.ensure_not_owned_elsewhere(&session).await?;
        }

        let events_flushed = self.pipeline.pending_count(agent) + self.pipeline.retry_count(agent);
        let timers_cancelled = self.scheduler.lock().agent_timer_count(agent);

        slot.machine_or_seed(&session);
        let machine = self.drive(&mut slot, agent, Input::Disconnect { logout: false }).await?;
        self.scheduler.lock().cancel_agent_timers(agent);

        Ok(CleanupReport {
            agent_id: agent.clone(),
            was_tracked,
            timers_cancelled,
            events_flushed,
            status: machine.status,
        })
    }

    /// Log the device out, wipe its credentials and delete the record.
    ///
    /// Returns whether a record existed.
    pub async fn delete(&self, agent: &AgentId) -> Result<bool, RuntimeError> {
        let slot_handle = self.registry.slot(agent);
        let mut slot = slot_handle.lock().await;

        let Some(session) = self.bounded("session load", self.store.get_session(agent)).await?
        else {
            drop(slot);
            self.registry.remove_slot(agent);
            return Ok(false);
        };

        if slot.machine().is_some_and(|m| m.is_tracked()) {
            slot.machine_or_seed(&session);
            self.drive(&mut slot, agent, Input::Disconnect { logout: true }).await?;
        } else {
            self.ensure_not_owned_elsewhere(&session).await?;
            self.vault.wipe(agent).await?;
        }

        self.scheduler.lock().cancel_agent_timers(agent);
        self.reconnects.lock().cancel(agent);
        self.pipeline.drop_agent(agent);
        let deleted = self.bounded("session delete", self.store.delete_session(agent)).await?;
        self.cache.invalidate_credential(agent).await;

        drop(slot);
        self.registry.remove_slot(agent);
        tracing::info!(agent_id = %agent, "agent deleted");
        Ok(deleted)
    }

    pub async fn get_status(&self, agent: &AgentId) -> Result<StatusReport, RuntimeError> {
        let session = self.load_session(agent).await?;
        let connected = self.is_live_connection(&session).await?;
        let now_ms = self.clock.epoch_ms();
        Ok(StatusReport {
            agent_id: agent.clone(),
            connected,
            status: session.status,
            phone_identity: session.phone_identity.clone(),
            relink_challenge: session.visible_relink(now_ms).cloned(),
            requires_relink: session.status.requires_relink(),
            failure: session.failure.clone(),
            reconnect_attempts: self.reconnects.lock().attempts(agent),
            owner: session.owner.clone(),
        })
    }

    /// Send a text message from a connected agent.
    pub async fn send_message(
        &self,
        agent: &AgentId,
        to: &str,
        text: &str,
    ) -> Result<SendReceipt, RuntimeError> {
        let to_jid = phone_jid(to).ok_or_else(|| RuntimeError::InvalidRecipient(to.to_string()))?;
        let (session, own_phone) = self.open_session(agent).await?;

        let receipt =
            match tokio::time::timeout(self.config.op_timeout, session.send_text(&to_jid, text))
                .await
            {
                Ok(result) => result?,
                Err(_) => return Err(RuntimeError::Timeout("send")),
            };

        if let Err(e) = self
            .pipeline
            .record_outbound(agent, &to_jid, text, &receipt, own_phone.as_deref())
            .await
        {
            tracing::warn!(agent_id = %agent, error = %e, "failed to record outbound message");
        }
        Ok(receipt)
    }

    /// Check whether a phone number is registered, consulting the
    /// validation cache first.
    pub async fn check_exists(
        &self,
        agent: &AgentId,
        phone: &str,
    ) -> Result<ExistsReport, RuntimeError> {
        let jid = phone_jid(phone).ok_or_else(|| RuntimeError::InvalidRecipient(phone.into()))?;
        if let Some(hit) = self.cache.get_validation(&jid).await {
            return Ok(ExistsReport {
                phone_jid: jid,
                on_network: hit.on_network,
                resolved: hit.resolved,
                cached: true,
            });
        }

        let (session, _) = self.open_session(agent).await?;
        let result = match tokio::time::timeout(self.config.op_timeout, session.exists(&jid)).await
        {
            Ok(result) => result?,
            Err(_) => return Err(RuntimeError::Timeout("exists")),
        };
        self.cache.put_validation(&jid, &result).await;
        Ok(ExistsReport {
            phone_jid: jid,
            on_network: result.on_network,
            resolved: result.resolved,
            cached: false,
        })
    }

    pub async fn fleet_health(&self) -> Result<FleetHealth, RuntimeError> {
        let live = self.fleet.list_live().await?;
        Ok(FleetHealth {
            instance_id: self.fleet.instance_id().clone(),
            live_instances: live.len(),
            peers: live.iter().map(|r| (r.instance_id.clone(), r.load())).collect(),
            local_agents: self.registry.tracked_count(),
            capacity: self.fleet.capacity(),
            agents_by_status: self.registry.tracked_by_status(),
            cache: self.cache.stats(),
            errors: self.counters.snapshot(),
        })
    }

    /// Release local agents a peer has taken over, then refresh this
    /// instance's liveness record and assigned set.
    pub async fn heartbeat(&self) -> Result<(), RuntimeError> {
        match self.bounded("session list", self.store.list_sessions()).await {
            Ok(sessions) => {
                let owners: HashMap<AgentId, Option<InstanceId>> = sessions
                    .into_iter()
                    .map(|s| (s.agent_id.clone(), s.owner_instance().cloned()))
                    .collect();
                for agent in self.registry.tracked_ids() {
                    let owner = owners.get(&agent).cloned().flatten();
                    if owner.as_ref() != Some(self.instance_id()) {
                        self.release_lost(&agent).await;
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "ownership sweep skipped"),
        }

        let assigned = self.registry.tracked_ids().into_iter().collect();
        self.fleet.heartbeat(assigned).await?;
        Ok(())
    }

    /// Stop driving an agent this instance no longer owns, leaving the
    /// durable record to the new owner. Ownership is read again under the
    /// slot lock since the sweep's listing may predate a fresh claim.
    async fn release_lost(&self, agent: &AgentId) {
        let slot = self.registry.slot(agent);
        let mut slot = slot.lock().await;
        if !slot.machine().is_some_and(|m| m.is_tracked()) {
            return;
        }
        match self.still_owned(agent).await {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(agent_id = %agent, error = %e, "ownership check failed");
                return;
            }
        }
        let input = self.ownership_lost();
        if let Err(e) = self.drive(&mut slot, agent, input).await {
            tracing::warn!(agent_id = %agent, error = %e, "release failed");
        }
    }

    /// Register this instance, release agents held by dead owners, then
    /// restore every agent that was connected when its owner stopped.
    pub async fn recover(&self) -> Result<RecoveryReport, RuntimeError> {
        self.fleet.register().await?;
        let released = self.release_dead_owners().await?;

        let sessions = self.bounded("session list", self.store.list_sessions()).await?;
        let candidates: Vec<AgentId> =
            sessions.into_iter().filter(is_recovery_candidate).map(|s| s.agent_id).collect();
        tracing::info!(candidates = candidates.len(), released, "starting recovery");

        let mut report = self.adopt(candidates).await;
        report.released = released;
        Ok(report)
    }

    /// Release agents whose owner died and adopt the restorable ones.
    pub async fn scan_orphans(&self) -> Result<RecoveryReport, RuntimeError> {
        let released = self.release_dead_owners().await?;
        if released == 0 {
            return Ok(RecoveryReport::default());
        }
        let sessions = self.bounded("session list", self.store.list_sessions()).await?;
        let candidates: Vec<AgentId> =
            sessions.into_iter().filter(is_recovery_candidate).map(|s| s.agent_id).collect();

        let mut report = self.adopt(candidates).await;
        report.released = released;
        Ok(report)
    }

    /// Release every local agent for adoption by a peer, then deregister.
    ///
    /// Durable statuses are left as they are so recovery can restore them.
    pub async fn shutdown(&self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        for agent in self.registry.tracked_ids() {
            report.events_flushed +=
                self.pipeline.pending_count(&agent) + self.pipeline.retry_count(&agent);
            report.timers_cancelled += self.scheduler.lock().agent_timer_count(&agent);

            let slot = self.registry.slot(&agent);
            let mut slot = slot.lock().await;
            if !slot.machine().is_some_and(|m| m.is_tracked()) {
                continue;
            }
            match self.drive(&mut slot, &agent, Input::Release { release_owner: true }).await {
                Ok(_) => report.agents_released += 1,
                Err(e) => tracing::warn!(agent_id = %agent, error = %e, "release failed"),
            }
        }

        self.pipeline.drain_forwards().await;
        if let Err(e) = self.fleet.deregister().await {
            tracing::warn!(error = %e, "deregister failed");
        }
        tracing::info!(
            released = report.agents_released,
            flushed = report.events_flushed,
            "orchestrator shut down"
        );
        report
    }

    async fn release_dead_owners(&self) -> Result<usize, RuntimeError> {
        let orphans = self.fleet.detect_orphans().await?;
        if orphans.is_empty() {
            return Ok(0);
        }
        Ok(self.fleet.release_orphans(&orphans).await?)
    }

    /// Initialize agents with bounded concurrency, staggering the starts.
    async fn adopt(&self, agents: Vec<AgentId>) -> RecoveryReport {
        let concurrency = self.config.startup_concurrency;
        let stagger = self.config.startup_stagger;
        let mut report = RecoveryReport { attempted: agents.len(), ..Default::default() };

        let results: Vec<_> = stream::iter(agents.into_iter().enumerate())
            .map(|(i, agent)| async move {
                let offset = (i % concurrency) as u32;
                if offset > 0 {
                    tokio::time::sleep(stagger * offset).await;
                }
                let result = self.initialize_with(&agent, InitTrigger::Recovery).await;
                (agent, result)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for (agent, result) in results {
            match result {
                Ok(r) if r.started => report.initialized += 1,
                Ok(_)
                | Err(RuntimeError::InitInProgress(_))
                | Err(RuntimeError::Fleet(
                    FleetError::OwnedElsewhere { .. } | FleetError::ClaimRaced(_),
                )) => {
                    report.skipped += 1
                }
                Err(e) => {
                    tracing::warn!(agent_id = %agent, error = %e, "recovery failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// The agent's live session and phone identity, if it is connected.
    async fn open_session(
        &self,
        agent: &AgentId,
    ) -> Result<(Arc<dyn Session>, Option<String>), RuntimeError> {
        let phone = {
            let slot = self.registry.slot(agent);
            let slot = slot.lock().await;
            match slot.machine() {
                Some(m) if m.state == ConnectionState::Connected => Some(m.phone_identity.clone()),
                _ => None,
            }
        };
        match (phone, self.registry.session(agent)) {
            (Some(phone), Some(session)) if session.is_open() => Ok((session, phone)),
            _ => {
                let status = self.load_session(agent).await?.status;
                Err(RuntimeError::NotConnected { agent_id: agent.clone(), status })
            }
        }
    }

    /// A `Connected` record only counts while someone is driving it: this
    /// instance's machine, or a live peer that owns it.
    async fn is_live_connection(&self, session: &AgentSession) -> Result<bool, RuntimeError> {
        if session.status != AgentStatus::Connected {
            return Ok(false);
        }
        if let Some(status) = self.registry.tracked_status(&session.agent_id) {
            return Ok(status == AgentStatus::Connected);
        }
        match &session.owner {
            Some(owner) if &owner.instance_id != self.instance_id() => {
                let live = self.fleet.list_live().await?;
                Ok(self.fleet.owner_is_live(owner, &live))
            }
            _ => Ok(false),
        }
    }

    /// Refuse operator teardown of an agent a live peer is driving.
    async fn ensure_not_owned_elsewhere(&self, session: &AgentSession) -> Result<(), RuntimeError> {
        let Some(owner) = &session.owner else {
            return Ok(());
        };
        let live = self.fleet.list_live().await?;
        if self.fleet.owner_is_live(owner, &live) && &owner.instance_id != self.instance_id() {
            return Err(FleetError::OwnedElsewhere {
                agent_id: session.agent_id.clone(),
                owner: owner.clone(),
            }
            .into());
        }
        Ok(())
    }

    async fn release_claim(&self, agent: &AgentId) {
        if let Err(e) = self.fleet.unassign(agent).await {
            tracing::warn!(agent_id = %agent, error = %e, "failed to release claim");
        }
    }
}

/// Unowned agents that were live and still hold a credential.
fn is_recovery_candidate(session: &AgentSession) -> bool {
    session.owner.is_none() && session.status.is_recoverable() && session.credential.is_some()
}
