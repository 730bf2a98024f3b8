// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-agent connection state machine.
//!
//! [`transition`] is pure: it maps the current machine and one input to the
//! next machine and the effects the executor must run. All I/O lives in the
//! executor, so every path here is testable without a transport.

use crate::classify::{classify, Action, Classification, ClassifyContext};
use sb_core::{
    AgentId, AgentSession, AgentStatus, Change, ConnectionState, DisconnectCode, Effect,
    RelinkChallenge, SessionPatch, Termination, TimerId,
};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentMachine {
    pub agent_id: AgentId,
    pub state: ConnectionState,
    /// Externally visible status; distinguishes held and failed agents that
    /// share the disconnected state
    pub status: AgentStatus,
    /// Bumped on every connect and teardown; events tagged with another
    /// generation are stale
    pub generation: u64,
    /// Whether the credentials in use completed pairing
    pub credential_paired: bool,
    pub paired_at_ms: Option<u64>,
    pub phone_identity: Option<String>,
    pub relink: Option<RelinkChallenge>,
}

impl AgentMachine {
    pub fn new(agent_id: AgentId, generation: u64) -> Self {
        Self {
            agent_id,
            state: ConnectionState::Uninitialized,
            status: AgentStatus::Pending,
            generation,
            credential_paired: false,
            paired_at_ms: None,
            phone_identity: None,
            relink: None,
        }
    }

    /// Seed a machine from the durable record.
    pub fn from_session(session: &AgentSession, generation: u64) -> Self {
        Self {
            status: session.status,
            paired_at_ms: session.paired_at_ms,
            phone_identity: session.phone_identity.clone(),
            ..Self::new(session.agent_id.clone(), generation)
        }
    }

    /// Whether the agent holds (or is acquiring) a transport session.
    pub fn is_tracked(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Initializing
                | ConnectionState::QrPending
                | ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::Reconnecting
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// Begin connecting; `restorable` means validated paired credentials exist
    Initialize { restorable: bool, discard_credential: bool },
    Qr { payload: String, token: String },
    CredentialsUpdated { credential: Value, paired: bool, phone_identity: Option<String> },
    Opened { phone_identity: Option<String> },
    Terminated(Termination),
    HeartbeatOk,
    /// The transport stopped reporting open without a termination event
    HeartbeatLost,
    ReconnectDue,
    ReconnectExhausted,
    RelinkExpired,
    /// Operator disconnect; `logout` also unlinks the device
    Disconnect { logout: bool },
    /// Stop local work without touching the durable status
    Release { release_owner: bool },
}

impl Input {
    pub fn name(&self) -> &'static str {
        match self {
            Input::Initialize { .. } => "initialize",
            Input::Qr { .. } => "qr",
            Input::CredentialsUpdated { .. } => "credentials_updated",
            Input::Opened { .. } => "opened",
            Input::Terminated(_) => "terminated",
            Input::HeartbeatOk => "heartbeat_ok",
            Input::HeartbeatLost => "heartbeat_lost",
            Input::ReconnectDue => "reconnect_due",
            Input::ReconnectExhausted => "reconnect_exhausted",
            Input::RelinkExpired => "relink_expired",
            Input::Disconnect { .. } => "disconnect",
            Input::Release { .. } => "release",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MachineContext {
    pub now_ms: u64,
    pub relink_ttl: Duration,
    pub pairing_window: Duration,
    pub heartbeat_interval: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next: AgentMachine,
    pub effects: Vec<Effect>,
    /// Set when the input was a classified termination
    pub classification: Option<Classification>,
}

impl Transition {
    fn unchanged(machine: &AgentMachine) -> Self {
        Self { next: machine.clone(), effects: Vec::new(), classification: None }
    }

    pub fn is_noop(&self) -> bool {
        self.effects.is_empty()
    }
}

pub fn transition(machine: &AgentMachine, input: Input, ctx: &MachineContext) -> Transition {
    use ConnectionState as S;

    let agent = &machine.agent_id;
    let now = ctx.now_ms;
    let mut next = machine.clone();
    let mut effects = Vec::new();
    let mut classification = None;

    match input {
        Input::Initialize { restorable, discard_credential } => {
            if machine.is_tracked() {
                return Transition::unchanged(machine);
            }
            next.generation += 1;
            next.relink = None;
            next.credential_paired = restorable;
            let mut patch = SessionPatch::default().clear_failure().clear_relink();
            if discard_credential {
                effects.push(Effect::WipeCredential { agent_id: agent.clone() });
                next.paired_at_ms = None;
                patch.paired_at_ms = Change::Clear;
            }
            let (state, status) = if restorable {
                (S::Connecting, AgentStatus::Connecting)
            } else {
                (S::Initializing, AgentStatus::Initializing)
            };
            next.state = state;
            next.status = status;
            patch.status = Some(status);
            effects.push(persist(agent, patch));
            effects.push(Effect::Connect {
                agent_id: agent.clone(),
                generation: next.generation,
                restore: restorable,
            });
        }

        Input::Qr { payload, token } => {
            let awaiting = matches!(machine.state, S::Initializing | S::QrPending);
            if !awaiting || machine.credential_paired {
                return Transition::unchanged(machine);
            }
            match &machine.relink {
                Some(current) if machine.state == S::QrPending && !current.is_expired(now) => {
                    let refreshed = RelinkChallenge { payload, ..current.clone() };
                    next.relink = Some(refreshed.clone());
                    effects.push(persist(agent, SessionPatch::default().with_relink(refreshed)));
                }
                _ => {
                    let challenge = RelinkChallenge {
                        token,
                        payload,
                        issued_at_ms: now,
                        expires_at_ms: now + ctx.relink_ttl.as_millis() as u64,
                    };
                    next.state = S::QrPending;
                    next.status = AgentStatus::QrPending;
                    next.relink = Some(challenge.clone());
                    effects.push(persist(
                        agent,
                        SessionPatch::status(AgentStatus::QrPending).with_relink(challenge),
                    ));
                    effects.push(Effect::SetTimer {
                        id: TimerId::relink_expiry(agent),
                        duration: ctx.relink_ttl,
                    });
                }
            }
        }

        Input::CredentialsUpdated { credential, paired, phone_identity } => {
            if !machine.is_tracked() {
                return Transition::unchanged(machine);
            }
            effects.push(Effect::StoreCredential { agent_id: agent.clone(), credential });
            if paired && !machine.credential_paired {
                next.credential_paired = true;
                next.paired_at_ms = Some(now);
                let mut patch = SessionPatch::default();
                patch.paired_at_ms = Change::Set(now);
                if let Some(phone) = phone_identity {
                    next.phone_identity = Some(phone.clone());
                    patch = patch.with_phone_identity(phone);
                }
                effects.push(persist(agent, patch));
            }
        }

        Input::Opened { phone_identity } => {
            if !matches!(machine.state, S::Initializing | S::QrPending | S::Connecting) {
                return Transition::unchanged(machine);
            }
            next.state = S::Connected;
            next.status = AgentStatus::Connected;
            next.relink = None;
            let mut patch =
                SessionPatch::status(AgentStatus::Connected).clear_relink().clear_failure();
            if let Some(phone) = phone_identity {
                next.phone_identity = Some(phone.clone());
                patch = patch.with_phone_identity(phone);
            }
            patch.connected_at_ms = Change::Set(now);
            patch.heartbeat_at_ms = Change::Set(now);

            effects.push(Effect::CancelTimer { id: TimerId::relink_expiry(agent) });
            effects.push(Effect::CancelReconnect { agent_id: agent.clone() });
            effects.push(persist(agent, patch));
            effects.push(Effect::SetTimer {
                id: TimerId::heartbeat(agent),
                duration: ctx.heartbeat_interval,
            });
            effects.push(Effect::StartInbound { agent_id: agent.clone() });
        }

        Input::Terminated(termination) => {
            if !matches!(
                machine.state,
                S::Initializing | S::QrPending | S::Connecting | S::Connected
            ) {
                return Transition::unchanged(machine);
            }
            let class = classify(
                &termination,
                &ClassifyContext {
                    now_ms: now,
                    paired_at_ms: machine.paired_at_ms,
                    pairing_window: ctx.pairing_window,
                },
            );
            classification = Some(class);
            let failure = format!("{class}: {termination}");
            next.relink = None;

            match class.action() {
                Action::Conflict => {
                    teardown(agent, false, &mut effects);
                    effects.push(Effect::WipeCredential { agent_id: agent.clone() });
                    let mut patch = SessionPatch::status(AgentStatus::Conflict)
                        .with_failure(failure, now)
                        .clear_relink()
                        .disconnected_at(now);
                    patch.paired_at_ms = Change::Clear;
                    effects.push(persist(agent, patch));
                    effects.push(Effect::ReleaseOwnership { agent_id: agent.clone() });
                    next.state = S::Conflict;
                    next.status = AgentStatus::Conflict;
                    next.credential_paired = false;
                    next.paired_at_ms = None;
                    next.generation += 1;
                }
                Action::Hold => {
                    teardown(agent, false, &mut effects);
                    effects.push(persist(
                        agent,
                        SessionPatch::status(AgentStatus::Held)
                            .with_failure(failure, now)
                            .clear_relink()
                            .disconnected_at(now),
                    ));
                    effects.push(Effect::ReleaseOwnership { agent_id: agent.clone() });
                    next.state = S::Disconnected;
                    next.status = AgentStatus::Held;
                    next.generation += 1;
                }
                Action::Reconnect { .. } if !machine.credential_paired => {
                    // Pairing never completed, so there is nothing to restore
                    teardown(agent, false, &mut effects);
                    effects.push(persist(
                        agent,
                        SessionPatch::status(AgentStatus::Pending)
                            .with_failure(format!("pairing interrupted: {termination}"), now)
                            .clear_relink(),
                    ));
                    effects.push(Effect::ReleaseOwnership { agent_id: agent.clone() });
                    next.state = S::Uninitialized;
                    next.status = AgentStatus::Pending;
                    next.generation += 1;
                }
                Action::Reconnect { immediate } => {
                    effects.push(Effect::CancelTimer { id: TimerId::heartbeat(agent) });
                    effects.push(Effect::CancelTimer { id: TimerId::relink_expiry(agent) });
                    effects.push(Effect::PauseInbound { agent_id: agent.clone() });
                    effects.push(Effect::CloseSession { agent_id: agent.clone(), logout: false });
                    effects.push(persist(
                        agent,
                        SessionPatch::status(AgentStatus::Reconnecting)
                            .with_failure(failure, now)
                            .clear_relink()
                            .disconnected_at(now),
                    ));
                    effects.push(Effect::ScheduleReconnect {
                        agent_id: agent.clone(),
                        generation: next.generation,
                        immediate,
                    });
                    next.state = S::Reconnecting;
                    next.status = AgentStatus::Reconnecting;
                }
            }
        }

        Input::HeartbeatOk => {
            if machine.state != S::Connected {
                return Transition::unchanged(machine);
            }
            let mut patch = SessionPatch::default();
            patch.heartbeat_at_ms = Change::Set(now);
            effects.push(persist(agent, patch));
            effects.push(Effect::SetTimer {
                id: TimerId::heartbeat(agent),
                duration: ctx.heartbeat_interval,
            });
        }

        Input::HeartbeatLost => {
            if machine.state != S::Connected {
                return Transition::unchanged(machine);
            }
            let termination =
                Termination::of(DisconnectCode::ConnectionClosed).with_reason("heartbeat lost");
            return transition(machine, Input::Terminated(termination), ctx);
        }

        Input::ReconnectDue => {
            if machine.state != S::Reconnecting {
                return Transition::unchanged(machine);
            }
            next.generation += 1;
            next.state = S::Connecting;
            next.status = AgentStatus::Connecting;
            effects.push(persist(agent, SessionPatch::status(AgentStatus::Connecting)));
            effects.push(Effect::Connect {
                agent_id: agent.clone(),
                generation: next.generation,
                restore: true,
            });
        }

        Input::ReconnectExhausted => {
            if !matches!(machine.state, S::Reconnecting | S::Connecting) {
                return Transition::unchanged(machine);
            }
            teardown(agent, false, &mut effects);
            effects.push(persist(
                agent,
                SessionPatch::status(AgentStatus::Failed)
                    .with_failure("reconnect attempts exhausted", now)
                    .disconnected_at(now),
            ));
            effects.push(Effect::ReleaseOwnership { agent_id: agent.clone() });
            next.state = S::Disconnected;
            next.status = AgentStatus::Failed;
            next.generation += 1;
        }

        Input::RelinkExpired => {
            if machine.state != S::QrPending {
                return Transition::unchanged(machine);
            }
            teardown(agent, false, &mut effects);
            effects.push(persist(
                agent,
                SessionPatch::status(AgentStatus::Pending)
                    .with_failure("relink challenge expired", now)
                    .clear_relink(),
            ));
            effects.push(Effect::ReleaseOwnership { agent_id: agent.clone() });
            next.state = S::Uninitialized;
            next.status = AgentStatus::Pending;
            next.relink = None;
            next.generation += 1;
        }

        Input::Disconnect { logout } => {
            teardown(agent, logout, &mut effects);
            let mut patch = SessionPatch::status(AgentStatus::Disconnected)
                .clear_relink()
                .clear_failure()
                .disconnected_at(now);
            if logout {
                effects.push(Effect::WipeCredential { agent_id: agent.clone() });
                patch.paired_at_ms = Change::Clear;
                next.credential_paired = false;
                next.paired_at_ms = None;
            }
            effects.push(persist(agent, patch));
            effects.push(Effect::ReleaseOwnership { agent_id: agent.clone() });
            next.state = S::Disconnected;
            next.status = AgentStatus::Disconnected;
            next.relink = None;
            next.generation += 1;
        }

        Input::Release { release_owner } => {
            teardown(agent, false, &mut effects);
            if release_owner {
                effects.push(Effect::ReleaseOwnership { agent_id: agent.clone() });
            }
            next.state = S::Uninitialized;
            next.generation += 1;
        }
    }

    Transition { next, effects, classification }
}

fn persist(agent: &AgentId, patch: SessionPatch) -> Effect {
    Effect::PersistSession { agent_id: agent.clone(), patch }
}

/// Stop everything running for the agent's current session.
fn teardown(agent: &AgentId, logout: bool, effects: &mut Vec<Effect>) {
    effects.push(Effect::CancelReconnect { agent_id: agent.clone() });
    effects.push(Effect::CancelTimer { id: TimerId::heartbeat(agent) });
    effects.push(Effect::CancelTimer { id: TimerId::relink_expiry(agent) });
    effects.push(Effect::StopInbound { agent_id: agent.clone(), flush: true });
    effects.push(Effect::CloseSession { agent_id: agent.clone(), logout });
}

#[cfg(test)]
#[path = "machine_tests.rs"]
mod tests;
