// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake transport for testing

use super::{ConnectRequest, ExistsResult, SendReceipt, Session, SessionTransport, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use sb_core::{AgentId, DisconnectCode, Event, Termination};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

/// Recorded transport call
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Connect { agent_id: AgentId, generation: u64, credential: Option<Value> },
    Send { agent_id: AgentId, to: String, text: String },
    Exists { agent_id: AgentId, phone: String },
    Logout { agent_id: AgentId },
    Close { agent_id: AgentId, generation: u64 },
}

#[derive(Default)]
struct FakeTransportState {
    calls: Vec<TransportCall>,
    sessions: HashMap<AgentId, FakeSession>,
    senders: HashMap<AgentId, mpsc::Sender<Event>>,
    connect_failures: usize,
    held_connects: HashMap<AgentId, Arc<Semaphore>>,
    exists: HashMap<String, ExistsResult>,
    next_message: u64,
}

/// Fake transport that records calls and lets tests drive session events.
#[derive(Clone, Default)]
pub struct FakeTransport {
    inner: Arc<Mutex<FakeTransportState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all recorded calls
    pub fn calls(&self) -> Vec<TransportCall> {
        self.inner.lock().calls.clone()
    }

    /// Connect requests made for `agent`, oldest first
    pub fn connects(&self, agent: &str) -> Vec<(u64, Option<Value>)> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                TransportCall::Connect { agent_id, generation, credential }
                    if agent_id == agent =>
                {
                    Some((*generation, credential.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Fail the next `count` connects
    pub fn fail_next_connect(&self, count: usize) {
        self.inner.lock().connect_failures = count;
    }

    /// Park connects for `agent` until [`FakeTransport::release_connects`]
    pub fn hold_connects(&self, agent: &str) {
        self.inner.lock().held_connects.insert(AgentId::new(agent), Arc::new(Semaphore::new(0)));
    }

    pub fn release_connects(&self, agent: &str) {
        if let Some(gate) = self.inner.lock().held_connects.remove(&AgentId::new(agent)) {
            gate.close();
        }
    }

    pub fn set_exists(&self, phone: &str, result: ExistsResult) {
        self.inner.lock().exists.insert(phone.to_string(), result);
    }

    /// Latest session opened for `agent`
    pub fn session(&self, agent: &str) -> Option<FakeSession> {
        self.inner.lock().sessions.get(&AgentId::new(agent)).cloned()
    }

    /// Deliver an event from the latest session of `agent`.
    ///
    /// Returns `false` when the agent has no session.
    pub async fn emit(&self, agent: &str, make: impl FnOnce(AgentId, u64) -> Event) -> bool {
        let agent_id = AgentId::new(agent);
        let (session, tx) = {
            let inner = self.inner.lock();
            match (inner.sessions.get(&agent_id), inner.senders.get(&agent_id)) {
                (Some(s), Some(tx)) => (s.clone(), tx.clone()),
                _ => return false,
            }
        };
        let event = make(agent_id, session.generation);
        match &event {
            Event::SessionOpened { .. } => session.state.open.store(true, Ordering::SeqCst),
            Event::SessionTerminated { .. } => session.state.open.store(false, Ordering::SeqCst),
            _ => {}
        }
        tx.send(event).await.is_ok()
    }

    pub async fn emit_qr(&self, agent: &str, payload: &str) -> bool {
        let payload = payload.to_string();
        self.emit(agent, |agent_id, generation| Event::SessionQr { agent_id, generation, payload })
            .await
    }

    pub async fn emit_opened(&self, agent: &str, phone: Option<&str>) -> bool {
        let phone_identity = phone.map(String::from);
        self.emit(agent, |agent_id, generation| Event::SessionOpened {
            agent_id,
            generation,
            phone_identity,
        })
        .await
    }

    pub async fn emit_creds(&self, agent: &str, credential: Value) -> bool {
        self.emit(agent, |agent_id, generation| Event::CredentialsUpdated {
            agent_id,
            generation,
            credential,
        })
        .await
    }

    pub async fn emit_message(&self, agent: &str, payload: Value) -> bool {
        self.emit(agent, |agent_id, generation| Event::MessageReceived {
            agent_id,
            generation,
            payload,
        })
        .await
    }

    pub async fn emit_terminated(&self, agent: &str, termination: Termination) -> bool {
        self.emit(agent, |agent_id, generation| Event::SessionTerminated {
            agent_id,
            generation,
            termination,
        })
        .await
    }

    pub async fn emit_code(&self, agent: &str, code: DisconnectCode) -> bool {
        self.emit_terminated(agent, Termination::of(code)).await
    }
}

#[async_trait]
impl SessionTransport for FakeTransport {
    async fn connect(
        &self,
        request: ConnectRequest,
        events: mpsc::Sender<Event>,
    ) -> Result<Arc<dyn Session>, TransportError> {
        let gate = self.inner.lock().held_connects.get(&request.agent_id).cloned();
        if let Some(gate) = gate {
            // Closing the gate releases every parked connect
            let _ = gate.acquire().await;
        }
        let mut inner = self.inner.lock();
        inner.calls.push(TransportCall::Connect {
            agent_id: request.agent_id.clone(),
            generation: request.generation,
            credential: request.credential.clone(),
        });
        if inner.connect_failures > 0 {
            inner.connect_failures -= 1;
            return Err(TransportError::Connect("injected failure".to_string()));
        }
        let session = FakeSession {
            state: Arc::new(FakeSessionState {
                agent_id: request.agent_id.clone(),
                open: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
            generation: request.generation,
            transport: Arc::clone(&self.inner),
        };
        inner.sessions.insert(request.agent_id.clone(), session.clone());
        inner.senders.insert(request.agent_id, events);
        Ok(Arc::new(session))
    }
}

struct FakeSessionState {
    agent_id: AgentId,
    open: AtomicBool,
    closed: AtomicBool,
}

/// Session handle produced by [`FakeTransport`].
#[derive(Clone)]
pub struct FakeSession {
    state: Arc<FakeSessionState>,
    generation: u64,
    transport: Arc<Mutex<FakeTransportState>>,
}

impl FakeSession {
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Drop the connection without a termination event, as a silent
    /// network loss would.
    pub fn drop_connection(&self) {
        self.state.open.store(false, Ordering::SeqCst);
    }

    fn record(&self, call: TransportCall) {
        self.transport.lock().calls.push(call);
    }
}

#[async_trait]
impl Session for FakeSession {
    fn agent_id(&self) -> &AgentId {
        &self.state.agent_id
    }

    fn generation(&self) -> u64 {
        self.generation
    }

    fn is_open(&self) -> bool {
        self.state.open.load(Ordering::SeqCst) && !self.is_closed()
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<SendReceipt, TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        let mut transport = self.transport.lock();
        transport.calls.push(TransportCall::Send {
            agent_id: self.state.agent_id.clone(),
            to: to.to_string(),
            text: text.to_string(),
        });
        transport.next_message += 1;
        Ok(SendReceipt {
            native_id: format!("OUT-{}", transport.next_message),
            timestamp_ms: 1_700_000_000_000 + transport.next_message,
        })
    }

    async fn exists(&self, phone_jid: &str) -> Result<ExistsResult, TransportError> {
        let mut transport = self.transport.lock();
        transport.calls.push(TransportCall::Exists {
            agent_id: self.state.agent_id.clone(),
            phone: phone_jid.to_string(),
        });
        Ok(transport
            .exists
            .get(phone_jid)
            .cloned()
            .unwrap_or(ExistsResult { on_network: false, resolved: None }))
    }

    async fn logout(&self) -> Result<(), TransportError> {
        self.record(TransportCall::Logout { agent_id: self.state.agent_id.clone() });
        Ok(())
    }

    async fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
        self.state.open.store(false, Ordering::SeqCst);
        self.record(TransportCall::Close {
            agent_id: self.state.agent_id.clone(),
            generation: self.generation,
        });
    }
}
