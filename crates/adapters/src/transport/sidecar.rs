// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket bridge to the protocol sidecar.
//!
//! Each session is one WebSocket. Requests are JSON frames with an `op`
//! field; the sidecar answers with `{"event":"result","request_id":..}` and
//! pushes `qr`, `open`, `creds`, `message`, and `close` events.

use super::{ConnectRequest, ExistsResult, SendReceipt, Session, SessionTransport, TransportError};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use sb_core::{AgentId, Event, Termination};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Value>>>>;

/// Close code reported when the sidecar stream ends without a close event.
const STREAM_ENDED_CODE: u16 = 428;

#[derive(Debug, Clone)]
pub struct SidecarTransport {
    url: String,
    request_timeout: Duration,
}

impl SidecarTransport {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Self {
        Self { url: url.into(), request_timeout }
    }
}

#[async_trait]
impl SessionTransport for SidecarTransport {
    async fn connect(
        &self,
        request: ConnectRequest,
        events: mpsc::Sender<Event>,
    ) -> Result<Arc<dyn Session>, TransportError> {
        let (ws, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (mut sink, stream) = ws.split();

        let hello = json!({
            "op": "connect",
            "agent_id": request.agent_id,
            "generation": request.generation,
            "credential": request.credential,
        });
        sink.send(Message::text(hello.to_string()))
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let shared = Arc::new(Shared {
            agent_id: request.agent_id.clone(),
            generation: request.generation,
            pending: Pending::default(),
            open: AtomicBool::new(false),
            closing: AtomicBool::new(false),
        });
        let reader = tokio::spawn(read_loop(stream, Arc::clone(&shared), events));
        tracing::info!(
            agent_id = %request.agent_id,
            generation = request.generation,
            "sidecar session started"
        );

        Ok(Arc::new(SidecarSession {
            shared,
            sink: tokio::sync::Mutex::new(sink),
            reader: Mutex::new(Some(reader)),
            request_timeout: self.request_timeout,
        }))
    }
}

struct Shared {
    agent_id: AgentId,
    generation: u64,
    pending: Pending,
    open: AtomicBool,
    closing: AtomicBool,
}

pub struct SidecarSession {
    shared: Arc<Shared>,
    sink: tokio::sync::Mutex<SplitSink<WsStream, Message>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    request_timeout: Duration,
}

impl SidecarSession {
    async fn request(&self, mut frame: Value) -> Result<Value, TransportError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        frame["request_id"] = Value::String(request_id.clone());
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(request_id.clone(), tx);

        let sent = self.sink.lock().await.send(Message::text(frame.to_string())).await;
        if let Err(e) = sent {
            self.shared.pending.lock().remove(&request_id);
            return Err(TransportError::Protocol(e.to_string()));
        }

        let reply = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(TransportError::Closed),
            Err(_) => {
                self.shared.pending.lock().remove(&request_id);
                return Err(TransportError::Timeout);
            }
        };
        if reply.get("ok").and_then(Value::as_bool) == Some(true) {
            Ok(reply)
        } else {
            let error = reply.get("error").and_then(Value::as_str).unwrap_or("unknown error");
            Err(TransportError::Rejected(error.to_string()))
        }
    }
}

#[async_trait]
impl Session for SidecarSession {
    fn agent_id(&self) -> &AgentId {
        &self.shared.agent_id
    }

    fn generation(&self) -> u64 {
        self.shared.generation
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<SendReceipt, TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen);
        }
        let reply = self.request(json!({ "op": "send", "to": to, "text": text })).await?;
        let native_id = reply
            .get("native_id")
            .and_then(Value::as_str)
            .ok_or_else(|| TransportError::Protocol("send result without native_id".to_string()))?;
        Ok(SendReceipt {
            native_id: native_id.to_string(),
            timestamp_ms: reply.get("timestamp_ms").and_then(Value::as_u64).unwrap_or(0),
        })
    }

    async fn exists(&self, phone_jid: &str) -> Result<ExistsResult, TransportError> {
        let reply = self.request(json!({ "op": "exists", "jid": phone_jid })).await?;
        Ok(ExistsResult {
            on_network: reply.get("exists").and_then(Value::as_bool).unwrap_or(false),
            resolved: reply.get("jid").and_then(Value::as_str).map(String::from),
        })
    }

    async fn logout(&self) -> Result<(), TransportError> {
        self.request(json!({ "op": "logout" })).await.map(|_| ())
    }

    async fn close(&self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        self.shared.open.store(false, Ordering::SeqCst);
        let mut sink = self.sink.lock().await;
        let _ = sink.send(Message::text(json!({ "op": "close" }).to_string())).await;
        let _ = sink.close().await;
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        tracing::info!(
            agent_id = %self.shared.agent_id,
            generation = self.shared.generation,
            "sidecar session closed"
        );
    }
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    shared: Arc<Shared>,
    events: mpsc::Sender<Event>,
) {
    let mut terminated = false;
    while let Some(msg) = stream.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(agent_id = %shared.agent_id, error = %e, "sidecar stream error");
                break;
            }
        };
        match parse_frame(text.as_str(), &shared.agent_id, shared.generation) {
            Frame::Reply { request_id, body } => {
                if let Some(tx) = shared.pending.lock().remove(&request_id) {
                    let _ = tx.send(body);
                }
            }
            Frame::Event(event) => {
                match &*event {
                    Event::SessionOpened { .. } => shared.open.store(true, Ordering::SeqCst),
                    Event::SessionTerminated { .. } => {
                        shared.open.store(false, Ordering::SeqCst);
                        terminated = true;
                    }
                    _ => {}
                }
                if events.send(*event).await.is_err() {
                    return;
                }
            }
            Frame::Ignored => {}
        }
    }

    shared.open.store(false, Ordering::SeqCst);
    shared.pending.lock().clear();
    if !terminated && !shared.closing.load(Ordering::SeqCst) {
        let termination =
            Termination::new(Some(STREAM_ENDED_CODE), Some("sidecar stream ended".to_string()));
        let _ = events
            .send(Event::SessionTerminated {
                agent_id: shared.agent_id.clone(),
                generation: shared.generation,
                termination,
            })
            .await;
    }
}

/// A decoded sidecar frame.
#[derive(Debug, PartialEq)]
pub(crate) enum Frame {
    Event(Box<Event>),
    Reply { request_id: String, body: Value },
    Ignored,
}

pub(crate) fn parse_frame(text: &str, agent_id: &AgentId, generation: u64) -> Frame {
    let Ok(json) = serde_json::from_str::<Value>(text) else {
        return Frame::Ignored;
    };
    let agent_id = agent_id.clone();
    let event = match json.get("event").and_then(Value::as_str).unwrap_or("") {
        "result" => {
            let Some(request_id) = json.get("request_id").and_then(Value::as_str) else {
                return Frame::Ignored;
            };
            return Frame::Reply { request_id: request_id.to_string(), body: json.clone() };
        }
        "qr" => {
            let Some(payload) = json.get("qr").and_then(Value::as_str) else {
                return Frame::Ignored;
            };
            Event::SessionQr { agent_id, generation, payload: payload.to_string() }
        }
        "open" => Event::SessionOpened {
            agent_id,
            generation,
            phone_identity: json.get("phone").and_then(Value::as_str).map(String::from),
        },
        "creds" => match json.get("credential") {
            Some(credential) if credential.is_object() => {
                Event::CredentialsUpdated { agent_id, generation, credential: credential.clone() }
            }
            _ => return Frame::Ignored,
        },
        "message" => match json.get("message") {
            Some(payload) if payload.is_object() => {
                Event::MessageReceived { agent_id, generation, payload: payload.clone() }
            }
            _ => return Frame::Ignored,
        },
        "close" => {
            let code = json.get("code").and_then(Value::as_u64).and_then(|c| u16::try_from(c).ok());
            let reason = json.get("reason").and_then(Value::as_str).map(String::from);
            let termination = Termination::new(code, reason);
            Event::SessionTerminated { agent_id, generation, termination }
        }
        _ => return Frame::Ignored,
    };
    Frame::Event(Box::new(event))
}

#[cfg(test)]
#[path = "sidecar_tests.rs"]
mod tests;
