// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound event pipeline.
//!
//! Raw message events are classified, deduplicated and queued per agent.
//! A queue is flushed to the store in batches; a failed batch moves to a
//! retry queue that is written one record at a time. Forwarding to the
//! downstream notifier runs in its own tasks and never waits on storage.

use crate::cache::SessionCache;
use crate::config::EngineConfig;
use crate::health::Counters;
use crate::resolver::IdentityResolver;
use indexmap::IndexMap;
use parking_lot::Mutex;
use sb_adapters::{Notifier, SendReceipt};
use sb_core::jid::{self, ConversationClass};
use sb_core::{AgentId, Clock, MediaRef, MessageKind, MessageRecord};
use sb_storage::{AgentStore, StoreError};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

/// Native ids remembered per agent for duplicate detection
const SEEN_CAPACITY: usize = 2048;

/// Wrappers whose inner `message` carries the real content
const WRAPPERS: [&str; 4] =
    ["ephemeralMessage", "viewOnceMessage", "viewOnceMessageV2", "documentWithCaptionMessage"];

/// Control frames that never carry user content
const CONTROL: [&str; 4] =
    ["protocolMessage", "reactionMessage", "senderKeyDistributionMessage", "messageContextInfo"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discard {
    Malformed(&'static str),
    /// Control traffic only
    Control,
    NoContent,
    Conversation(ConversationClass),
}

impl fmt::Display for Discard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Discard::Malformed(what) => write!(f, "malformed: {what}"),
            Discard::Control => f.write_str("control frame"),
            Discard::NoContent => f.write_str("no content"),
            Discard::Conversation(class) => write!(f, "{class} conversation"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Filtered(Discard),
    Duplicate,
    /// The network's reflection of a message this instance sent
    Echo,
    /// `first` means the queue was empty; `flush_now` means it is full
    Queued { flush_now: bool, first: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Empty,
    Stored { inserted: usize },
    /// The batch failed and waits in the retry queue
    Deferred { count: usize },
}

#[derive(Debug, Clone)]
struct Recent {
    fingerprint: String,
    sender: String,
    timestamp_ms: u64,
    /// Local clock when the entry was recorded; drives pruning
    seen_at_ms: u64,
}

#[derive(Debug, Default)]
struct AgentQueue {
    pending: Vec<MessageRecord>,
    retry: Vec<MessageRecord>,
    seen: IndexMap<String, ()>,
    recent: Vec<Recent>,
    outbound: Vec<Recent>,
}

impl AgentQueue {
    fn remember(&mut self, native_id: &str) {
        self.seen.insert(native_id.to_string(), ());
        while self.seen.len() > SEEN_CAPACITY {
            self.seen.shift_remove_index(0);
        }
    }

    fn prune(&mut self, now_ms: u64, fingerprint_window: u64, echo_window: u64) {
        self.recent.retain(|r| now_ms.saturating_sub(r.seen_at_ms) <= fingerprint_window);
        self.outbound.retain(|r| now_ms.saturating_sub(r.seen_at_ms) <= echo_window);
    }
}

fn within(a: u64, b: u64, window: u64) -> bool {
    a.abs_diff(b) <= window
}

#[derive(Debug, Clone)]
struct Settings {
    batch_size: usize,
    backlog_limit: usize,
    fingerprint_window_ms: u64,
    echo_window_ms: u64,
    forward_attempts: u32,
    forward_base_delay: Duration,
    op_timeout: Duration,
}

pub struct Pipeline<N: Notifier, C: Clock> {
    store: Arc<dyn AgentStore>,
    notifier: N,
    resolver: IdentityResolver<C>,
    clock: C,
    counters: Arc<Counters>,
    settings: Settings,
    queues: Mutex<HashMap<AgentId, AgentQueue>>,
    forwards: Mutex<JoinSet<()>>,
}

/// Content extracted from one message.
struct Content {
    kind: MessageKind,
    body: Option<String>,
    media: Option<MediaRef>,
}

impl<N: Notifier, C: Clock> Pipeline<N, C> {
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn AgentStore>,
        notifier: N,
        cache: Arc<SessionCache<C>>,
        clock: C,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            store,
            notifier,
            resolver: IdentityResolver::new(cache),
            clock,
            counters,
            settings: Settings {
                batch_size: config.batch_size,
                backlog_limit: config.backlog_limit,
                fingerprint_window_ms: config.fingerprint_window.as_millis() as u64,
                echo_window_ms: config.echo_window.as_millis() as u64,
                forward_attempts: config.forward_attempts,
                forward_base_delay: config.forward_base_delay,
                op_timeout: config.op_timeout,
            },
            queues: Mutex::new(HashMap::new()),
            forwards: Mutex::new(JoinSet::new()),
        }
    }

    /// Start a fresh queue for a newly connected agent.
    pub fn open_agent(&self, agent: &AgentId) {
        self.queues.lock().entry(agent.clone()).or_default();
    }

    /// Forget an agent's queue. Returns how many records were still queued.
    pub fn drop_agent(&self, agent: &AgentId) -> usize {
        self.queues.lock().remove(agent).map_or(0, |q| q.pending.len() + q.retry.len())
    }

    pub fn pending_count(&self, agent: &AgentId) -> usize {
        self.queues.lock().get(agent).map_or(0, |q| q.pending.len())
    }

    pub fn retry_count(&self, agent: &AgentId) -> usize {
        self.queues.lock().get(agent).map_or(0, |q| q.retry.len())
    }

    /// Classify, deduplicate and enqueue one raw message event.
    ///
    /// `own_phone` is the agent's phone identity, used as the sender of
    /// locally originated messages.
    pub async fn on_event(
        &self,
        agent: &AgentId,
        payload: &Value,
        own_phone: Option<&str>,
    ) -> Admission {
        let record = match self.classify(agent, payload, own_phone).await {
            Ok(record) => record,
            Err(discard) => {
                Counters::bump(&self.counters.filtered);
                tracing::debug!(agent_id = %agent, reason = %discard, "message discarded");
                return Admission::Filtered(discard);
            }
        };
        self.dedupe_and_enqueue(agent, record)
    }

    async fn classify(
        &self,
        agent: &AgentId,
        payload: &Value,
        own_phone: Option<&str>,
    ) -> Result<MessageRecord, Discard> {
        let key = payload.get("key").ok_or(Discard::Malformed("missing key"))?;
        let remote = key
            .get("remoteJid")
            .and_then(Value::as_str)
            .ok_or(Discard::Malformed("missing remoteJid"))?;
        let native_id =
            key.get("id").and_then(Value::as_str).ok_or(Discard::Malformed("missing id"))?;

        let class = jid::classify_conversation(remote);
        if !class.is_persistable() {
            return Err(Discard::Conversation(class));
        }

        let message = payload.get("message").ok_or(Discard::NoContent)?;
        let content = extract_content(unwrap_message(message))?;

        let chat = match self.resolver.resolve(key).await {
            Some(resolution) => resolution.jid,
            None => remote.to_string(),
        };
        let from_me = key.get("fromMe").and_then(Value::as_bool).unwrap_or(false);
        let sender = if from_me { own_phone.unwrap_or("me").to_string() } else { chat.clone() };
        let timestamp_ms = message_timestamp_ms(payload).unwrap_or_else(|| self.clock.epoch_ms());
        let fingerprint = fingerprint(&chat, from_me, content.kind, content.body.as_deref());

        Ok(MessageRecord {
            agent_id: agent.clone(),
            native_id: native_id.to_string(),
            chat,
            sender,
            from_me,
            kind: content.kind,
            body: content.body,
            media: content.media,
            push_name: payload.get("pushName").and_then(Value::as_str).map(String::from),
            timestamp_ms,
            fingerprint,
        })
    }

    fn dedupe_and_enqueue(&self, agent: &AgentId, record: MessageRecord) -> Admission {
        let s = &self.settings;
        let mut queues = self.queues.lock();
        let queue = queues.entry(agent.clone()).or_default();
        let now_ms = self.clock.epoch_ms();
        queue.prune(now_ms, s.fingerprint_window_ms, s.echo_window_ms);

        if queue.seen.contains_key(&record.native_id) {
            Counters::bump(&self.counters.dedup_drops);
            return Admission::Duplicate;
        }

        if record.from_me
            && queue.outbound.iter().any(|o| {
                o.fingerprint == record.fingerprint
                    && within(o.timestamp_ms, record.timestamp_ms, s.echo_window_ms)
            })
        {
            queue.remember(&record.native_id);
            Counters::bump(&self.counters.echo_drops);
            tracing::debug!(agent_id = %agent, native_id = %record.native_id, "echo suppressed");
            return Admission::Echo;
        }

        if queue.recent.iter().any(|r| {
            r.fingerprint == record.fingerprint
                && r.sender == record.sender
                && within(r.timestamp_ms, record.timestamp_ms, s.fingerprint_window_ms)
        }) {
            queue.remember(&record.native_id);
            Counters::bump(&self.counters.dedup_drops);
            return Admission::Duplicate;
        }

        queue.remember(&record.native_id);
        queue.recent.push(Recent {
            fingerprint: record.fingerprint.clone(),
            sender: record.sender.clone(),
            timestamp_ms: record.timestamp_ms,
            seen_at_ms: now_ms,
        });
        queue.pending.push(record);

        let first = queue.pending.len() == 1;
        let flush_now = queue.pending.len() >= s.batch_size
            || queue.pending.len() + queue.retry.len() >= s.backlog_limit;
        Admission::Queued { flush_now, first }
    }

    /// Register a message this instance sent and store it.
    ///
    /// The record is authoritative; its network echo will be suppressed.
    pub async fn record_outbound(
        &self,
        agent: &AgentId,
        to: &str,
        text: &str,
        receipt: &SendReceipt,
        own_phone: Option<&str>,
    ) -> Result<MessageRecord, StoreError> {
        let body = Some(text.to_string());
        let record = MessageRecord {
            agent_id: agent.clone(),
            native_id: receipt.native_id.clone(),
            chat: to.to_string(),
            sender: own_phone.unwrap_or("me").to_string(),
            from_me: true,
            kind: MessageKind::Text,
            fingerprint: fingerprint(to, true, MessageKind::Text, body.as_deref()),
            body,
            media: None,
            push_name: None,
            timestamp_ms: receipt.timestamp_ms,
        };
        {
            let mut queues = self.queues.lock();
            let queue = queues.entry(agent.clone()).or_default();
            queue.remember(&record.native_id);
            queue.outbound.push(Recent {
                fingerprint: record.fingerprint.clone(),
                sender: record.sender.clone(),
                timestamp_ms: record.timestamp_ms,
                seen_at_ms: self.clock.epoch_ms(),
            });
        }
        self.insert(vec![record.clone()]).await?;
        Ok(record)
    }

    /// Write the pending batch. Forwarding happens whatever the store says.
    pub async fn flush_agent(&self, agent: &AgentId) -> FlushOutcome {
        let batch = match self.queues.lock().get_mut(agent) {
            Some(queue) if !queue.pending.is_empty() => std::mem::take(&mut queue.pending),
            _ => return FlushOutcome::Empty,
        };

        for record in &batch {
            self.forward(record);
        }

        match self.insert(batch.clone()).await {
            Ok(inserted) => {
                tracing::debug!(agent_id = %agent, count = batch.len(), inserted, "batch stored");
                FlushOutcome::Stored { inserted }
            }
            Err(e) => {
                Counters::bump(&self.counters.flush_failures);
                let count = batch.len();
                tracing::warn!(agent_id = %agent, count, error = %e, "batch flush failed");
                let shed = self.defer(agent, batch);
                if shed > 0 {
                    tracing::error!(
                        agent_id = %agent,
                        shed,
                        limit = self.settings.backlog_limit,
                        "inbound backlog full, oldest deferred records dropped"
                    );
                }
                FlushOutcome::Deferred { count }
            }
        }
    }

    /// Move a failed batch to the retry queue, shedding the oldest deferred
    /// records so the backlog stays within its limit. Returns how many were
    /// shed.
    fn defer(&self, agent: &AgentId, batch: Vec<MessageRecord>) -> usize {
        let mut queues = self.queues.lock();
        let Some(queue) = queues.get_mut(agent) else {
            return 0;
        };
        queue.retry.extend(batch);
        let room = self.settings.backlog_limit.saturating_sub(queue.pending.len());
        let shed = queue.retry.len().saturating_sub(room);
        queue.retry.drain(..shed);
        Counters::add(&self.counters.backlog_shed, shed as u64);
        shed
    }

    /// Write deferred records one at a time. Records that fail again are
    /// dropped with an error log. Returns how many were stored.
    pub async fn retry_flush(&self, agent: &AgentId) -> usize {
        let retry = match self.queues.lock().get_mut(agent) {
            Some(queue) => std::mem::take(&mut queue.retry),
            None => return 0,
        };
        let mut stored = 0;
        for record in retry {
            let native_id = record.native_id.clone();
            match self.insert(vec![record]).await {
                Ok(n) => stored += n,
                Err(e) => {
                    Counters::bump(&self.counters.retry_failures);
                    tracing::error!(
                        agent_id = %agent,
                        native_id = %native_id,
                        error = %e,
                        "message dropped after retry"
                    );
                }
            }
        }
        stored
    }

    async fn insert(&self, records: Vec<MessageRecord>) -> Result<usize, StoreError> {
        match tokio::time::timeout(self.settings.op_timeout, self.store.insert_messages(records))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(StoreError::Unavailable("message insert timed out".to_string())),
        }
    }

    fn forward(&self, record: &MessageRecord) {
        let payload = json!({
            "type": "message.received",
            "agent_id": record.agent_id,
            "message": record,
        });
        let notifier = self.notifier.clone();
        let counters = Arc::clone(&self.counters);
        let attempts = self.settings.forward_attempts;
        let base = self.settings.forward_base_delay;
        let agent = record.agent_id.clone();
        let native_id = record.native_id.clone();

        let mut forwards = self.forwards.lock();
        while forwards.try_join_next().is_some() {}
        forwards.spawn(async move {
            for attempt in 0..attempts {
                match notifier.deliver(&payload).await {
                    Ok(()) => return,
                    Err(e) => {
                        tracing::warn!(agent_id = %agent, attempt, error = %e, "forward failed");
                        if attempt + 1 < attempts {
                            tokio::time::sleep(base.saturating_mul(1 << attempt.min(16))).await;
                        }
                    }
                }
            }
            Counters::bump(&counters.forward_give_ups);
            tracing::error!(agent_id = %agent, native_id = %native_id, attempts, "forward gave up");
        });
    }

    /// Wait for every in-flight forward to finish.
    pub async fn drain_forwards(&self) {
        let mut forwards = std::mem::take(&mut *self.forwards.lock());
        while forwards.join_next().await.is_some() {}
    }
}

/// Peel off wrapper messages until the content message is reached.
fn unwrap_message(mut message: &Value) -> &Value {
    for _ in 0..4 {
        let inner = WRAPPERS.iter().find_map(|w| message.get(w)?.get("message"));
        match inner {
            Some(inner) => message = inner,
            None => break,
        }
    }
    message
}

fn extract_content(message: &Value) -> Result<Content, Discard> {
    let text = |v: &Value, field: &str| v.get(field).and_then(Value::as_str).map(String::from);
    let media = |v: &Value| {
        Some(MediaRef {
            mimetype: text(v, "mimetype"),
            url: text(v, "url"),
            file_name: text(v, "fileName"),
        })
    };

    if let Some(body) = text(message, "conversation") {
        return Ok(Content { kind: MessageKind::Text, body: Some(body), media: None });
    }
    if let Some(ext) = message.get("extendedTextMessage") {
        return Ok(Content { kind: MessageKind::Text, body: text(ext, "text"), media: None });
    }

    let media_kinds = [
        ("imageMessage", MessageKind::Image),
        ("videoMessage", MessageKind::Video),
        ("audioMessage", MessageKind::Audio),
        ("documentMessage", MessageKind::Document),
        ("stickerMessage", MessageKind::Sticker),
    ];
    for (field, kind) in media_kinds {
        if let Some(m) = message.get(field) {
            return Ok(Content { kind, body: text(m, "caption"), media: media(m) });
        }
    }

    if let Some(loc) = message.get("locationMessage") {
        let lat = loc.get("degreesLatitude").and_then(Value::as_f64);
        let lng = loc.get("degreesLongitude").and_then(Value::as_f64);
        let body = match (lat, lng) {
            (Some(lat), Some(lng)) => Some(format!("{lat},{lng}")),
            _ => text(loc, "name"),
        };
        return Ok(Content { kind: MessageKind::Location, body, media: None });
    }
    if let Some(contact) = message.get("contactMessage") {
        return Ok(Content {
            kind: MessageKind::Contact,
            body: text(contact, "displayName"),
            media: None,
        });
    }

    let only_control = message
        .as_object()
        .is_some_and(|m| !m.is_empty() && m.keys().all(|k| CONTROL.contains(&k.as_str())));
    if only_control {
        Err(Discard::Control)
    } else {
        Err(Discard::NoContent)
    }
}

/// `messageTimestamp` arrives in seconds, as a number or a string.
fn message_timestamp_ms(payload: &Value) -> Option<u64> {
    let raw = payload.get("messageTimestamp")?;
    let secs = raw.as_u64().or_else(|| raw.as_str()?.parse().ok())?;
    Some(secs.saturating_mul(1000))
}

pub fn fingerprint(chat: &str, from_me: bool, kind: MessageKind, body: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(chat.as_bytes());
    hasher.update([0, u8::from(from_me), 0]);
    hasher.update(kind.to_string().as_bytes());
    hasher.update([0]);
    hasher.update(body.unwrap_or_default().as_bytes());
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
