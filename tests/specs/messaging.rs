// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound delivery and outbound sends on a connected agent.

use crate::prelude::*;
use std::sync::Arc;

const PEER: &str = "15550002222@s.whatsapp.net";
const TS: u64 = 1_700_000_000;

async fn connected() -> (MemoryStore, FakeClock, Instance) {
    let store = MemoryStore::new();
    let clock = FakeClock::new();
    let instance = Instance::start(Arc::new(store.clone()), &clock, "host-a", 100).await;
    instance.pair("agent-1").await;
    (store, clock, instance)
}

#[tokio::test]
async fn inbound_messages_are_stored_then_forwarded() {
    let (store, clock, instance) = connected().await;

    for (id, text) in [("M1", "hello"), ("M2", "again")] {
        instance.transport.emit_message("agent-1", text_payload(id, PEER, false, text, TS)).await;
    }
    instance.pump().await;
    assert!(store.snapshot().list_messages(&AgentId::new("agent-1")).is_empty());

    clock.advance(instance.runtime.config().flush_interval);
    instance.runtime.tick_timers().await;
    instance.runtime.pipeline().drain_forwards().await;

    let stored = store.snapshot().list_messages(&AgentId::new("agent-1"));
    assert_eq!(stored.len(), 2);
    let delivered = instance.notifier.delivered();
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered[0]["type"], "message.received");
    assert_eq!(delivered[0]["agent_id"], "agent-1");
}

#[tokio::test]
async fn status_broadcasts_and_group_chats_are_filtered() {
    let (store, clock, instance) = connected().await;

    for (id, chat) in [("B1", "status@broadcast"), ("G1", "120363000000@g.us")] {
        instance.transport.emit_message("agent-1", text_payload(id, chat, false, "x", TS)).await;
    }
    instance.pump().await;
    clock.advance(instance.runtime.config().flush_interval);
    instance.runtime.tick_timers().await;

    assert!(store.snapshot().list_messages(&AgentId::new("agent-1")).is_empty());
    let health = instance.runtime.fleet_health().await.unwrap();
    assert_eq!(health.errors.filtered, 2);
}

#[tokio::test]
async fn sent_message_is_recorded_and_its_echo_dropped() {
    let (store, _clock, instance) = connected().await;
    let agent = AgentId::new("agent-1");

    let receipt = instance.runtime.send_message(&agent, PEER, "ping").await.unwrap();
    let echo = text_payload("ECHO", PEER, true, "ping", TS);
    instance.transport.emit_message("agent-1", echo).await;
    instance.pump().await;

    let stored = store.snapshot().list_messages(&agent);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].native_id, receipt.native_id);
    assert_eq!(instance.runtime.pipeline().pending_count(&agent), 0);
    let health = instance.runtime.fleet_health().await.unwrap();
    assert_eq!(health.errors.echo_drops, 1);
}

#[tokio::test]
async fn disconnected_agent_cannot_send() {
    let (_store, _clock, instance) = connected().await;
    let agent = AgentId::new("agent-1");
    instance.runtime.disconnect(&agent).await.unwrap();

    let result = instance.runtime.send_message(&agent, PEER, "ping").await;

    assert!(matches!(
        result,
        Err(RuntimeError::NotConnected { status: AgentStatus::Disconnected, .. })
    ));
}
