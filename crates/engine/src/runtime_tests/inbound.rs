// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound messages, outbound sends and existence checks

use super::*;
use sb_adapters::{ExistsResult, TransportCall};
use sb_core::test_support::{message_event, text_payload};
use sb_core::TimerId;

const PEER: &str = "15550002222@s.whatsapp.net";
const TS: u64 = 1_700_000_000;

async fn receive(ctx: &TestContext, id: &str, text: &str) {
    ctx.transport.emit_message(AGENT, text_payload(id, PEER, false, text, TS)).await;
    ctx.pump().await;
}

#[tokio::test]
async fn first_message_arms_batch_timer_and_flushes_on_expiry() {
    let ctx = setup().await;
    ctx.pair().await;

    receive(&ctx, "M1", "hello").await;
    assert!(ctx.runtime.scheduler.lock().has_timer(&TimerId::batch_flush(&agent())));
    assert!(ctx.store.snapshot().list_messages(&agent()).is_empty());

    ctx.advance(ctx.runtime.config().flush_interval).await;
    ctx.runtime.pipeline().drain_forwards().await;

    let stored = ctx.store.snapshot().list_messages(&agent());
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].chat, PEER);
    assert_eq!(stored[0].body.as_deref(), Some("hello"));
    assert_eq!(ctx.notifier.delivered().len(), 1);
}

#[tokio::test]
async fn full_batch_flushes_immediately() {
    let ctx = setup_with(test_config().batch_size(2)).await;
    ctx.pair().await;

    receive(&ctx, "M1", "one").await;
    receive(&ctx, "M2", "two").await;

    assert_eq!(ctx.store.snapshot().list_messages(&agent()).len(), 2);
    assert!(!ctx.runtime.scheduler.lock().has_timer(&TimerId::batch_flush(&agent())));
}

#[tokio::test]
async fn redelivered_message_is_stored_once() {
    let ctx = setup().await;
    ctx.pair().await;

    receive(&ctx, "M1", "hello").await;
    receive(&ctx, "M1", "hello").await;
    ctx.advance(ctx.runtime.config().flush_interval).await;

    assert_eq!(ctx.store.snapshot().list_messages(&agent()).len(), 1);
    assert_eq!(ctx.runtime.counters().snapshot().dedup_drops, 1);
}

#[tokio::test]
async fn messages_from_replaced_session_are_dropped() {
    let ctx = setup().await;
    ctx.pair().await;
    let generation = ctx.transport.connects(AGENT)[0].0;

    let payload = text_payload("M1", PEER, false, "x", TS);
    ctx.runtime.handle_event(message_event(AGENT, generation + 5, payload)).await.unwrap();

    assert_eq!(ctx.runtime.pipeline().pending_count(&agent()), 0);
    assert_eq!(ctx.runtime.counters().snapshot().stale_events, 1);
}

#[tokio::test]
async fn failed_batch_is_retried_one_record_at_a_time() {
    let ctx = setup_with(test_config().batch_size(2)).await;
    ctx.pair().await;
    ctx.store.fail_message_writes(2);

    receive(&ctx, "M1", "one").await;
    receive(&ctx, "M2", "two").await;
    assert!(ctx.runtime.scheduler.lock().has_timer(&TimerId::flush_retry(&agent())));
    assert_eq!(ctx.runtime.pipeline().retry_count(&agent()), 2);

    ctx.advance(ctx.runtime.config().flush_retry_delay).await;

    // One record still failed on retry and was counted, the other landed
    assert_eq!(ctx.store.snapshot().list_messages(&agent()).len(), 1);
    assert_eq!(ctx.runtime.counters().snapshot().retry_failures, 1);
    assert_eq!(ctx.runtime.pipeline().retry_count(&agent()), 0);
}

#[tokio::test]
async fn sustained_store_outage_keeps_backlog_bounded() {
    let ctx = setup_with(test_config().batch_size(2).backlog_limit(4)).await;
    ctx.pair().await;
    ctx.store.fail_message_writes(10_000);

    for n in 0..40 {
        receive(&ctx, &format!("M{n}"), "steady").await;
        ctx.advance(Duration::from_secs(1)).await;
        let pipeline = ctx.runtime.pipeline();
        assert!(pipeline.retry_count(&agent()) <= 4, "backlog over limit after M{n}");
        assert!(pipeline.pending_count(&agent()) <= 2);
    }

    // The slow retry path still ran despite steady traffic
    let counters = ctx.runtime.counters().snapshot();
    assert!(counters.retry_failures > 0);
    assert!(counters.backlog_shed > 0);
    assert!(ctx.store.snapshot().list_messages(&agent()).is_empty());
}

#[tokio::test]
async fn transient_drop_keeps_deferred_backlog_for_slow_retry() {
    let ctx = setup().await;
    ctx.pair().await;
    ctx.clock.advance(Duration::from_secs(120));
    receive(&ctx, "M1", "hello").await;
    ctx.store.fail_message_writes(1);

    ctx.transport.emit_code(AGENT, DisconnectCode::ConnectionClosed).await;
    ctx.pump().await;

    assert_eq!(ctx.status().await, AgentStatus::Reconnecting);
    assert_eq!(ctx.runtime.pipeline().retry_count(&agent()), 1);
    assert!(ctx.runtime.scheduler.lock().has_timer(&TimerId::flush_retry(&agent())));
    assert!(ctx.store.snapshot().list_messages(&agent()).is_empty());

    ctx.advance(ctx.runtime.config().flush_retry_delay).await;

    assert_eq!(ctx.store.snapshot().list_messages(&agent()).len(), 1);
    assert_eq!(ctx.runtime.counters().snapshot().retry_failures, 0);
    assert_eq!(ctx.runtime.pipeline().retry_count(&agent()), 0);
}

#[tokio::test]
async fn teardown_flushes_pending_messages() {
    let ctx = setup().await;
    ctx.pair().await;
    receive(&ctx, "M1", "hello").await;

    let report = ctx.runtime.disconnect(&agent()).await.unwrap();

    assert_eq!(report.events_flushed, 1);
    assert_eq!(ctx.store.snapshot().list_messages(&agent()).len(), 1);
}

#[tokio::test]
async fn send_records_outbound_and_suppresses_echo() {
    let ctx = setup().await;
    ctx.pair().await;

    let receipt = ctx.runtime.send_message(&agent(), "+1 555 000 2222", "ping").await.unwrap();

    assert!(ctx.transport.calls().contains(&TransportCall::Send {
        agent_id: agent(),
        to: PEER.to_string(),
        text: "ping".to_string(),
    }));
    let stored = ctx.store.snapshot().list_messages(&agent());
    assert_eq!(stored.len(), 1);
    assert!(stored[0].from_me);
    assert_eq!(stored[0].native_id, receipt.native_id);

    // The network reflects the message back under its own id and a new one
    let reflected = text_payload(&receipt.native_id, PEER, true, "ping", TS);
    ctx.transport.emit_message(AGENT, reflected).await;
    let relabeled = text_payload("ECHO-1", PEER, true, "ping", TS);
    ctx.transport.emit_message(AGENT, relabeled).await;
    ctx.pump().await;

    assert_eq!(ctx.runtime.pipeline().pending_count(&agent()), 0);
    let counters = ctx.runtime.counters().snapshot();
    assert_eq!(counters.dedup_drops, 1);
    assert_eq!(counters.echo_drops, 1);
}

#[tokio::test]
async fn send_requires_connected_agent() {
    let ctx = setup().await;
    ctx.runtime.initialize(&agent()).await.unwrap();

    let result = ctx.runtime.send_message(&agent(), PEER, "ping").await;

    assert!(matches!(
        result,
        Err(RuntimeError::NotConnected { status: AgentStatus::Initializing, .. })
    ));
}

#[tokio::test]
async fn send_rejects_malformed_recipient() {
    let ctx = setup().await;
    ctx.pair().await;

    let result = ctx.runtime.send_message(&agent(), "1203630@g.us", "ping").await;

    assert!(matches!(result, Err(RuntimeError::InvalidRecipient(_))));
}

#[tokio::test]
async fn exists_check_is_cached() {
    let ctx = setup().await;
    ctx.pair().await;
    ctx.transport
        .set_exists(PEER, ExistsResult { on_network: true, resolved: Some(PEER.to_string()) });

    let first = ctx.runtime.check_exists(&agent(), "15550002222").await.unwrap();
    let second = ctx.runtime.check_exists(&agent(), "15550002222").await.unwrap();

    assert!(first.on_network && !first.cached);
    assert!(second.on_network && second.cached);
    let lookups = ctx
        .transport
        .calls()
        .into_iter()
        .filter(|c| matches!(c, TransportCall::Exists { .. }))
        .count();
    assert_eq!(lookups, 1);
}
