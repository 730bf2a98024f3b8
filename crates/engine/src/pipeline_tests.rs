// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use sb_adapters::{FakeNotifier, MemorySharedCache};
use sb_core::test_support::{text_payload, PHONE_JID};
use sb_core::FakeClock;
use sb_storage::MemoryStore;
use yare::parameterized;

const PEER: &str = "15550002222@s.whatsapp.net";
/// Seconds matching the fake clock's starting epoch
const TS: u64 = 1_700_000_000;

struct Ctx {
    pipeline: Pipeline<FakeNotifier, FakeClock>,
    store: MemoryStore,
    notifier: FakeNotifier,
    clock: FakeClock,
    counters: Arc<Counters>,
}

fn agent() -> AgentId {
    AgentId::new("agent-1")
}

fn setup() -> Ctx {
    setup_with(EngineConfig::default().batch_size(3).backlog_limit(5))
}

fn setup_with(config: EngineConfig) -> Ctx {
    let config = config.forward_base_delay(Duration::from_millis(1));
    let clock = FakeClock::new();
    let store = MemoryStore::new();
    let notifier = FakeNotifier::new();
    let counters = Arc::new(Counters::default());
    let cache = Arc::new(SessionCache::new(
        &config.cache,
        Arc::new(MemorySharedCache::new()),
        config.op_timeout,
        clock.clone(),
    ));
    let pipeline = Pipeline::new(
        &config,
        Arc::new(store.clone()),
        notifier.clone(),
        cache,
        clock.clone(),
        Arc::clone(&counters),
    );
    pipeline.open_agent(&agent());
    Ctx { pipeline, store, notifier, clock, counters }
}

fn inbound(id: &str, text: &str) -> Value {
    text_payload(id, PEER, false, text, TS)
}

async fn admit(ctx: &Ctx, payload: Value) -> Admission {
    ctx.pipeline.on_event(&agent(), &payload, Some(PHONE_JID)).await
}

// === Classification ===

#[parameterized(
    group = { "1203630@g.us", Discard::Conversation(ConversationClass::Group) },
    status = { "status@broadcast", Discard::Conversation(ConversationClass::Status) },
    broadcast = { "1700@broadcast", Discard::Conversation(ConversationClass::Broadcast) },
    newsletter = { "1200@newsletter", Discard::Conversation(ConversationClass::Newsletter) },
    system = { "server", Discard::Conversation(ConversationClass::System) },
)]
fn non_direct_conversations_are_filtered(remote: &str, expected: Discard) {
    let ctx = setup();
    let payload = text_payload("M1", remote, false, "hi", TS);
    let admission = futures_util::FutureExt::now_or_never(admit(&ctx, payload));
    assert_eq!(admission, Some(Admission::Filtered(expected)));
}

#[tokio::test]
async fn control_frames_are_filtered() {
    let ctx = setup();
    let payload = json!({
        "key": { "remoteJid": PEER, "fromMe": false, "id": "P1" },
        "message": { "protocolMessage": { "type": 0 } },
    });
    assert_eq!(admit(&ctx, payload).await, Admission::Filtered(Discard::Control));
    assert_eq!(ctx.counters.snapshot().filtered, 1);
}

#[tokio::test]
async fn missing_message_has_no_content() {
    let ctx = setup();
    let payload = json!({ "key": { "remoteJid": PEER, "fromMe": false, "id": "E1" } });
    assert_eq!(admit(&ctx, payload).await, Admission::Filtered(Discard::NoContent));
}

#[tokio::test]
async fn missing_id_is_malformed() {
    let ctx = setup();
    let payload = json!({ "key": { "remoteJid": PEER }, "message": { "conversation": "x" } });
    assert!(matches!(admit(&ctx, payload).await, Admission::Filtered(Discard::Malformed(_))));
}

#[tokio::test]
async fn wrapped_media_is_unwrapped() {
    let ctx = setup();
    let payload = json!({
        "key": { "remoteJid": PEER, "fromMe": false, "id": "IMG1" },
        "message": { "ephemeralMessage": { "message": { "viewOnceMessage": { "message": {
            "imageMessage": { "caption": "look", "mimetype": "image/jpeg", "url": "https://m/1" }
        } } } } },
        "messageTimestamp": TS.to_string(),
    });
    assert!(matches!(admit(&ctx, payload).await, Admission::Queued { .. }));
    ctx.pipeline.flush_agent(&agent()).await;

    let stored = ctx.store.snapshot().list_messages(&agent());
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].kind, MessageKind::Image);
    assert_eq!(stored[0].body.as_deref(), Some("look"));
    assert_eq!(stored[0].media.as_ref().and_then(|m| m.mimetype.as_deref()), Some("image/jpeg"));
    assert_eq!(stored[0].timestamp_ms, TS * 1000);
}

#[tokio::test]
async fn linked_device_chat_resolves_to_phone() {
    let ctx = setup();
    let payload = json!({
        "key": { "remoteJid": "90001234@lid", "senderPn": PEER, "fromMe": false, "id": "L1" },
        "message": { "conversation": "hello" },
        "messageTimestamp": TS,
    });
    admit(&ctx, payload).await;
    ctx.pipeline.flush_agent(&agent()).await;
    let stored = ctx.store.snapshot().list_messages(&agent());
    assert_eq!(stored[0].chat, PEER);
    assert_eq!(stored[0].sender, PEER);
}

// === Deduplication ===

#[tokio::test]
async fn same_native_id_is_stored_once() {
    let ctx = setup();
    assert!(matches!(admit(&ctx, inbound("M1", "hi")).await, Admission::Queued { .. }));
    assert_eq!(admit(&ctx, inbound("M1", "hi")).await, Admission::Duplicate);

    ctx.pipeline.flush_agent(&agent()).await;
    assert_eq!(admit(&ctx, inbound("M1", "hi")).await, Admission::Duplicate);
    assert_eq!(ctx.store.snapshot().list_messages(&agent()).len(), 1);
    assert_eq!(ctx.counters.snapshot().dedup_drops, 2);
}

#[tokio::test]
async fn same_content_under_new_id_within_window_is_stored_once() {
    let ctx = setup();
    admit(&ctx, text_payload("M1", PEER, false, "same", TS)).await;
    let second = admit(&ctx, text_payload("M2", PEER, false, "same", TS + 5)).await;
    assert_eq!(second, Admission::Duplicate);

    ctx.pipeline.flush_agent(&agent()).await;
    assert_eq!(ctx.store.snapshot().list_messages(&agent()).len(), 1);
}

#[tokio::test]
async fn same_content_outside_window_is_kept() {
    let ctx = setup();
    admit(&ctx, text_payload("M1", PEER, false, "same", TS)).await;
    let later = admit(&ctx, text_payload("M2", PEER, false, "same", TS + 60)).await;
    assert!(matches!(later, Admission::Queued { .. }));
}

#[tokio::test]
async fn fingerprint_memory_expires_with_local_clock() {
    let ctx = setup();
    admit(&ctx, text_payload("M1", PEER, false, "same", TS)).await;
    ctx.clock.advance(Duration::from_secs(11));
    let again = admit(&ctx, text_payload("M2", PEER, false, "same", TS)).await;
    assert!(matches!(again, Admission::Queued { .. }));
}

// === Echo suppression ===

#[tokio::test]
async fn echo_of_outbound_message_is_dropped() {
    let ctx = setup();
    let receipt = SendReceipt { native_id: "OUT-1".into(), timestamp_ms: TS * 1000 };
    ctx.pipeline.record_outbound(&agent(), PEER, "sent", &receipt, Some(PHONE_JID)).await.unwrap();

    // The network reflects the message back under another identifier
    let echo = text_payload("NET-9", PEER, true, "sent", TS + 1);
    assert_eq!(admit(&ctx, echo).await, Admission::Echo);
    // And under the original identifier
    let same_id = text_payload("OUT-1", PEER, true, "sent", TS + 1);
    assert_eq!(admit(&ctx, same_id).await, Admission::Duplicate);

    let stored = ctx.store.snapshot().list_messages(&agent());
    assert_eq!(stored.len(), 1);
    assert!(stored[0].from_me);
    assert_eq!(stored[0].sender, PHONE_JID);
    assert_eq!(ctx.counters.snapshot().echo_drops, 1);
}

#[tokio::test]
async fn inbound_message_with_same_text_is_not_an_echo() {
    let ctx = setup();
    let receipt = SendReceipt { native_id: "OUT-1".into(), timestamp_ms: TS * 1000 };
    ctx.pipeline.record_outbound(&agent(), PEER, "ok", &receipt, Some(PHONE_JID)).await.unwrap();
    let reply = admit(&ctx, inbound("IN-1", "ok")).await;
    assert!(matches!(reply, Admission::Queued { .. }));
}

// === Batching ===

#[tokio::test]
async fn batch_reports_first_and_full() {
    let ctx = setup();
    assert_eq!(admit(&ctx, inbound("M1", "a")).await, Admission::Queued {
        flush_now: false,
        first: true
    });
    assert_eq!(admit(&ctx, inbound("M2", "b")).await, Admission::Queued {
        flush_now: false,
        first: false
    });
    assert_eq!(admit(&ctx, inbound("M3", "c")).await, Admission::Queued {
        flush_now: true,
        first: false
    });
    assert_eq!(ctx.pipeline.pending_count(&agent()), 3);

    let outcome = ctx.pipeline.flush_agent(&agent()).await;
    assert_eq!(outcome, FlushOutcome::Stored { inserted: 3 });
    assert_eq!(ctx.pipeline.pending_count(&agent()), 0);
    assert_eq!(ctx.pipeline.flush_agent(&agent()).await, FlushOutcome::Empty);
}

#[tokio::test]
async fn backlog_with_retries_forces_flush() {
    let ctx = setup_with(EngineConfig::default().batch_size(3).backlog_limit(4));
    ctx.store.fail_message_writes(1);
    for id in ["M1", "M2", "M3"] {
        admit(&ctx, inbound(id, id)).await;
    }
    assert_eq!(ctx.pipeline.flush_agent(&agent()).await, FlushOutcome::Deferred { count: 3 });

    let next = admit(&ctx, inbound("M4", "d")).await;
    assert_eq!(next, Admission::Queued { flush_now: true, first: true });
}

#[tokio::test]
async fn failed_batch_is_retried_one_by_one() {
    let ctx = setup();
    for id in ["M1", "M2"] {
        admit(&ctx, inbound(id, id)).await;
    }
    ctx.store.fail_message_writes(1);
    assert_eq!(ctx.pipeline.flush_agent(&agent()).await, FlushOutcome::Deferred { count: 2 });
    assert_eq!(ctx.pipeline.retry_count(&agent()), 2);
    assert!(ctx.store.snapshot().list_messages(&agent()).is_empty());

    // One more injected failure: that record is dropped, the other survives
    ctx.store.fail_message_writes(1);
    assert_eq!(ctx.pipeline.retry_flush(&agent()).await, 1);
    assert_eq!(ctx.pipeline.retry_count(&agent()), 0);

    let stats = ctx.counters.snapshot();
    assert_eq!(stats.flush_failures, 1);
    assert_eq!(stats.retry_failures, 1);
    assert_eq!(ctx.store.snapshot().list_messages(&agent()).len(), 1);
}

#[tokio::test]
async fn deferred_backlog_sheds_oldest_past_limit() {
    let ctx = setup();
    ctx.store.fail_message_writes(2);
    for round in 0..2 {
        for n in 0..3 {
            let id = format!("M{round}{n}");
            admit(&ctx, inbound(&id, &id)).await;
        }
        ctx.pipeline.flush_agent(&agent()).await;
    }

    assert_eq!(ctx.pipeline.retry_count(&agent()), 5);
    assert_eq!(ctx.counters.snapshot().backlog_shed, 1);

    assert_eq!(ctx.pipeline.retry_flush(&agent()).await, 5);
    let stored = ctx.store.snapshot().list_messages(&agent());
    assert!(stored.iter().all(|m| m.native_id != "M00"));
    assert!(stored.iter().any(|m| m.native_id == "M12"));
}

#[tokio::test]
async fn drop_agent_reports_leftovers() {
    let ctx = setup();
    admit(&ctx, inbound("M1", "a")).await;
    assert_eq!(ctx.pipeline.drop_agent(&agent()), 1);
    assert_eq!(ctx.pipeline.pending_count(&agent()), 0);
}

// === Forwarding ===

#[tokio::test]
async fn forwarding_is_independent_of_storage() {
    let ctx = setup();
    admit(&ctx, inbound("M1", "a")).await;
    ctx.store.fail_message_writes(1);
    ctx.pipeline.flush_agent(&agent()).await;
    ctx.pipeline.drain_forwards().await;

    let delivered = ctx.notifier.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0]["type"], "message.received");
    assert_eq!(delivered[0]["agent_id"], "agent-1");
    assert_eq!(delivered[0]["message"]["native_id"], "M1");
}

#[tokio::test]
async fn forwarding_retries_then_succeeds() {
    let ctx = setup();
    ctx.notifier.fail_next(2);
    admit(&ctx, inbound("M1", "a")).await;
    ctx.pipeline.flush_agent(&agent()).await;
    ctx.pipeline.drain_forwards().await;

    assert_eq!(ctx.notifier.calls().len(), 3);
    assert_eq!(ctx.notifier.delivered().len(), 1);
    assert_eq!(ctx.counters.snapshot().forward_give_ups, 0);
}

#[tokio::test]
async fn forwarding_gives_up_after_attempts() {
    let ctx = setup();
    ctx.notifier.fail_next(10);
    admit(&ctx, inbound("M1", "a")).await;
    ctx.pipeline.flush_agent(&agent()).await;
    ctx.pipeline.drain_forwards().await;

    assert_eq!(ctx.notifier.calls().len(), 3);
    assert!(ctx.notifier.delivered().is_empty());
    assert_eq!(ctx.counters.snapshot().forward_give_ups, 1);
    // Storage still holds the record
    assert_eq!(ctx.store.snapshot().list_messages(&agent()).len(), 1);
}

#[test]
fn fingerprint_separates_direction_and_kind() {
    let base = fingerprint(PEER, false, MessageKind::Text, Some("x"));
    assert_eq!(base, fingerprint(PEER, false, MessageKind::Text, Some("x")));
    assert_ne!(base, fingerprint(PEER, true, MessageKind::Text, Some("x")));
    assert_ne!(base, fingerprint(PEER, false, MessageKind::Image, Some("x")));
    assert_ne!(base, fingerprint(PEER, false, MessageKind::Text, Some("y")));
}
