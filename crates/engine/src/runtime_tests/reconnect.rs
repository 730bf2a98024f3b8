// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminations, heartbeats and reconnection

use super::*;
use crate::backoff::BackoffPolicy;
use sb_core::{InstanceId, OwnerStamp, Termination, TimerId};
use yare::parameterized;

#[parameterized(
    logged_out = { DisconnectCode::LoggedOut },
    replaced = { DisconnectCode::ConnectionReplaced },
    forbidden = { DisconnectCode::Forbidden },
)]
#[test_macro(tokio::test)]
async fn conflict_wipes_credentials_and_requires_relink(code: DisconnectCode) {
    let ctx = setup().await;
    ctx.pair().await;

    ctx.transport.emit_code(AGENT, code).await;
    ctx.pump().await;

    let status = ctx.runtime.get_status(&agent()).await.unwrap();
    assert_eq!(status.status, AgentStatus::Conflict);
    assert!(status.requires_relink);
    assert!(status.failure.is_some());
    let session = ctx.session();
    assert!(session.credential.is_none());
    assert_eq!(session.owner, None);
    assert!(!ctx.runtime.is_tracked(&agent()));
    assert!(!ctx.runtime.scheduler.lock().has_timer(&TimerId::reconnect(&agent())));
    assert_eq!(ctx.runtime.counters().snapshot().conflicts, 1);
}

#[tokio::test]
async fn logged_out_agent_pairs_from_scratch_on_next_initialize() {
    let ctx = setup().await;
    ctx.pair().await;
    ctx.transport.emit_code(AGENT, DisconnectCode::LoggedOut).await;
    ctx.pump().await;

    let report = ctx.runtime.initialize(&agent()).await.unwrap();
    assert_eq!(report.status, AgentStatus::Initializing);
    assert_eq!(ctx.transport.connects(AGENT).last().cloned().unwrap().1, None);

    ctx.transport.emit_qr(AGENT, "qr-again").await;
    ctx.pump().await;

    let status = ctx.runtime.get_status(&agent()).await.unwrap();
    assert_eq!(status.status, AgentStatus::QrPending);
    assert_eq!(status.relink_challenge.map(|c| c.payload).as_deref(), Some("qr-again"));
    assert!(!status.requires_relink);
}

#[tokio::test]
async fn transient_close_reconnects_with_backoff() {
    let ctx = setup().await;
    ctx.pair().await;
    ctx.clock.advance(Duration::from_secs(120));

    ctx.transport.emit_code(AGENT, DisconnectCode::ConnectionClosed).await;
    ctx.pump().await;

    let status = ctx.runtime.get_status(&agent()).await.unwrap();
    assert_eq!(status.status, AgentStatus::Reconnecting);
    assert_eq!(status.reconnect_attempts, 1);
    assert!(ctx.session().credential.is_some());

    // Nothing fires before the base delay
    assert_eq!(ctx.advance(Duration::from_millis(500)).await, 0);
    assert_eq!(ctx.transport.connects(AGENT).len(), 1);

    let policy = &ctx.runtime.config().backoff;
    ctx.advance(policy.base + policy.max_jitter).await;
    assert_eq!(ctx.transport.connects(AGENT).len(), 2);
    assert_eq!(ctx.status().await, AgentStatus::Connecting);

    ctx.transport.emit_opened(AGENT, Some(PHONE_JID)).await;
    ctx.pump().await;
    let status = ctx.runtime.get_status(&agent()).await.unwrap();
    assert_eq!(status.status, AgentStatus::Connected);
    assert_eq!(status.reconnect_attempts, 0);
}

#[tokio::test]
async fn unstructured_close_holds_the_agent() {
    let ctx = setup().await;
    ctx.pair().await;

    ctx.transport.emit_terminated(AGENT, Termination::default()).await;
    ctx.pump().await;

    assert_eq!(ctx.status().await, AgentStatus::Held);
    assert!(ctx.session().credential.is_some());
    assert_eq!(ctx.session().owner, None);
    assert!(!ctx.runtime.is_tracked(&agent()));
    assert_eq!(ctx.runtime.counters().snapshot().holds, 1);
}

#[tokio::test]
async fn reconnect_ceiling_marks_agent_failed() {
    let policy = BackoffPolicy {
        base: Duration::from_millis(100),
        max: Duration::from_millis(100),
        max_attempts: 2,
        max_jitter: Duration::ZERO,
    };
    let ctx = setup_with(test_config().backoff(policy)).await;
    ctx.pair().await;
    ctx.clock.advance(Duration::from_secs(120));
    ctx.transport.emit_code(AGENT, DisconnectCode::ConnectionClosed).await;
    ctx.pump().await;

    // Every reconnect attempt fails at the transport
    ctx.transport.fail_next_connect(10);
    for _ in 0..3 {
        ctx.advance(Duration::from_millis(100)).await;
    }

    let status = ctx.runtime.get_status(&agent()).await.unwrap();
    assert_eq!(status.status, AgentStatus::Failed);
    assert!(!ctx.runtime.is_tracked(&agent()));
    assert_eq!(ctx.session().owner, None);
    assert!(ctx.session().credential.is_some());
    assert_eq!(ctx.runtime.counters().snapshot().exhausted, 1);
}

#[tokio::test]
async fn heartbeat_refreshes_live_session() {
    let ctx = setup().await;
    ctx.pair().await;
    let before = ctx.session().heartbeat_at_ms.unwrap();

    ctx.advance(ctx.runtime.config().heartbeat_interval).await;

    assert_eq!(ctx.status().await, AgentStatus::Connected);
    assert!(ctx.session().heartbeat_at_ms.unwrap() > before);
    assert!(ctx.runtime.scheduler.lock().has_timer(&TimerId::heartbeat(&agent())));
}

#[tokio::test]
async fn silent_connection_loss_is_detected_by_heartbeat() {
    let ctx = setup().await;
    ctx.pair().await;
    ctx.clock.advance(Duration::from_secs(120));

    ctx.transport.session(AGENT).unwrap().drop_connection();
    ctx.advance(ctx.runtime.config().heartbeat_interval).await;

    assert_eq!(ctx.status().await, AgentStatus::Reconnecting);
    assert!(ctx.runtime.scheduler.lock().has_timer(&TimerId::reconnect(&agent())));
}

#[tokio::test]
async fn reconnect_abandoned_when_ownership_moved() {
    let ctx = setup().await;
    ctx.pair().await;
    ctx.clock.advance(Duration::from_secs(120));
    ctx.transport.emit_code(AGENT, DisconnectCode::ConnectionClosed).await;
    ctx.pump().await;

    let mut session = ctx.session();
    session.owner = Some(OwnerStamp {
        instance_id: InstanceId::new("peer"),
        host: "host-b".to_string(),
        process_id: 200,
        claimed_at_ms: ctx.clock.epoch_ms(),
    });
    ctx.store.put_session(session);

    ctx.advance(Duration::from_secs(120)).await;

    assert_eq!(ctx.transport.connects(AGENT).len(), 1);
    assert!(!ctx.runtime.is_tracked(&agent()));
    assert_eq!(ctx.session().owner_instance(), Some(&InstanceId::new("peer")));
}

#[tokio::test]
async fn late_events_from_replaced_session_are_stale() {
    let ctx = setup().await;
    ctx.pair().await;
    ctx.clock.advance(Duration::from_secs(120));
    ctx.transport.emit_code(AGENT, DisconnectCode::ConnectionClosed).await;
    ctx.pump().await;
    ctx.advance(Duration::from_secs(120)).await;
    let old_generation = ctx.transport.connects(AGENT)[0].0;

    ctx.runtime
        .handle_event(sb_core::test_support::terminated_event(
            AGENT,
            old_generation,
            DisconnectCode::LoggedOut,
        ))
        .await
        .unwrap();

    assert_eq!(ctx.status().await, AgentStatus::Connecting);
    assert!(ctx.session().credential.is_some());
}
