// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Initialization, pairing and credential restore

use super::*;
use sb_core::ConnectionState;

#[tokio::test]
async fn initialize_creates_record_and_starts_pairing() {
    let ctx = setup().await;

    let report = ctx.runtime.initialize(&agent()).await.unwrap();

    assert!(report.started);
    assert!(!report.already_running);
    assert_eq!(report.status, AgentStatus::Initializing);
    assert_eq!(ctx.transport.connects(AGENT), vec![(1, None)]);
    let session = ctx.session();
    assert_eq!(session.status, AgentStatus::Initializing);
    assert_eq!(session.owner_instance(), Some(ctx.runtime.instance_id()));
    assert!(ctx.runtime.is_tracked(&agent()));
}

#[tokio::test]
async fn initialize_twice_reports_already_running() {
    let ctx = setup().await;
    ctx.runtime.initialize(&agent()).await.unwrap();

    let report = ctx.runtime.initialize(&agent()).await.unwrap();

    assert!(report.already_running);
    assert!(!report.started);
    assert_eq!(ctx.transport.connects(AGENT).len(), 1);
}

#[tokio::test]
async fn qr_issues_visible_relink_challenge() {
    let ctx = setup().await;
    ctx.runtime.initialize(&agent()).await.unwrap();

    ctx.transport.emit_qr(AGENT, "qr-1").await;
    ctx.pump().await;

    let status = ctx.runtime.get_status(&agent()).await.unwrap();
    assert_eq!(status.status, AgentStatus::QrPending);
    let challenge = status.relink_challenge.unwrap();
    assert_eq!(challenge.payload, "qr-1");
    assert_eq!(challenge.expires_at_ms - challenge.issued_at_ms, 60_000);
    assert_eq!(ctx.runtime.counters().snapshot().relinks_issued, 1);
}

#[tokio::test]
async fn refreshed_qr_keeps_the_same_challenge() {
    let ctx = setup().await;
    ctx.runtime.initialize(&agent()).await.unwrap();
    ctx.transport.emit_qr(AGENT, "qr-1").await;
    ctx.pump().await;
    let first = ctx.session().relink.unwrap();

    ctx.clock.advance(Duration::from_secs(20));
    ctx.transport.emit_qr(AGENT, "qr-2").await;
    ctx.pump().await;

    let second = ctx.session().relink.unwrap();
    assert_eq!(second.token, first.token);
    assert_eq!(second.expires_at_ms, first.expires_at_ms);
    assert_eq!(second.payload, "qr-2");
    assert_eq!(ctx.runtime.counters().snapshot().relinks_issued, 1);
}

#[tokio::test]
async fn unscanned_challenge_expires_back_to_pending() {
    let ctx = setup().await;
    ctx.runtime.initialize(&agent()).await.unwrap();
    ctx.transport.emit_qr(AGENT, "qr-1").await;
    ctx.pump().await;

    ctx.advance(Duration::from_secs(61)).await;

    let status = ctx.runtime.get_status(&agent()).await.unwrap();
    assert_eq!(status.status, AgentStatus::Pending);
    assert!(status.relink_challenge.is_none());
    assert!(!ctx.runtime.is_tracked(&agent()));
    assert!(ctx.transport.session(AGENT).unwrap().is_closed());
    assert_eq!(ctx.session().owner, None);
}

#[tokio::test]
async fn completed_pairing_connects_and_hides_challenge() {
    let ctx = setup().await;
    ctx.pair().await;

    let status = ctx.runtime.get_status(&agent()).await.unwrap();
    assert!(status.connected);
    assert_eq!(status.phone_identity.as_deref(), Some(PHONE_JID));
    assert!(status.relink_challenge.is_none());
    let session = ctx.session();
    assert!(session.credential.is_some());
    assert!(session.paired_at_ms.is_some());
    assert!(session.connected_at_ms.is_some());
}

// Pairing completes, the transport immediately asks for a restart, and the
// agent comes back on the stored credential without a second challenge.
#[tokio::test]
async fn restart_after_pairing_restores_without_new_challenge() {
    let ctx = setup().await;
    ctx.runtime.initialize(&agent()).await.unwrap();
    ctx.transport.emit_qr(AGENT, "qr-1").await;
    ctx.pump().await;
    ctx.transport.emit_creds(AGENT, credential_value(true)).await;
    ctx.pump().await;

    ctx.clock.advance(Duration::from_secs(2));
    ctx.transport.emit_code(AGENT, DisconnectCode::RestartRequired).await;
    ctx.pump().await;
    assert_eq!(ctx.status().await, AgentStatus::Reconnecting);

    // Immediate reconnect fires on the next tick
    assert_eq!(ctx.runtime.tick_timers().await, 1);
    let connects = ctx.transport.connects(AGENT);
    assert_eq!(connects.len(), 2);
    let (generation, credential) = connects[1].clone();
    assert!(generation > connects[0].0);
    assert_eq!(credential.unwrap()["me"], PHONE_JID);

    ctx.transport.emit_opened(AGENT, Some(PHONE_JID)).await;
    ctx.pump().await;

    let status = ctx.runtime.get_status(&agent()).await.unwrap();
    assert_eq!(status.status, AgentStatus::Connected);
    assert_eq!(status.phone_identity.as_deref(), Some(PHONE_JID));
    assert_eq!(ctx.runtime.counters().snapshot().relinks_issued, 1);
    assert_eq!(ctx.runtime.counters().snapshot().conflicts, 0);
}

#[tokio::test]
async fn qr_after_pairing_is_ignored() {
    let ctx = setup().await;
    ctx.pair().await;

    ctx.transport.emit_qr(AGENT, "late").await;
    ctx.pump().await;

    assert_eq!(ctx.status().await, AgentStatus::Connected);
    assert!(ctx.session().relink.is_none());
}

#[tokio::test]
async fn initialize_after_disconnect_restores_stored_credential() {
    let ctx = setup().await;
    ctx.pair().await;
    ctx.runtime.disconnect(&agent()).await.unwrap();

    let report = ctx.runtime.initialize(&agent()).await.unwrap();

    assert_eq!(report.status, AgentStatus::Connecting);
    let (_, credential) = ctx.transport.connects(AGENT).last().cloned().unwrap();
    assert!(credential.is_some());
}

#[tokio::test]
async fn stale_credential_is_discarded_and_pairing_restarts() {
    let ctx = setup().await;
    ctx.pair().await;
    ctx.runtime.disconnect(&agent()).await.unwrap();

    ctx.clock.advance(ctx.runtime.config().freshness_window + Duration::from_secs(1));
    let report = ctx.runtime.initialize(&agent()).await.unwrap();

    assert_eq!(report.status, AgentStatus::Initializing);
    assert_eq!(ctx.transport.connects(AGENT).last().cloned().unwrap().1, None);
    assert!(ctx.session().credential.is_none());
}

#[tokio::test]
async fn restore_with_missing_credential_falls_back_to_pairing() {
    let ctx = setup().await;
    ctx.pair().await;
    ctx.runtime.disconnect(&agent()).await.unwrap();
    // The record loses its credential behind the vault's back
    let mut session = ctx.session();
    session.credential = None;
    ctx.store.put_session(session);
    ctx.runtime.cache.invalidate_credential(&agent()).await;

    let report = ctx.runtime.initialize(&agent()).await.unwrap();

    assert_eq!(report.status, AgentStatus::Initializing);
    assert_eq!(ctx.transport.connects(AGENT).last().cloned().unwrap().1, None);
}

#[tokio::test]
async fn stale_session_events_are_dropped() {
    let ctx = setup().await;
    ctx.runtime.initialize(&agent()).await.unwrap();

    ctx.runtime
        .handle_event(sb_core::test_support::opened_event(AGENT, 99, Some(PHONE_JID)))
        .await
        .unwrap();

    assert_eq!(ctx.status().await, AgentStatus::Initializing);
    assert_eq!(ctx.runtime.counters().snapshot().stale_events, 1);
}

#[tokio::test]
async fn events_for_untracked_agents_are_dropped() {
    let ctx = setup().await;
    ctx.runtime
        .handle_event(sb_core::test_support::qr_event("nobody", 1, "qr"))
        .await
        .unwrap();
    assert_eq!(ctx.runtime.counters().snapshot().stale_events, 1);
}

#[tokio::test]
async fn failed_connect_during_pairing_returns_to_pending() {
    let ctx = setup().await;
    ctx.transport.fail_next_connect(1);

    let report = ctx.runtime.initialize(&agent()).await.unwrap();

    assert_eq!(report.status, AgentStatus::Pending);
    let session = ctx.session();
    assert_eq!(session.status, AgentStatus::Pending);
    assert!(session.failure.is_some());
    assert_eq!(session.owner, None);
    let registry = &ctx.runtime.registry;
    let slot = registry.slot(&agent());
    assert!(slot.lock().await.machine().is_none());
}

#[tokio::test]
async fn tracked_machine_reflects_connection_state() {
    let ctx = setup().await;
    ctx.pair().await;
    let slot = ctx.runtime.registry.slot(&agent());
    let slot = slot.lock().await;
    assert_eq!(slot.machine().map(|m| m.state), Some(ConnectionState::Connected));
}
