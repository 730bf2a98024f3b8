// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operator calls: status, disconnect, delete, shutdown

use super::*;
use sb_adapters::TransportCall;

#[tokio::test]
async fn status_of_unknown_agent_is_not_found() {
    let ctx = setup().await;
    let result = ctx.runtime.get_status(&AgentId::new("ghost")).await;
    assert!(matches!(result, Err(RuntimeError::AgentNotFound(_))));
}

#[tokio::test]
async fn disconnect_keeps_credentials_and_releases_ownership() {
    let ctx = setup().await;
    ctx.pair().await;

    let report = ctx.runtime.disconnect(&agent()).await.unwrap();

    assert!(report.was_tracked);
    assert_eq!(report.status, AgentStatus::Disconnected);
    assert!(report.timers_cancelled >= 1);
    let session = ctx.session();
    assert_eq!(session.status, AgentStatus::Disconnected);
    assert!(session.credential.is_some());
    assert!(session.disconnected_at_ms.is_some());
    assert_eq!(session.owner, None);
    assert!(!ctx.runtime.is_tracked(&agent()));
    assert_eq!(ctx.runtime.scheduler.lock().agent_timer_count(&agent()), 0);
    assert!(!ctx.transport.calls().iter().any(|c| matches!(c, TransportCall::Logout { .. })));
    assert!(ctx.transport.session(AGENT).unwrap().is_closed());
}

#[tokio::test]
async fn disconnect_of_idle_agent_updates_record() {
    let ctx = setup().await;
    ctx.pair().await;
    ctx.transport.emit_terminated(AGENT, sb_core::Termination::default()).await;
    ctx.pump().await;
    assert_eq!(ctx.status().await, AgentStatus::Held);

    let report = ctx.runtime.disconnect(&agent()).await.unwrap();

    assert!(!report.was_tracked);
    assert_eq!(report.status, AgentStatus::Disconnected);
}

#[tokio::test]
async fn disconnect_of_unknown_agent_is_not_found() {
    let ctx = setup().await;
    let result = ctx.runtime.disconnect(&AgentId::new("ghost")).await;
    assert!(matches!(result, Err(RuntimeError::AgentNotFound(_))));
}

#[tokio::test]
async fn delete_logs_out_and_removes_record() {
    let ctx = setup().await;
    ctx.pair().await;

    assert!(ctx.runtime.delete(&agent()).await.unwrap());

    assert!(ctx.transport.calls().contains(&TransportCall::Logout { agent_id: agent() }));
    assert!(!ctx.store.snapshot().sessions.contains_key(&agent()));
    assert!(!ctx.runtime.is_tracked(&agent()));
    assert!(ctx.runtime.vault.load(&agent()).await.unwrap().is_none());
    assert!(!ctx.runtime.delete(&agent()).await.unwrap());
}

#[tokio::test]
async fn shutdown_releases_agents_but_keeps_status() {
    let ctx = setup().await;
    ctx.pair().await;

    let report = ctx.runtime.shutdown().await;

    assert_eq!(report.agents_released, 1);
    assert!(report.timers_cancelled >= 1);
    let session = ctx.session();
    assert_eq!(session.status, AgentStatus::Connected);
    assert_eq!(session.owner, None);
    assert!(session.credential.is_some());
    assert!(!ctx.store.snapshot().instances.contains_key(ctx.runtime.instance_id()));
    assert!(ctx.runtime.tracked_agents().is_empty());
}

#[tokio::test]
async fn heartbeat_records_assigned_agents() {
    let ctx = setup().await;
    ctx.pair().await;

    ctx.runtime.heartbeat().await.unwrap();

    let instances = ctx.store.snapshot().instances;
    let record = &instances[ctx.runtime.instance_id()];
    assert!(record.assigned.contains(&agent()));
}
