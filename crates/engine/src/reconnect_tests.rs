// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn policy(max_attempts: u32) -> BackoffPolicy {
    BackoffPolicy {
        base: Duration::from_secs(1),
        max: Duration::from_secs(8),
        max_attempts,
        max_jitter: Duration::ZERO,
    }
}

#[test]
fn backoff_attempts_escalate() {
    let agent = AgentId::new("agent-1");
    let mut scheduler = ReconnectScheduler::new(policy(10));
    let delays: Vec<Duration> = (0..5)
        .map(|_| match scheduler.schedule(&agent, RetryMode::Backoff) {
            ReconnectDecision::Retry { delay, .. } => delay,
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert_eq!(
        delays,
        [1, 2, 4, 8, 8].map(Duration::from_secs).to_vec(),
    );
    assert_eq!(scheduler.attempts(&agent), 5);
}

#[test]
fn immediate_retries_do_not_count() {
    let agent = AgentId::new("agent-1");
    let mut scheduler = ReconnectScheduler::new(policy(10));
    assert_eq!(
        scheduler.schedule(&agent, RetryMode::Immediate),
        ReconnectDecision::Retry { delay: Duration::ZERO, attempt: 0 }
    );
    assert_eq!(scheduler.attempts(&agent), 0);
    assert_eq!(scheduler.len(), 1);
}

#[test]
fn ceiling_exhausts_and_forgets() {
    let agent = AgentId::new("agent-1");
    let mut scheduler = ReconnectScheduler::new(policy(2));
    scheduler.schedule(&agent, RetryMode::Backoff);
    scheduler.schedule(&agent, RetryMode::Backoff);
    assert_eq!(
        scheduler.schedule(&agent, RetryMode::Backoff),
        ReconnectDecision::Exhausted { attempts: 2 }
    );
    assert!(scheduler.pending(&agent).is_none());
}

#[test]
fn cancel_resets_counter() {
    let agent = AgentId::new("agent-1");
    let mut scheduler = ReconnectScheduler::new(policy(10));
    scheduler.schedule(&agent, RetryMode::Backoff);
    scheduler.schedule(&agent, RetryMode::Backoff);
    assert_eq!(scheduler.cancel(&agent).map(|a| a.attempt_count), Some(2));
    assert_eq!(
        scheduler.schedule(&agent, RetryMode::Backoff),
        ReconnectDecision::Retry { delay: Duration::from_secs(1), attempt: 1 }
    );
}

#[test]
fn agents_are_independent() {
    let a = AgentId::new("a");
    let b = AgentId::new("b");
    let mut scheduler = ReconnectScheduler::new(policy(10));
    scheduler.schedule(&a, RetryMode::Backoff);
    scheduler.schedule(&a, RetryMode::Backoff);
    scheduler.schedule(&b, RetryMode::Backoff);
    assert_eq!((scheduler.attempts(&a), scheduler.attempts(&b)), (2, 1));
}
