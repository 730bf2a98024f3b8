// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn agent() -> AgentId {
    AgentId::new("agent-1")
}

#[test]
fn timers_fire_in_deadline_order() {
    let now = Instant::now();
    let mut scheduler = Scheduler::new();
    scheduler.set_timer(TimerId::heartbeat(&agent()), Duration::from_secs(10), now);
    scheduler.set_timer(TimerId::reconnect(&agent()), Duration::from_secs(2), now);

    assert!(scheduler.fired_timers(now + Duration::from_secs(1)).is_empty());
    let fired = scheduler.fired_timers(now + Duration::from_secs(11));
    assert_eq!(
        fired,
        vec![
            Event::TimerStart { id: TimerId::reconnect(&agent()) },
            Event::TimerStart { id: TimerId::heartbeat(&agent()) },
        ]
    );
    assert!(!scheduler.has_timers());
}

#[test]
fn setting_again_rearms() {
    let now = Instant::now();
    let mut scheduler = Scheduler::new();
    let id = TimerId::heartbeat(&agent());
    scheduler.set_timer(id.clone(), Duration::from_secs(1), now);
    scheduler.set_timer(id.clone(), Duration::from_secs(5), now);
    assert!(scheduler.fired_timers(now + Duration::from_secs(2)).is_empty());
    assert_eq!(scheduler.next_deadline(), Some(now + Duration::from_secs(5)));
}

#[test]
fn cancel_agent_timers_leaves_other_agents() {
    let now = Instant::now();
    let other = AgentId::new("agent-2");
    let mut scheduler = Scheduler::new();
    scheduler.set_timer(TimerId::heartbeat(&agent()), Duration::from_secs(1), now);
    scheduler.set_timer(TimerId::batch_flush(&agent()), Duration::from_secs(1), now);
    scheduler.set_timer(TimerId::heartbeat(&other), Duration::from_secs(1), now);

    assert_eq!(scheduler.agent_timer_count(&agent()), 2);
    assert_eq!(scheduler.cancel_agent_timers(&agent()), 2);
    assert_eq!(scheduler.timer_ids(), vec![TimerId::heartbeat(&other)]);
}

#[test]
fn cancel_missing_timer_is_false() {
    let mut scheduler = Scheduler::new();
    assert!(!scheduler.cancel_timer(&TimerId::reconnect(&agent())));
}
