// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process timer wheel.
//!
//! Timers are keyed by [`TimerId`], so setting an existing timer re-arms it.
//! Firing produces [`Event::TimerStart`] events for the runtime.

use sb_core::{AgentId, Event, TimerId};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct Scheduler {
    timers: HashMap<TimerId, Instant>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_timer(&mut self, id: TimerId, duration: Duration, now: Instant) {
        self.timers.insert(id, now + duration);
    }

    /// Set the timer unless it is already pending, keeping the earlier
    /// deadline. Returns whether it was armed.
    pub fn arm_timer(&mut self, id: TimerId, duration: Duration, now: Instant) -> bool {
        if self.timers.contains_key(&id) {
            return false;
        }
        self.timers.insert(id, now + duration);
        true
    }

    /// Returns whether a timer was pending.
    pub fn cancel_timer(&mut self, id: &TimerId) -> bool {
        self.timers.remove(id).is_some()
    }

    /// Cancel every timer belonging to an agent. Returns how many were pending.
    pub fn cancel_agent_timers(&mut self, agent: &AgentId) -> usize {
        TimerId::all_for(agent).iter().filter(|id| self.cancel_timer(id)).count()
    }

    pub fn agent_timer_count(&self, agent: &AgentId) -> usize {
        TimerId::all_for(agent).iter().filter(|id| self.timers.contains_key(*id)).count()
    }

    /// Remove and return due timers, earliest first.
    pub fn fired_timers(&mut self, now: Instant) -> Vec<Event> {
        let mut due: Vec<(Instant, TimerId)> = self
            .timers
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, deadline)| (*deadline, id.clone()))
            .collect();
        due.sort();
        due.into_iter()
            .map(|(_, id)| {
                self.timers.remove(&id);
                Event::TimerStart { id }
            })
            .collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.values().min().copied()
    }

    pub fn has_timer(&self, id: &TimerId) -> bool {
        self.timers.contains_key(id)
    }

    pub fn has_timers(&self) -> bool {
        !self.timers.is_empty()
    }

    pub fn timer_ids(&self) -> Vec<TimerId> {
        let mut ids: Vec<TimerId> = self.timers.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
