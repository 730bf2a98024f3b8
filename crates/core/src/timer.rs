// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timer identifiers for per-agent scheduled work.
//!
//! Every timer belongs to exactly one agent, so tearing an agent down can
//! cancel all of them by enumerating [`TimerId::all_for`].

use crate::session::AgentId;

crate::define_id! {
    /// Unique identifier for a scheduled timer.
    pub struct TimerId;
}

impl TimerId {
    pub fn reconnect(agent: &AgentId) -> Self {
        TimerKind::Reconnect(agent.clone()).to_timer_id()
    }

    pub fn heartbeat(agent: &AgentId) -> Self {
        TimerKind::Heartbeat(agent.clone()).to_timer_id()
    }

    pub fn batch_flush(agent: &AgentId) -> Self {
        TimerKind::BatchFlush(agent.clone()).to_timer_id()
    }

    pub fn flush_retry(agent: &AgentId) -> Self {
        TimerKind::FlushRetry(agent.clone()).to_timer_id()
    }

    pub fn relink_expiry(agent: &AgentId) -> Self {
        TimerKind::RelinkExpiry(agent.clone()).to_timer_id()
    }

    /// Every timer an agent can own.
    pub fn all_for(agent: &AgentId) -> [TimerId; 5] {
        [
            Self::reconnect(agent),
            Self::heartbeat(agent),
            Self::batch_flush(agent),
            Self::flush_retry(agent),
            Self::relink_expiry(agent),
        ]
    }

    pub fn kind(&self) -> Option<TimerKind> {
        TimerKind::parse(self.as_str())
    }

    pub fn agent_id(&self) -> Option<AgentId> {
        self.kind().map(|k| k.agent_id().clone())
    }
}

/// Parsed representation of a timer ID for routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerKind {
    Reconnect(AgentId),
    Heartbeat(AgentId),
    BatchFlush(AgentId),
    FlushRetry(AgentId),
    RelinkExpiry(AgentId),
}

impl TimerKind {
    /// Returns `None` for unrecognized formats or an empty agent segment.
    pub fn parse(id: &str) -> Option<TimerKind> {
        let (prefix, agent) = id.split_once(':')?;
        if agent.is_empty() {
            return None;
        }
        let agent = AgentId::new(agent);
        match prefix {
            "reconnect" => Some(TimerKind::Reconnect(agent)),
            "heartbeat" => Some(TimerKind::Heartbeat(agent)),
            "batch-flush" => Some(TimerKind::BatchFlush(agent)),
            "flush-retry" => Some(TimerKind::FlushRetry(agent)),
            "relink-expiry" => Some(TimerKind::RelinkExpiry(agent)),
            _ => None,
        }
    }

    pub fn to_timer_id(&self) -> TimerId {
        TimerId::new(format!("{}:{}", self.prefix(), self.agent_id()))
    }

    pub fn agent_id(&self) -> &AgentId {
        match self {
            TimerKind::Reconnect(a)
            | TimerKind::Heartbeat(a)
            | TimerKind::BatchFlush(a)
            | TimerKind::FlushRetry(a)
            | TimerKind::RelinkExpiry(a) => a,
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            TimerKind::Reconnect(_) => "reconnect",
            TimerKind::Heartbeat(_) => "heartbeat",
            TimerKind::BatchFlush(_) => "batch-flush",
            TimerKind::FlushRetry(_) => "flush-retry",
            TimerKind::RelinkExpiry(_) => "relink-expiry",
        }
    }
}

#[cfg(test)]
#[path = "timer_tests.rs"]
mod tests;
