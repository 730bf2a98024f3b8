// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process bookkeeping for the agents this instance drives.
//!
//! Every agent gets a [`Slot`] behind an async mutex; holding it serializes
//! all transitions for that agent. Retired slots remember the last
//! generation so a re-initialized agent never reuses one.

use crate::machine::AgentMachine;
use parking_lot::Mutex;
use sb_adapters::Session;
use sb_core::{AgentId, AgentSession, AgentStatus};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct Slot {
    machine: Option<AgentMachine>,
    last_generation: u64,
}

impl Slot {
    pub fn machine(&self) -> Option<&AgentMachine> {
        self.machine.as_ref()
    }

    /// Current generation, live or retired.
    pub fn generation(&self) -> u64 {
        self.machine.as_ref().map_or(self.last_generation, |m| m.generation)
    }

    /// The live machine, or a fresh one seeded from the durable record.
    pub fn machine_or_seed(&mut self, session: &AgentSession) -> &AgentMachine {
        let generation = self.last_generation;
        self.machine.get_or_insert_with(|| AgentMachine::from_session(session, generation))
    }

    pub fn replace(&mut self, machine: AgentMachine) {
        self.last_generation = self.last_generation.max(machine.generation);
        self.machine = Some(machine);
    }

    /// Drop the machine but keep its generation.
    pub fn retire(&mut self) {
        if let Some(machine) = self.machine.take() {
            self.last_generation = self.last_generation.max(machine.generation);
        }
    }
}

#[derive(Default)]
pub struct Registry {
    slots: Mutex<HashMap<AgentId, Arc<tokio::sync::Mutex<Slot>>>>,
    sessions: Mutex<HashMap<AgentId, Arc<dyn Session>>>,
    tracked: Mutex<BTreeMap<AgentId, AgentStatus>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(&self, agent: &AgentId) -> Arc<tokio::sync::Mutex<Slot>> {
        Arc::clone(self.slots.lock().entry(agent.clone()).or_default())
    }

    pub fn remove_slot(&self, agent: &AgentId) {
        self.slots.lock().remove(agent);
        self.tracked.lock().remove(agent);
    }

    /// Install the live session, returning whatever it replaced.
    pub fn insert_session(
        &self,
        agent: &AgentId,
        session: Arc<dyn Session>,
    ) -> Option<Arc<dyn Session>> {
        self.sessions.lock().insert(agent.clone(), session)
    }

    pub fn take_session(&self, agent: &AgentId) -> Option<Arc<dyn Session>> {
        self.sessions.lock().remove(agent)
    }

    pub fn session(&self, agent: &AgentId) -> Option<Arc<dyn Session>> {
        self.sessions.lock().get(agent).cloned()
    }

    pub fn set_tracked(&self, agent: &AgentId, status: Option<AgentStatus>) {
        let mut tracked = self.tracked.lock();
        match status {
            Some(status) => {
                tracked.insert(agent.clone(), status);
            }
            None => {
                tracked.remove(agent);
            }
        }
    }

    pub fn is_tracked(&self, agent: &AgentId) -> bool {
        self.tracked.lock().contains_key(agent)
    }

    pub fn tracked_status(&self, agent: &AgentId) -> Option<AgentStatus> {
        self.tracked.lock().get(agent).copied()
    }

    pub fn tracked_ids(&self) -> Vec<AgentId> {
        self.tracked.lock().keys().cloned().collect()
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.lock().len()
    }

    pub fn tracked_by_status(&self) -> BTreeMap<AgentStatus, usize> {
        let mut counts = BTreeMap::new();
        for status in self.tracked.lock().values() {
            *counts.entry(*status).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
