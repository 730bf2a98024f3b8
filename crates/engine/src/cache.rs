// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Multi-tier session cache.
//!
//! Three instance-local LRU tiers sit in front of the cluster-shared tier:
//!
//! - validation: phone identities known to exist (or not) on the network
//! - identity: linked-device identity to phone identity mappings
//! - credentials: decrypted credentials of locally owned agents
//!
//! The shared tier is an optimization. Its failures degrade to misses.

use crate::config::CacheConfig;
use indexmap::IndexMap;
use parking_lot::Mutex;
use sb_adapters::{ExistsResult, SharedCache};
use sb_core::{AgentId, Clock, Credential, SealedCredential};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped for capacity or expiry
    pub evictions: u64,
    pub size: usize,
    pub capacity: usize,
}

impl TierStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Bounded least-recently-used map with per-entry expiry.
#[derive(Debug)]
pub struct LruTier<V> {
    ttl: Duration,
    capacity: usize,
    entries: IndexMap<String, (V, Instant)>,
    stats: TierStats,
}

impl<V: Clone> LruTier<V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            entries: IndexMap::new(),
            stats: TierStats::default(),
        }
    }

    pub fn get(&mut self, key: &str, now: Instant) -> Option<V> {
        let Some(index) = self.entries.get_index_of(key) else {
            self.stats.misses += 1;
            return None;
        };
        let expired = self.entries.get_index(index).is_some_and(|(_, (_, exp))| *exp <= now);
        if expired {
            self.entries.shift_remove_index(index);
            self.stats.evictions += 1;
            self.stats.misses += 1;
            return None;
        }
        let last = self.entries.len() - 1;
        self.entries.move_index(index, last);
        self.stats.hits += 1;
        self.entries.get_index(last).map(|(_, (value, _))| value.clone())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: V, now: Instant) {
        let ttl = self.ttl;
        self.insert_with_ttl(key, value, ttl, now);
    }

    pub fn insert_with_ttl(
        &mut self,
        key: impl Into<String>,
        value: V,
        ttl: Duration,
        now: Instant,
    ) {
        let key = key.into();
        self.entries.shift_remove(&key);
        while self.entries.len() >= self.capacity {
            if self.entries.shift_remove_index(0).is_none() {
                break;
            }
            self.stats.evictions += 1;
        }
        self.entries.insert(key, (value, now + ttl));
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.entries.shift_remove(key).map(|(value, _)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> TierStats {
        TierStats { size: self.entries.len(), capacity: self.capacity, ..self.stats }
    }
}

/// Lookups that fell through a local tier to the shared tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SharedStats {
    pub hits: u64,
    pub misses: u64,
    /// Reads that failed or timed out, also counted as misses
    pub errors: u64,
}

impl SharedStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct SharedCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl SharedCounters {
    fn snapshot(&self) -> SharedStats {
        SharedStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Local tier stats count a lookup the shared tier served as a local miss;
/// `shared` records how those fall-through lookups resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub validation: TierStats,
    pub identity: TierStats,
    pub credentials: TierStats,
    pub shared: SharedStats,
}

pub struct SessionCache<C: Clock> {
    validation: Mutex<LruTier<ExistsResult>>,
    identity: Mutex<LruTier<String>>,
    credentials: Mutex<LruTier<Credential>>,
    shared: Arc<dyn SharedCache>,
    shared_stats: SharedCounters,
    shared_ttl: Duration,
    op_timeout: Duration,
    clock: C,
}

impl<C: Clock> SessionCache<C> {
    pub fn new(
        config: &CacheConfig,
        shared: Arc<dyn SharedCache>,
        op_timeout: Duration,
        clock: C,
    ) -> Self {
        Self {
            validation: Mutex::new(LruTier::new(config.validation_capacity, config.validation_ttl)),
            identity: Mutex::new(LruTier::new(config.identity_capacity, config.identity_ttl)),
            credentials: Mutex::new(LruTier::new(
                config.credential_capacity,
                config.credential_ttl,
            )),
            shared,
            shared_stats: SharedCounters::default(),
            shared_ttl: config.shared_ttl,
            op_timeout,
            clock,
        }
    }

    // === Validation tier ===

    pub async fn get_validation(&self, phone_jid: &str) -> Option<ExistsResult> {
        if let Some(hit) = self.validation.lock().get(phone_jid, self.clock.now()) {
            return Some(hit);
        }
        let raw = self.shared_get(&validation_key(phone_jid)).await?;
        let result: ExistsResult = serde_json::from_str(&raw).ok()?;
        self.validation.lock().insert(phone_jid, result.clone(), self.clock.now());
        Some(result)
    }

    pub async fn put_validation(&self, phone_jid: &str, result: &ExistsResult) {
        self.validation.lock().insert(phone_jid, result.clone(), self.clock.now());
        if let Ok(raw) = serde_json::to_string(result) {
            self.shared_set(&validation_key(phone_jid), raw).await;
        }
    }

    // === Identity tier ===

    pub async fn get_identity(&self, linked_jid: &str) -> Option<String> {
        if let Some(hit) = self.identity.lock().get(linked_jid, self.clock.now()) {
            return Some(hit);
        }
        let phone = self.shared_get(&identity_key(linked_jid)).await?;
        self.identity.lock().insert(linked_jid, phone.clone(), self.clock.now());
        Some(phone)
    }

    pub async fn put_identity(&self, linked_jid: &str, phone_jid: &str) {
        self.identity.lock().insert(linked_jid, phone_jid.to_string(), self.clock.now());
        self.shared_set(&identity_key(linked_jid), phone_jid.to_string()).await;
    }

    // === Credentials tier ===

    pub fn local_credential(&self, agent: &AgentId) -> Option<Credential> {
        self.credentials.lock().get(agent.as_str(), self.clock.now())
    }

    /// Sealed credential from the shared tier. Plaintext never leaves the
    /// instance.
    pub async fn shared_credential(&self, agent: &AgentId) -> Option<SealedCredential> {
        let raw = self.shared_get(&credential_key(agent)).await?;
        serde_json::from_str(&raw).ok()
    }

    pub fn promote_credential(&self, agent: &AgentId, credential: &Credential) {
        self.credentials.lock().insert(agent.as_str(), credential.clone(), self.clock.now());
    }

    pub async fn put_credential(
        &self,
        agent: &AgentId,
        credential: &Credential,
        sealed: &SealedCredential,
    ) {
        self.promote_credential(agent, credential);
        if let Ok(raw) = serde_json::to_string(sealed) {
            self.shared_set(&credential_key(agent), raw).await;
        }
    }

    pub async fn invalidate_credential(&self, agent: &AgentId) {
        self.credentials.lock().remove(agent.as_str());
        let key = credential_key(agent);
        match tokio::time::timeout(self.op_timeout, self.shared.delete(&key)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(key = %key, error = %e, "shared cache delete failed"),
            Err(_) => tracing::warn!(key = %key, "shared cache delete timed out"),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            validation: self.validation.lock().stats(),
            identity: self.identity.lock().stats(),
            credentials: self.credentials.lock().stats(),
            shared: self.shared_stats.snapshot(),
        }
    }

    async fn shared_get(&self, key: &str) -> Option<String> {
        let value = match tokio::time::timeout(self.op_timeout, self.shared.get(key)).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                tracing::warn!(key, error = %e, "shared cache read failed");
                self.shared_stats.errors.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(_) => {
                tracing::warn!(key, "shared cache read timed out");
                self.shared_stats.errors.fetch_add(1, Ordering::Relaxed);
                None
            }
        };
        let counter = match value {
            Some(_) => &self.shared_stats.hits,
            None => &self.shared_stats.misses,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        value
    }

    async fn shared_set(&self, key: &str, value: String) {
        match tokio::time::timeout(self.op_timeout, self.shared.set(key, value, self.shared_ttl))
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(key, error = %e, "shared cache write failed"),
            Err(_) => tracing::warn!(key, "shared cache write timed out"),
        }
    }
}

fn validation_key(phone_jid: &str) -> String {
    format!("validation:{phone_jid}")
}

fn identity_key(linked_jid: &str) -> String {
    format!("identity:{linked_jid}")
}

fn credential_key(agent: &AgentId) -> String {
    format!("credential:{agent}")
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
