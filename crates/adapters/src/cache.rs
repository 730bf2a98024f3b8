// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster-shared cache tier.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors from shared cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Key-value cache with per-entry TTL, shared by every instance.
#[async_trait]
pub trait SharedCache: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// In-process shared tier, used when no external cache is deployed.
///
/// Clones share entries, so several orchestrators in one process see one tier.
#[derive(Clone, Default)]
pub struct MemorySharedCache {
    entries: Arc<Mutex<HashMap<String, (String, Instant)>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemorySharedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().values().filter(|(_, expires)| *expires > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Simulate an outage of the shared tier.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("shared cache offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SharedCache for MemorySharedCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check()?;
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.check()?;
        self.entries.lock().insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.check()?;
        self.entries.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
