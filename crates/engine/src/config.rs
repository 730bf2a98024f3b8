// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Orchestrator tuning knobs.

use crate::backoff::BackoffPolicy;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sb_core::credential::KEY_LEN;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error(
        "liveness timeout ({timeout_ms}ms) must be at least twice \
         the heartbeat interval ({interval_ms}ms)"
    )]
    LivenessTooShort { interval_ms: u64, timeout_ms: u64 },
    #[error("backoff base ({base_ms}ms) exceeds backoff max ({max_ms}ms)")]
    BackoffInverted { base_ms: u64, max_ms: u64 },
    #[error("backlog limit ({backlog}) is smaller than the batch size ({batch})")]
    BacklogTooSmall { batch: usize, backlog: usize },
    #[error("master key must be 32 base64-encoded bytes: {0}")]
    MasterKey(String),
}

/// Size and lifetime of the instance-local cache tiers.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    pub validation_capacity: usize,
    pub validation_ttl: Duration,
    pub identity_capacity: usize,
    pub identity_ttl: Duration,
    pub credential_capacity: usize,
    pub credential_ttl: Duration,
    /// Lifetime of entries written to the shared tier
    pub shared_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            validation_capacity: 10_000,
            validation_ttl: Duration::from_secs(60 * 60),
            identity_capacity: 10_000,
            identity_ttl: Duration::from_secs(24 * 60 * 60),
            credential_capacity: 500,
            credential_ttl: Duration::from_secs(30 * 60),
            shared_ttl: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    // Fleet
    pub capacity: usize,
    pub heartbeat_interval: Duration,
    pub liveness_timeout: Duration,
    pub orphan_scan_interval: Duration,
    pub startup_concurrency: usize,
    pub startup_stagger: Duration,
    pub init_lock_ttl: Duration,

    // Connection
    pub relink_ttl: Duration,
    pub pairing_restart_window: Duration,
    pub freshness_window: Duration,
    pub connect_timeout: Duration,
    /// Bound on every single store, cache, and transport request
    pub op_timeout: Duration,
    pub max_concurrent_connects: usize,
    pub backoff: BackoffPolicy,

    // Inbound pipeline
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub backlog_limit: usize,
    pub flush_retry_delay: Duration,
    pub fingerprint_window: Duration,
    pub echo_window: Duration,
    pub forward_attempts: u32,
    pub forward_base_delay: Duration,

    pub cache: CacheConfig,

    /// Base64 of the 32-byte credential sealing key
    pub master_key: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            capacity: 200,
            heartbeat_interval: Duration::from_secs(10),
            liveness_timeout: Duration::from_secs(30),
            orphan_scan_interval: Duration::from_secs(30),
            startup_concurrency: 4,
            startup_stagger: Duration::from_millis(500),
            init_lock_ttl: Duration::from_secs(30),
            relink_ttl: Duration::from_secs(60),
            pairing_restart_window: Duration::from_secs(30),
            freshness_window: Duration::from_secs(24 * 60 * 60),
            connect_timeout: Duration::from_secs(20),
            op_timeout: Duration::from_secs(5),
            max_concurrent_connects: 8,
            backoff: BackoffPolicy::default(),
            batch_size: 20,
            flush_interval: Duration::from_secs(2),
            backlog_limit: 100,
            flush_retry_delay: Duration::from_secs(10),
            fingerprint_window: Duration::from_secs(10),
            echo_window: Duration::from_secs(30),
            forward_attempts: 3,
            forward_base_delay: Duration::from_millis(500),
            cache: CacheConfig::default(),
            master_key: String::new(),
        }
    }
}

impl EngineConfig {
    sb_core::setters! {
        into {
            master_key: String,
        }
        set {
            capacity: usize,
            heartbeat_interval: Duration,
            liveness_timeout: Duration,
            orphan_scan_interval: Duration,
            startup_concurrency: usize,
            startup_stagger: Duration,
            init_lock_ttl: Duration,
            relink_ttl: Duration,
            pairing_restart_window: Duration,
            freshness_window: Duration,
            connect_timeout: Duration,
            op_timeout: Duration,
            max_concurrent_connects: usize,
            backoff: BackoffPolicy,
            batch_size: usize,
            flush_interval: Duration,
            backlog_limit: usize,
            flush_retry_delay: Duration,
            fingerprint_window: Duration,
            echo_window: Duration,
            forward_attempts: u32,
            forward_base_delay: Duration,
            cache: CacheConfig,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("capacity", self.capacity),
            ("startup_concurrency", self.startup_concurrency),
            ("max_concurrent_connects", self.max_concurrent_connects),
            ("batch_size", self.batch_size),
            ("forward_attempts", self.forward_attempts as usize),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero { field });
            }
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::Zero { field: "heartbeat_interval" });
        }
        if self.liveness_timeout < self.heartbeat_interval * 2 {
            return Err(ConfigError::LivenessTooShort {
                interval_ms: self.heartbeat_interval.as_millis() as u64,
                timeout_ms: self.liveness_timeout.as_millis() as u64,
            });
        }
        if self.backoff.base > self.backoff.max {
            return Err(ConfigError::BackoffInverted {
                base_ms: self.backoff.base.as_millis() as u64,
                max_ms: self.backoff.max.as_millis() as u64,
            });
        }
        if self.backlog_limit < self.batch_size {
            return Err(ConfigError::BacklogTooSmall {
                batch: self.batch_size,
                backlog: self.backlog_limit,
            });
        }
        self.key_bytes()?;
        Ok(())
    }

    /// Decode the sealing key.
    pub fn key_bytes(&self) -> Result<[u8; KEY_LEN], ConfigError> {
        let bytes = BASE64
            .decode(self.master_key.trim())
            .map_err(|e| ConfigError::MasterKey(e.to_string()))?;
        <[u8; KEY_LEN]>::try_from(bytes.as_slice())
            .map_err(|_| ConfigError::MasterKey(format!("got {} bytes", bytes.len())))
    }

    pub fn liveness_timeout_ms(&self) -> u64 {
        self.liveness_timeout.as_millis() as u64
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
