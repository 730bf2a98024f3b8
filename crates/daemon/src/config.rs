// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration: an optional TOML file overridden by environment
//! variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sb_engine::EngineConfig;
use serde::Deserialize;

use crate::env;
use crate::lifecycle::LifecycleError;

const DEFAULT_TRANSPORT_URL: &str = "ws://127.0.0.1:7400";
const CONFIG_FILE: &str = "switchboard.toml";

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root state directory (e.g. ~/.local/state/switchboard)
    pub state_dir: PathBuf,
    /// Path to lock/PID file
    pub lock_path: PathBuf,
    /// Path to the durable store snapshot
    pub store_path: PathBuf,
    /// Directory for rolling daemon logs
    pub log_dir: PathBuf,
    pub transport_url: String,
    pub webhook_url: Option<String>,
    /// Bound on each sidecar request and webhook POST
    pub request_timeout: Duration,
    pub engine: EngineConfig,
}

impl Config {
    /// Load configuration for this instance.
    ///
    /// A missing default config file is fine; a missing file named by
    /// `SB_CONFIG` is an error.
    pub fn load() -> Result<Self, LifecycleError> {
        let state_dir = env::state_dir()?;
        let file = match env::config_path() {
            Some(path) => FileConfig::read(&path)?,
            None => {
                let path = state_dir.join(CONFIG_FILE);
                if path.exists() {
                    FileConfig::read(&path)?
                } else {
                    FileConfig::default()
                }
            }
        };
        let mut config = Self::from_file(state_dir, file);
        config.apply_env();
        config.engine.validate()?;
        Ok(config)
    }

    /// Build a config rooted at `state_dir` from parsed file settings.
    pub fn from_file(state_dir: PathBuf, file: FileConfig) -> Self {
        let mut engine = EngineConfig::default();
        file.fleet.apply(&mut engine);
        file.connection.apply(&mut engine);
        file.backoff.apply(&mut engine);
        file.inbound.apply(&mut engine);
        if let Some(key) = file.master_key {
            engine.master_key = key;
        }

        Self {
            lock_path: state_dir.join("sbd.pid"),
            store_path: state_dir.join("store.json"),
            log_dir: state_dir.join("logs"),
            transport_url: file.transport_url.unwrap_or_else(|| DEFAULT_TRANSPORT_URL.to_string()),
            webhook_url: file.webhook_url,
            request_timeout: file
                .request_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(Duration::from_secs(10)),
            engine,
            state_dir,
        }
    }

    /// Environment variables win over the file.
    pub fn apply_env(&mut self) {
        if let Some(capacity) = env::instance_capacity() {
            self.engine.capacity = capacity;
        }
        if let Some(key) = env::master_key() {
            self.engine.master_key = key;
        }
        if let Some(url) = env::webhook_url() {
            self.webhook_url = Some(url);
        }
        if let Some(url) = env::transport_url() {
            self.transport_url = url;
        }
    }
}

/// On-disk shape of `switchboard.toml`. Durations are in milliseconds.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub transport_url: Option<String>,
    pub webhook_url: Option<String>,
    pub master_key: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub fleet: FleetSection,
    pub connection: ConnectionSection,
    pub backoff: BackoffSection,
    pub inbound: InboundSection,
}

impl FileConfig {
    pub fn read(path: &Path) -> Result<Self, LifecycleError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| LifecycleError::ConfigRead(path.to_path_buf(), e))?;
        Self::parse(path, &text)
    }

    pub fn parse(path: &Path, text: &str) -> Result<Self, LifecycleError> {
        toml::from_str(text).map_err(|e| LifecycleError::ConfigParse(path.to_path_buf(), e))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FleetSection {
    pub capacity: Option<usize>,
    pub heartbeat_interval_ms: Option<u64>,
    pub liveness_timeout_ms: Option<u64>,
    pub orphan_scan_interval_ms: Option<u64>,
    pub startup_concurrency: Option<usize>,
    pub startup_stagger_ms: Option<u64>,
    pub init_lock_ttl_ms: Option<u64>,
}

impl FleetSection {
    fn apply(&self, engine: &mut EngineConfig) {
        set(&mut engine.capacity, self.capacity);
        set_ms(&mut engine.heartbeat_interval, self.heartbeat_interval_ms);
        set_ms(&mut engine.liveness_timeout, self.liveness_timeout_ms);
        set_ms(&mut engine.orphan_scan_interval, self.orphan_scan_interval_ms);
        set(&mut engine.startup_concurrency, self.startup_concurrency);
        set_ms(&mut engine.startup_stagger, self.startup_stagger_ms);
        set_ms(&mut engine.init_lock_ttl, self.init_lock_ttl_ms);
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionSection {
    pub relink_ttl_ms: Option<u64>,
    pub pairing_restart_window_ms: Option<u64>,
    pub freshness_window_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub op_timeout_ms: Option<u64>,
    pub max_concurrent_connects: Option<usize>,
}

impl ConnectionSection {
    fn apply(&self, engine: &mut EngineConfig) {
        set_ms(&mut engine.relink_ttl, self.relink_ttl_ms);
        set_ms(&mut engine.pairing_restart_window, self.pairing_restart_window_ms);
        set_ms(&mut engine.freshness_window, self.freshness_window_ms);
        set_ms(&mut engine.connect_timeout, self.connect_timeout_ms);
        set_ms(&mut engine.op_timeout, self.op_timeout_ms);
        set(&mut engine.max_concurrent_connects, self.max_concurrent_connects);
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackoffSection {
    pub base_ms: Option<u64>,
    pub max_ms: Option<u64>,
    pub max_attempts: Option<u32>,
    pub max_jitter_ms: Option<u64>,
}

impl BackoffSection {
    fn apply(&self, engine: &mut EngineConfig) {
        let policy = &mut engine.backoff;
        set_ms(&mut policy.base, self.base_ms);
        set_ms(&mut policy.max, self.max_ms);
        set(&mut policy.max_attempts, self.max_attempts);
        set_ms(&mut policy.max_jitter, self.max_jitter_ms);
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InboundSection {
    pub batch_size: Option<usize>,
    pub flush_interval_ms: Option<u64>,
    pub backlog_limit: Option<usize>,
    pub flush_retry_delay_ms: Option<u64>,
    pub fingerprint_window_ms: Option<u64>,
    pub echo_window_ms: Option<u64>,
    pub forward_attempts: Option<u32>,
    pub forward_base_delay_ms: Option<u64>,
}

impl InboundSection {
    fn apply(&self, engine: &mut EngineConfig) {
        set(&mut engine.batch_size, self.batch_size);
        set_ms(&mut engine.flush_interval, self.flush_interval_ms);
        set(&mut engine.backlog_limit, self.backlog_limit);
        set_ms(&mut engine.flush_retry_delay, self.flush_retry_delay_ms);
        set_ms(&mut engine.fingerprint_window, self.fingerprint_window_ms);
        set_ms(&mut engine.echo_window, self.echo_window_ms);
        set(&mut engine.forward_attempts, self.forward_attempts);
        set_ms(&mut engine.forward_base_delay, self.forward_base_delay_ms);
    }
}

fn set<T: Copy>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn set_ms(slot: &mut Duration, value: Option<u64>) {
    if let Some(ms) = value {
        *slot = Duration::from_millis(ms);
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
