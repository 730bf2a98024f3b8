// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: startup, shutdown, recovery.

mod startup;
pub use startup::startup;

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use sb_adapters::{NotifyError, SidecarTransport, WebhookNotifier};
use sb_core::SystemClock;
use sb_engine::{ConfigError, Orchestrator, RecoveryReport, RuntimeError};
use sb_storage::StoreError;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::Config;

/// Daemon runtime with concrete adapter types
pub type DaemonRuntime = Orchestrator<SidecarTransport, WebhookNotifier, SystemClock>;

/// Daemon state during operation.
pub struct DaemonState {
    pub config: Config,
    // NOTE(lifetime): Held to maintain exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    pub runtime: Arc<DaemonRuntime>,
    pub start_time: Instant,
}

/// Result of daemon startup
pub struct StartupResult {
    pub daemon: DaemonState,
    /// Transport events for the engine loop
    pub event_rx: mpsc::Receiver<sb_core::Event>,
    /// Agents restored during startup recovery
    pub recovery: RecoveryReport,
}

impl DaemonState {
    /// Shutdown the daemon gracefully.
    ///
    /// Agents are released rather than logged out so a peer (or the next
    /// start of this daemon) can restore them from stored credentials.
    pub async fn shutdown(&mut self) -> Result<(), LifecycleError> {
        info!("shutting down daemon");

        let report = self.runtime.shutdown().await;
        info!(
            agents = report.agents_released,
            events = report.events_flushed,
            timers = report.timers_cancelled,
            "released local agents"
        );

        if self.config.lock_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.lock_path) {
                warn!("failed to remove PID file: {}", e);
            }
        }

        info!(uptime_secs = self.start_time.elapsed().as_secs(), "daemon shutdown complete");
        Ok(())
    }
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("could not determine state directory")]
    NoStateDir,

    #[error("failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("failed to read config {0}: {1}")]
    ConfigRead(PathBuf, #[source] std::io::Error),

    #[error("invalid config {0}: {1}")]
    ConfigParse(PathBuf, #[source] toml::de::Error),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("notifier error: {0}")]
    Notify(#[from] NotifyError),

    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("logging setup failed: {0}")]
    Logging(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
