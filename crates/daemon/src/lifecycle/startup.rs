// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon startup and initialization logic.

use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use fs2::FileExt;
use sb_adapters::{HostProcessProbe, MemorySharedCache, SidecarTransport, WebhookNotifier};
use sb_core::{Event, SystemClock};
use sb_engine::{Orchestrator, OrchestratorDeps};
use sb_storage::FileStore;
use tokio::sync::mpsc;
use tracing::info;

use super::{DaemonState, LifecycleError, StartupResult};
use crate::config::Config;

/// Capacity of the transport event channel
const EVENT_BUFFER: usize = 1024;

/// Start the daemon
pub async fn startup(config: &Config) -> Result<StartupResult, LifecycleError> {
    match startup_inner(config).await {
        Ok(result) => Ok(result),
        Err(e) => {
            // A failed lock means the PID file belongs to a running daemon
            if !matches!(e, LifecycleError::LockFailed(_)) {
                cleanup_on_failure(config);
            }
            Err(e)
        }
    }
}

/// Inner startup logic - cleanup_on_failure called if this fails
async fn startup_inner(config: &Config) -> Result<StartupResult, LifecycleError> {
    // 1. Create state directory
    std::fs::create_dir_all(&config.state_dir)?;

    // 2. Acquire lock file FIRST - prevents two daemons sharing one state dir.
    // Open without truncating so a failed attempt leaves the running PID intact.
    let lock_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&config.lock_path)?;
    lock_file.try_lock_exclusive().map_err(LifecycleError::LockFailed)?;

    let mut lock_file = lock_file;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;
    let lock_file = lock_file;

    // 3. Open the durable store
    let store = FileStore::open(&config.store_path)?;
    info!(path = %store.path().display(), "opened store");

    // 4. Set up adapters
    let transport = SidecarTransport::new(config.transport_url.clone(), config.request_timeout);
    let notifier = WebhookNotifier::new(config.webhook_url.clone(), config.request_timeout)?;
    if notifier.url().is_none() {
        info!("no webhook configured, inbound messages are stored only");
    }

    // 5. Create runtime
    let (event_tx, event_rx) = mpsc::channel::<Event>(EVENT_BUFFER);
    let runtime = Arc::new(Orchestrator::new(
        config.engine.clone(),
        OrchestratorDeps {
            store: Arc::new(store),
            transport,
            shared_cache: Arc::new(MemorySharedCache::new()),
            notifier,
            probe: Arc::new(HostProcessProbe),
        },
        SystemClock,
        event_tx,
    )?);

    // 6. Register with the fleet and restore agents left behind
    let recovery = runtime.recover().await?;
    info!(
        instance = %runtime.instance_id(),
        released = recovery.released,
        initialized = recovery.initialized,
        skipped = recovery.skipped,
        failed = recovery.failed,
        "daemon started"
    );

    Ok(StartupResult {
        daemon: DaemonState {
            config: config.clone(),
            lock_file,
            runtime,
            start_time: Instant::now(),
        },
        event_rx,
        recovery,
    })
}

/// Clean up resources on startup failure
fn cleanup_on_failure(config: &Config) {
    if config.lock_path.exists() {
        let _ = std::fs::remove_file(&config.lock_path);
    }
}

#[cfg(test)]
#[path = "startup_tests.rs"]
mod tests;
