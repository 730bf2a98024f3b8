// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Switchboard daemon (sbd)
//!
//! Owns a share of the agent fleet: restores agents at startup, drives their
//! sessions, adopts orphans from dead peers, and releases everything on exit.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod config;
mod engine_loop;
mod env;
mod lifecycle;
mod logging;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::lifecycle::LifecycleError;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        // The subscriber may not be installed yet
        eprintln!("sbd: {e}");
        error!(error = %e, "daemon exited with error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), LifecycleError> {
    let config = Config::load()?;
    let _log_guard = logging::init(&config)?;
    info!(
        state_dir = %config.state_dir.display(),
        transport = %config.transport_url,
        capacity = config.engine.capacity,
        "starting sbd {}",
        env!("CARGO_PKG_VERSION")
    );

    let started = lifecycle::startup(&config).await?;
    let mut daemon = started.daemon;

    let cancel = CancellationToken::new();
    let fleet_loops = engine_loop::spawn_fleet_loops(Arc::clone(&daemon.runtime), cancel.clone());
    let engine = tokio::spawn(engine_loop::run_engine_loop(
        Arc::clone(&daemon.runtime),
        started.event_rx,
        engine_loop::TIMER_TICK,
        cancel.clone(),
    ));

    engine_loop::shutdown_signal().await;
    cancel.cancel();
    for handle in fleet_loops {
        let _ = handle.await;
    }
    let _ = engine.await;

    daemon.shutdown().await
}
