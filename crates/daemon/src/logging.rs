// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subscriber setup: stderr plus a daily-rolling file under the state dir.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;
use crate::env;
use crate::lifecycle::LifecycleError;

const LOG_FILE: &str = "sbd.log";

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must outlive the daemon.
pub fn init(config: &Config) -> Result<WorkerGuard, LifecycleError> {
    std::fs::create_dir_all(&config.log_dir)?;
    let appender = tracing_appender::rolling::daily(&config.log_dir, LOG_FILE);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_new(env::log_filter()).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .try_init()
        .map_err(|e| LifecycleError::Logging(e.to_string()))?;
    Ok(guard)
}
