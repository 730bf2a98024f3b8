// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sb-engine: The agent session orchestrator

pub mod backoff;
pub mod cache;
pub mod classify;
pub mod config;
mod error;
mod executor;
pub mod fleet;
pub mod health;
pub mod locks;
pub mod machine;
pub mod pipeline;
pub mod reconnect;
pub mod registry;
pub mod resolver;
mod runtime;
pub mod scheduler;
pub mod vault;

pub use backoff::BackoffPolicy;
pub use cache::{CacheStats, LruTier, SessionCache, SharedStats, TierStats};
pub use classify::{classify, Action, Classification, ClassifyContext};
pub use config::{ConfigError, EngineConfig};
pub use error::RuntimeError;
pub use executor::{ExecuteError, Executor};
pub use fleet::{Assignment, FleetCoordinator, FleetError, Orphan};
pub use health::{Counters, ErrorStats, FleetHealth};
pub use locks::InitLocks;
pub use machine::{transition, AgentMachine, Input, MachineContext, Transition};
pub use pipeline::{Admission, Discard, FlushOutcome, Pipeline};
pub use reconnect::{ReconnectDecision, ReconnectScheduler, RetryMode};
pub use registry::Registry;
pub use resolver::{IdentityResolver, Resolution, Strategy};
pub use runtime::{
    CleanupReport, ExistsReport, InitReport, InitTrigger, Orchestrator, OrchestratorDeps,
    RecoveryReport, ShutdownReport, StatusReport,
};
pub use scheduler::Scheduler;
pub use vault::{Freshness, Vault, VaultError};
