// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sb-storage: Durable agent, instance, and message records

mod error;
mod file;
mod memory;
mod state;
mod store;

pub use error::StoreError;
pub use file::FileStore;
pub use memory::MemoryStore;
pub use state::StoreState;
pub use store::{AgentStore, ClaimOutcome};
