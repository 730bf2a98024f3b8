// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace-level scenarios: several orchestrator instances sharing one
//! durable store, driven only through the public API.

#[path = "specs/prelude.rs"]
mod prelude;

#[path = "specs/failover.rs"]
mod failover;
#[path = "specs/messaging.rs"]
mod messaging;
#[path = "specs/placement.rs"]
mod placement;
