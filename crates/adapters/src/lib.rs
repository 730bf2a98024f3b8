// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Adapters for the orchestrator's external collaborators

pub mod cache;
pub mod notify;
pub mod probe;
pub mod transport;

pub use cache::{CacheError, MemorySharedCache, SharedCache};
pub use notify::{Notifier, NotifyError, WebhookNotifier};
pub use probe::{HostProcessProbe, ProcessProbe};
pub use transport::{
    ConnectRequest, ExistsResult, SendReceipt, Session, SessionTransport, SidecarTransport,
    TransportError,
};

#[cfg(any(test, feature = "test-support"))]
pub use notify::{FakeNotifier, NotifyCall};
#[cfg(any(test, feature = "test-support"))]
pub use probe::FakeProcessProbe;
#[cfg(any(test, feature = "test-support"))]
pub use transport::{FakeSession, FakeTransport, TransportCall};
