// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! sb-core: Core types for the Switchboard agent session orchestrator

pub mod macros;

pub mod clock;
pub mod connection;
pub mod credential;
pub mod effect;
pub mod event;
pub mod id;
pub mod instance;
pub mod jid;
pub mod message;
pub mod session;
pub mod termination;
pub mod timer;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use clock::{Clock, FakeClock, SystemClock};
pub use connection::{AgentStatus, ConnectionState};
pub use credential::{Credential, CredentialDefect, SealedCredential};
pub use effect::Effect;
pub use event::Event;
pub use id::short;
pub use instance::{InstanceId, InstanceRecord};
pub use jid::ConversationClass;
pub use message::{MediaRef, MessageKind, MessageRecord};
#[cfg(any(test, feature = "test-support"))]
pub use session::AgentSessionBuilder;
pub use session::{
    AgentId, AgentSession, Change, Failure, OwnerStamp, RelinkChallenge, SessionPatch,
};
pub use termination::{DisconnectCode, Termination};
pub use timer::{TimerId, TimerKind};
