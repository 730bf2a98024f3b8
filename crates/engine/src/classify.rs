// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Disconnect classification.
//!
//! Every transport termination maps to exactly one [`Classification`], and
//! every classification to exactly one [`Action`].

use sb_core::{DisconnectCode, Termination};
use serde::Serialize;
use std::time::Duration;

/// Reason-text markers that indicate broken key material.
const CORRUPTION_MARKERS: &[&str] =
    &["bad mac", "unable to authenticate", "decrypt", "integrity"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// The device was unlinked from the phone
    LoggedOut,
    /// Another connection took over the same identity
    Superseded,
    /// Key material is unusable
    Corrupted,
    /// The network asked for a restart right after pairing
    PairingRestart,
    /// Network or service hiccup
    Transient,
    /// Abrupt close with nothing to go on
    RateLimited,
    /// The network refused the connection outright
    Rejected,
}

sb_core::simple_display! {
    Classification {
        LoggedOut => "logged_out",
        Superseded => "superseded",
        Corrupted => "corrupted",
        PairingRestart => "pairing_restart",
        Transient => "transient",
        RateLimited => "rate_limited",
        Rejected => "rejected",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Discard credentials and require a fresh pairing
    Conflict,
    Reconnect { immediate: bool },
    /// Stop without reconnecting and keep credentials
    Hold,
}

impl Classification {
    pub fn action(self) -> Action {
        match self {
            Classification::LoggedOut
            | Classification::Superseded
            | Classification::Corrupted
            | Classification::Rejected => Action::Conflict,
            Classification::PairingRestart => Action::Reconnect { immediate: true },
            Classification::Transient => Action::Reconnect { immediate: false },
            Classification::RateLimited => Action::Hold,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClassifyContext {
    pub now_ms: u64,
    /// When the current credentials completed pairing, if they have
    pub paired_at_ms: Option<u64>,
    pub pairing_window: Duration,
}

impl ClassifyContext {
    fn within_pairing_window(&self) -> bool {
        self.paired_at_ms.is_some_and(|at| {
            self.now_ms.saturating_sub(at) <= self.pairing_window.as_millis() as u64
        })
    }
}

pub fn classify(termination: &Termination, ctx: &ClassifyContext) -> Classification {
    let reason = termination.reason_text().to_ascii_lowercase();
    if CORRUPTION_MARKERS.iter().any(|marker| reason.contains(marker)) {
        return Classification::Corrupted;
    }

    let Some(code) = termination.code else {
        return Classification::RateLimited;
    };

    match DisconnectCode::from_code(code) {
        Some(DisconnectCode::LoggedOut) => Classification::LoggedOut,
        Some(DisconnectCode::ConnectionReplaced) => Classification::Superseded,
        Some(DisconnectCode::Forbidden | DisconnectCode::MultideviceMismatch) => {
            Classification::Rejected
        }
        Some(DisconnectCode::RestartRequired) if ctx.within_pairing_window() => {
            Classification::PairingRestart
        }
        Some(
            DisconnectCode::RestartRequired
            | DisconnectCode::TimedOut
            | DisconnectCode::ConnectionClosed
            | DisconnectCode::BadSession
            | DisconnectCode::ServiceUnavailable,
        )
        | None => Classification::Transient,
    }
}

#[cfg(test)]
#[path = "classify_tests.rs"]
mod tests;
