// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport termination signals.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status codes the messaging network attaches to a closed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectCode {
    LoggedOut,
    Forbidden,
    TimedOut,
    MultideviceMismatch,
    ConnectionClosed,
    ConnectionReplaced,
    BadSession,
    ServiceUnavailable,
    RestartRequired,
}

impl DisconnectCode {
    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            401 => DisconnectCode::LoggedOut,
            403 => DisconnectCode::Forbidden,
            408 => DisconnectCode::TimedOut,
            411 => DisconnectCode::MultideviceMismatch,
            428 => DisconnectCode::ConnectionClosed,
            440 => DisconnectCode::ConnectionReplaced,
            500 => DisconnectCode::BadSession,
            503 => DisconnectCode::ServiceUnavailable,
            515 => DisconnectCode::RestartRequired,
            _ => return None,
        })
    }

    pub fn code(self) -> u16 {
        match self {
            DisconnectCode::LoggedOut => 401,
            DisconnectCode::Forbidden => 403,
            DisconnectCode::TimedOut => 408,
            DisconnectCode::MultideviceMismatch => 411,
            DisconnectCode::ConnectionClosed => 428,
            DisconnectCode::ConnectionReplaced => 440,
            DisconnectCode::BadSession => 500,
            DisconnectCode::ServiceUnavailable => 503,
            DisconnectCode::RestartRequired => 515,
        }
    }
}

crate::simple_display! {
    DisconnectCode {
        LoggedOut => "logged_out",
        Forbidden => "forbidden",
        TimedOut => "timed_out",
        MultideviceMismatch => "multidevice_mismatch",
        ConnectionClosed => "connection_closed",
        ConnectionReplaced => "connection_replaced",
        BadSession => "bad_session",
        ServiceUnavailable => "service_unavailable",
        RestartRequired => "restart_required",
    }
}

/// Why a transport session ended, as reported by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Termination {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Termination {
    pub fn new(code: Option<u16>, reason: Option<String>) -> Self {
        Self { code, reason }
    }

    pub fn of(code: DisconnectCode) -> Self {
        Self { code: Some(code.code()), reason: None }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn known_code(&self) -> Option<DisconnectCode> {
        self.code.and_then(DisconnectCode::from_code)
    }

    /// Reason text, empty when absent.
    pub fn reason_text(&self) -> &str {
        self.reason.as_deref().unwrap_or("")
    }

    /// True when the transport gave neither a code nor a reason.
    pub fn is_unstructured(&self) -> bool {
        self.code.is_none() && self.reason_text().trim().is_empty()
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.reason.as_deref()) {
            (Some(code), Some(reason)) => write!(f, "{code}: {reason}"),
            (Some(code), None) => write!(f, "{code}"),
            (None, Some(reason)) => f.write_str(reason),
            (None, None) => f.write_str("unknown"),
        }
    }
}
