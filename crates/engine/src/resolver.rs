// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resolve a message's conversation to a stable phone identity.
//!
//! The network may address a one-to-one chat by an opaque linked-device
//! identity. Strategies are tried in [`Strategy::ORDER`]; the first hit wins
//! and any mapping learned from the payload is cached for later messages.

use crate::cache::SessionCache;
use sb_core::{jid, Clock};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// `key.remoteJid` is already a phone identity
    RemotePhoneJid,
    /// `key.senderPn` carried alongside a linked-device address
    SenderPn,
    /// `key.remoteJidAlt`, the alternate address for the chat
    RemoteJidAlt,
    /// `key.participantPn`
    ParticipantPn,
    /// A mapping learned from an earlier message
    CachedMapping,
}

sb_core::simple_display! {
    Strategy {
        RemotePhoneJid => "remote_phone_jid",
        SenderPn => "sender_pn",
        RemoteJidAlt => "remote_jid_alt",
        ParticipantPn => "participant_pn",
        CachedMapping => "cached_mapping",
    }
}

impl Strategy {
    pub const ORDER: [Strategy; 5] = [
        Strategy::RemotePhoneJid,
        Strategy::SenderPn,
        Strategy::RemoteJidAlt,
        Strategy::ParticipantPn,
        Strategy::CachedMapping,
    ];

    /// Look the identity up in the message key alone.
    ///
    /// [`Strategy::CachedMapping`] never matches here.
    pub fn from_payload(self, key: &Value) -> Option<String> {
        let field = match self {
            Strategy::RemotePhoneJid => "remoteJid",
            Strategy::SenderPn => "senderPn",
            Strategy::RemoteJidAlt => "remoteJidAlt",
            Strategy::ParticipantPn => "participantPn",
            Strategy::CachedMapping => return None,
        };
        let raw = key.get(field)?.as_str()?;
        if self == Strategy::RemotePhoneJid && !raw.ends_with(jid::USER_SUFFIX) {
            return None;
        }
        jid::phone_jid(raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub jid: String,
    pub strategy: Strategy,
}

pub struct IdentityResolver<C: Clock> {
    cache: Arc<SessionCache<C>>,
}

impl<C: Clock> IdentityResolver<C> {
    pub fn new(cache: Arc<SessionCache<C>>) -> Self {
        Self { cache }
    }

    pub async fn resolve(&self, key: &Value) -> Option<Resolution> {
        let linked = key.get("remoteJid").and_then(Value::as_str).and_then(jid::linked_device_jid);

        for strategy in Strategy::ORDER {
            let found = match strategy {
                Strategy::CachedMapping => match &linked {
                    Some(lid) => self.cache.get_identity(lid).await,
                    None => None,
                },
                other => other.from_payload(key),
            };
            let Some(found) = found else {
                continue;
            };
            if strategy != Strategy::CachedMapping {
                if let Some(lid) = &linked {
                    self.cache.put_identity(lid, &found).await;
                }
            }
            return Some(Resolution { jid: found, strategy });
        }
        None
    }
}

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod tests;
