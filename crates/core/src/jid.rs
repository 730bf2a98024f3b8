// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Messaging-network address (JID) helpers.

use serde::{Deserialize, Serialize};

pub const USER_SUFFIX: &str = "@s.whatsapp.net";
pub const LINKED_DEVICE_SUFFIX: &str = "@lid";
pub const GROUP_SUFFIX: &str = "@g.us";
pub const BROADCAST_SUFFIX: &str = "@broadcast";
pub const NEWSLETTER_SUFFIX: &str = "@newsletter";
pub const STATUS_JID: &str = "status@broadcast";

/// Phone numbers are 7 to 15 digits (E.164 without the plus).
const MIN_DIGITS: usize = 7;
const MAX_DIGITS: usize = 15;

/// Which kind of conversation an address belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationClass {
    /// One-to-one chat addressed by phone identity
    Direct,
    /// One-to-one chat addressed by an opaque linked-device identity
    LinkedDevice,
    Group,
    Broadcast,
    Status,
    Newsletter,
    /// Anything else the network uses for control traffic
    System,
}

crate::simple_display! {
    ConversationClass {
        Direct => "direct",
        LinkedDevice => "linked_device",
        Group => "group",
        Broadcast => "broadcast",
        Status => "status",
        Newsletter => "newsletter",
        System => "system",
    }
}

impl ConversationClass {
    /// Only one-to-one conversations are stored.
    pub fn is_persistable(self) -> bool {
        matches!(self, ConversationClass::Direct | ConversationClass::LinkedDevice)
    }
}

pub fn classify_conversation(jid: &str) -> ConversationClass {
    if jid == STATUS_JID {
        ConversationClass::Status
    } else if jid.ends_with(USER_SUFFIX) {
        ConversationClass::Direct
    } else if jid.ends_with(LINKED_DEVICE_SUFFIX) {
        ConversationClass::LinkedDevice
    } else if jid.ends_with(GROUP_SUFFIX) {
        ConversationClass::Group
    } else if jid.ends_with(BROADCAST_SUFFIX) {
        ConversationClass::Broadcast
    } else if jid.ends_with(NEWSLETTER_SUFFIX) {
        ConversationClass::Newsletter
    } else {
        ConversationClass::System
    }
}

/// User part of a JID with any `:device` suffix removed.
///
/// `15550001111:12@s.whatsapp.net` → `15550001111`
pub fn bare_user(jid: &str) -> &str {
    let user = jid.split_once('@').map_or(jid, |(user, _)| user);
    user.split_once(':').map_or(user, |(user, _)| user)
}

/// Normalize a phone number or phone JID into a device-less phone JID.
///
/// Accepts `+1 (555) 000-1111`, `15550001111`, or `15550001111:3@s.whatsapp.net`.
pub fn phone_jid(input: &str) -> Option<String> {
    let input = input.trim();
    let user = if input.contains('@') {
        if !input.ends_with(USER_SUFFIX) {
            return None;
        }
        bare_user(input)
    } else {
        input
    };
    let digits: String = user.chars().filter(char::is_ascii_digit).collect();
    let allowed =
        user.chars().all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-' | '(' | ')'));
    if !allowed || digits.len() < MIN_DIGITS || digits.len() > MAX_DIGITS {
        return None;
    }
    Some(format!("{digits}{USER_SUFFIX}"))
}

/// Normalize a linked-device identity into a device-less `@lid` JID.
pub fn linked_device_jid(jid: &str) -> Option<String> {
    if !jid.ends_with(LINKED_DEVICE_SUFFIX) {
        return None;
    }
    let user = bare_user(jid);
    (!user.is_empty()).then(|| format!("{user}{LINKED_DEVICE_SUFFIX}"))
}

#[cfg(test)]
#[path = "jid_tests.rs"]
mod tests;
