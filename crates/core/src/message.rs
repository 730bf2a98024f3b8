// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persisted message records.

use crate::session::AgentId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    Document,
    Sticker,
    Location,
    Contact,
}

crate::simple_display! {
    MessageKind {
        Text => "text",
        Image => "image",
        Video => "video",
        Audio => "audio",
        Document => "document",
        Sticker => "sticker",
        Location => "location",
        Contact => "contact",
    }
}

/// Reference to media held by the transport; content is never inlined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

/// One stored conversation message, inbound or locally originated.
///
/// `(agent_id, native_id)` is unique in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub agent_id: AgentId,
    /// Identifier assigned by the messaging network
    pub native_id: String,
    /// Conversation the message belongs to
    pub chat: String,
    /// Resolved sender identity (phone JID when resolvable)
    pub sender: String,
    pub from_me: bool,
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_name: Option<String>,
    pub timestamp_ms: u64,
    /// Content fingerprint used for cross-identifier deduplication
    pub fingerprint: String,
}

crate::builder! {
    pub struct MessageRecordBuilder => MessageRecord {
        into {
            agent_id: AgentId = "agent-1",
            native_id: String = "MSG-1",
            chat: String = "15550002222@s.whatsapp.net",
            sender: String = "15550002222@s.whatsapp.net",
            fingerprint: String = "fp-1",
        }
        set {
            from_me: bool = false,
            kind: MessageKind = MessageKind::Text,
            timestamp_ms: u64 = 1_700_000_000_000,
        }
        option {
            body: String = Some("hello".to_string()),
            media: MediaRef = None,
            push_name: String = None,
        }
    }
}
