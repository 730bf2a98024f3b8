// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for use across crates.
//!
//! Gated behind `#[cfg(any(test, feature = "test-support"))]`.

use crate::credential::{KEY_LEN, SIGNATURE_LEN};
use crate::termination::{DisconnectCode, Termination};
use crate::{AgentId, Event};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};

pub const PHONE_JID: &str = "15550001111@s.whatsapp.net";

// ── Proptest strategies ─────────────────────────────────────────────────

pub mod strategies {
    use crate::connection::AgentStatus;
    use crate::termination::Termination;
    use proptest::prelude::*;

    pub fn arb_agent_status() -> impl Strategy<Value = AgentStatus> {
        proptest::sample::select(AgentStatus::ALL.to_vec())
    }

    pub fn arb_termination() -> impl Strategy<Value = Termination> {
        (
            proptest::option::of(prop_oneof![
                Just(401u16),
                Just(403),
                Just(408),
                Just(411),
                Just(428),
                Just(440),
                Just(500),
                Just(503),
                Just(515),
                100u16..600,
            ]),
            proptest::option::of("[a-z ]{0,24}"),
        )
            .prop_map(|(code, reason)| Termination::new(code, reason))
    }

    pub fn arb_agent_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,15}"
    }
}

// ── Credential fixtures ─────────────────────────────────────────────────

/// Base64 of `len` copies of `fill`.
pub fn bytes_b64(fill: u8, len: usize) -> String {
    BASE64.encode(vec![fill; len])
}

/// A credential in the camelCase shape the transport reports.
///
/// Paired credentials carry the device identity and account identity that a
/// completed pairing handshake produces.
pub fn credential_value(paired: bool) -> Value {
    let mut value = json!({
        "noiseKey": { "public": bytes_b64(1, KEY_LEN), "private": bytes_b64(2, KEY_LEN) },
        "signedIdentityKey": { "public": bytes_b64(3, KEY_LEN), "private": bytes_b64(4, KEY_LEN) },
        "signedPreKey": {
            "keyPair": { "public": bytes_b64(5, KEY_LEN), "private": bytes_b64(6, KEY_LEN) },
            "signature": bytes_b64(7, SIGNATURE_LEN),
            "keyId": 1,
        },
        "registrationId": 4242,
        "advSecretKey": bytes_b64(8, KEY_LEN),
        "platform": "smba",
    });
    if paired {
        value["account"] = json!({
            "details": bytes_b64(9, 48),
            "accountSignatureKey": bytes_b64(10, KEY_LEN),
            "accountSignature": bytes_b64(11, SIGNATURE_LEN),
            "deviceSignature": bytes_b64(12, SIGNATURE_LEN),
        });
        value["me"] = json!({ "id": PHONE_JID, "name": "Agent" });
    }
    value
}

// ── Event factory functions ─────────────────────────────────────────────

pub fn qr_event(agent: &str, generation: u64, payload: &str) -> Event {
    Event::SessionQr { agent_id: AgentId::new(agent), generation, payload: payload.to_string() }
}

pub fn opened_event(agent: &str, generation: u64, phone: Option<&str>) -> Event {
    Event::SessionOpened {
        agent_id: AgentId::new(agent),
        generation,
        phone_identity: phone.map(String::from),
    }
}

pub fn creds_event(agent: &str, generation: u64, paired: bool) -> Event {
    Event::CredentialsUpdated {
        agent_id: AgentId::new(agent),
        generation,
        credential: credential_value(paired),
    }
}

pub fn terminated_event(agent: &str, generation: u64, code: DisconnectCode) -> Event {
    Event::SessionTerminated {
        agent_id: AgentId::new(agent),
        generation,
        termination: Termination::of(code),
    }
}

/// A raw one-to-one text message as the transport delivers it.
pub fn text_payload(
    native_id: &str,
    remote_jid: &str,
    from_me: bool,
    text: &str,
    ts_secs: u64,
) -> Value {
    json!({
        "key": { "remoteJid": remote_jid, "fromMe": from_me, "id": native_id },
        "message": { "conversation": text },
        "messageTimestamp": ts_secs,
        "pushName": "Sender",
    })
}

pub fn message_event(agent: &str, generation: u64, payload: Value) -> Event {
    Event::MessageReceived { agent_id: AgentId::new(agent), generation, payload }
}
