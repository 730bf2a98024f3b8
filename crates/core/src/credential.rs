// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Canonical session credential schema.
//!
//! The transport reports credentials as loosely-typed JSON whose byte fields
//! may be base64 strings, arrays of numbers, or `{"type":"Buffer","data":..}`
//! objects, with camelCase or snake_case keys. [`Credential::from_value`]
//! converts that once; everything past the vault boundary uses the typed form.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub const CREDENTIAL_SCHEMA_VERSION: u32 = 1;
/// Curve25519 public/private key and secret length
pub const KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

/// Structural problems found while converting or validating a credential.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialDefect {
    #[error("credential is not a JSON object")]
    NotAnObject,
    #[error("missing field: {0}")]
    Missing(&'static str),
    #[error("field {0} is not decodable as bytes")]
    NotBytes(&'static str),
    #[error("field {field} has length {actual}, expected {expected}")]
    BadLength { field: &'static str, expected: usize, actual: usize },
    #[error("field {0} has an invalid value")]
    Invalid(&'static str),
    #[error("unsupported credential schema version {0}")]
    UnsupportedVersion(u64),
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    #[serde(with = "b64")]
    pub public: Vec<u8>,
    #[serde(with = "b64")]
    pub private: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedKey {
    pub key_pair: KeyPair,
    #[serde(with = "b64")]
    pub signature: Vec<u8>,
    pub key_id: u32,
}

/// Proof of a completed pairing handshake, issued by the primary device.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    #[serde(with = "b64")]
    pub details: Vec<u8>,
    #[serde(with = "b64")]
    pub account_signature_key: Vec<u8>,
    #[serde(with = "b64")]
    pub account_signature: Vec<u8>,
    #[serde(with = "b64")]
    pub device_signature: Vec<u8>,
}

/// Decrypted session credential.
///
/// Never persisted in this form; the vault seals it before it reaches the
/// durable store.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub schema_version: u32,
    pub noise_key: KeyPair,
    pub signed_identity_key: KeyPair,
    pub signed_pre_key: SignedKey,
    pub registration_id: u32,
    #[serde(with = "b64")]
    pub adv_secret_key: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_identity: Option<DeviceIdentity>,
    /// Paired account identity (phone JID), set by the pairing handshake
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub me: Option<String>,
    /// Opaque transport state carried through untouched
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("schema_version", &self.schema_version)
            .field("registration_id", &self.registration_id)
            .field("paired", &self.is_paired())
            .field("me", &self.me)
            .field("extra_keys", &self.extra.len())
            .finish_non_exhaustive()
    }
}

impl Credential {
    /// Convert a transport-reported credential into the canonical form.
    pub fn from_value(value: &Value) -> Result<Self, CredentialDefect> {
        let obj = value.as_object().ok_or(CredentialDefect::NotAnObject)?;

        if let Some(v) = field(obj, &["schema_version", "schemaVersion"]) {
            let version = v.as_u64().ok_or(CredentialDefect::Invalid("schema_version"))?;
            if version != u64::from(CREDENTIAL_SCHEMA_VERSION) {
                return Err(CredentialDefect::UnsupportedVersion(version));
            }
        }

        let noise_key =
            key_pair(required(obj, &["noise_key", "noiseKey"], "noise_key")?, "noise_key")?;
        let signed_identity_key = key_pair(
            required(obj, &["signed_identity_key", "signedIdentityKey"], "signed_identity_key")?,
            "signed_identity_key",
        )?;
        let signed_pre_key =
            signed_key(required(obj, &["signed_pre_key", "signedPreKey"], "signed_pre_key")?)?;
        let registration_id =
            required(obj, &["registration_id", "registrationId"], "registration_id")?
                .as_u64()
                .and_then(|id| u32::try_from(id).ok())
                .ok_or(CredentialDefect::Invalid("registration_id"))?;
        let adv_secret_key = fixed_bytes(
            required(obj, &["adv_secret_key", "advSecretKey"], "adv_secret_key")?,
            "adv_secret_key",
            KEY_LEN,
        )?;

        let device_identity = match field(obj, &["device_identity", "account"]) {
            Some(Value::Null) | None => None,
            Some(v) => Some(device_identity(v)?),
        };

        let me = match field(obj, &["me"]) {
            Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
            Some(Value::Object(me)) => {
                me.get("id").and_then(Value::as_str).filter(|id| !id.is_empty()).map(String::from)
            }
            _ => None,
        };

        let extra = obj
            .iter()
            .filter(|(k, _)| !CONSUMED_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Credential {
            schema_version: CREDENTIAL_SCHEMA_VERSION,
            noise_key,
            signed_identity_key,
            signed_pre_key,
            registration_id,
            adv_secret_key,
            device_identity,
            me,
            extra,
        })
    }

    /// Canonical JSON form handed back to the transport on restore.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Re-check fixed-length key material.
    pub fn validate(&self) -> Result<(), CredentialDefect> {
        check_len(&self.noise_key.public, "noise_key.public", KEY_LEN)?;
        check_len(&self.noise_key.private, "noise_key.private", KEY_LEN)?;
        check_len(&self.signed_identity_key.public, "signed_identity_key.public", KEY_LEN)?;
        check_len(&self.signed_identity_key.private, "signed_identity_key.private", KEY_LEN)?;
        check_len(&self.signed_pre_key.key_pair.public, "signed_pre_key.public", KEY_LEN)?;
        check_len(&self.signed_pre_key.key_pair.private, "signed_pre_key.private", KEY_LEN)?;
        check_len(&self.signed_pre_key.signature, "signed_pre_key.signature", SIGNATURE_LEN)?;
        check_len(&self.adv_secret_key, "adv_secret_key", KEY_LEN)?;
        if let Some(identity) = &self.device_identity {
            if identity.details.is_empty() {
                return Err(CredentialDefect::Missing("device_identity.details"));
            }
            check_len(
                &identity.account_signature_key,
                "device_identity.account_signature_key",
                KEY_LEN,
            )?;
            check_len(
                &identity.account_signature,
                "device_identity.account_signature",
                SIGNATURE_LEN,
            )?;
            check_len(
                &identity.device_signature,
                "device_identity.device_signature",
                SIGNATURE_LEN,
            )?;
        }
        Ok(())
    }

    /// Whether the pairing handshake has completed for this credential.
    pub fn is_paired(&self) -> bool {
        self.device_identity.is_some() && self.me.is_some()
    }

    /// Whether a reconnect may be attempted with this credential instead of a
    /// fresh relink challenge.
    pub fn is_restorable(&self) -> bool {
        self.is_paired() && self.validate().is_ok()
    }

    pub fn phone_identity(&self) -> Option<&str> {
        self.me.as_deref()
    }
}

/// Encrypted credential as stored in the durable record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedCredential {
    /// Cipher identifier, e.g. `aes-256-gcm`
    pub algorithm: String,
    /// Sealing scheme version, bumped when the envelope layout changes
    pub version: u32,
    /// Base64 initialization vector
    pub iv: String,
    /// Base64 authentication tag
    pub tag: String,
    /// Base64 ciphertext (without the tag)
    pub ciphertext: String,
    pub sealed_at_ms: u64,
}

const CONSUMED_KEYS: &[&str] = &[
    "schema_version",
    "schemaVersion",
    "noise_key",
    "noiseKey",
    "signed_identity_key",
    "signedIdentityKey",
    "signed_pre_key",
    "signedPreKey",
    "registration_id",
    "registrationId",
    "adv_secret_key",
    "advSecretKey",
    "device_identity",
    "account",
    "me",
];

fn field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| obj.get(*name))
}

fn required<'a>(
    obj: &'a Map<String, Value>,
    names: &[&str],
    label: &'static str,
) -> Result<&'a Value, CredentialDefect> {
    match field(obj, names) {
        Some(Value::Null) | None => Err(CredentialDefect::Missing(label)),
        Some(v) => Ok(v),
    }
}

/// Decode a byte field from any of the shapes the transport produces.
pub fn decode_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::String(s) => BASE64.decode(s).ok(),
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_u64().and_then(|b| u8::try_from(b).ok()))
            .collect(),
        Value::Object(obj) if obj.get("type").and_then(Value::as_str) == Some("Buffer") => {
            obj.get("data").and_then(decode_bytes)
        }
        _ => None,
    }
}

fn fixed_bytes(
    value: &Value,
    label: &'static str,
    len: usize,
) -> Result<Vec<u8>, CredentialDefect> {
    let bytes = decode_bytes(value).ok_or(CredentialDefect::NotBytes(label))?;
    check_len(&bytes, label, len)?;
    Ok(bytes)
}

fn check_len(bytes: &[u8], field: &'static str, expected: usize) -> Result<(), CredentialDefect> {
    if bytes.len() != expected {
        return Err(CredentialDefect::BadLength { field, expected, actual: bytes.len() });
    }
    Ok(())
}

fn key_pair(value: &Value, label: &'static str) -> Result<KeyPair, CredentialDefect> {
    let obj = value.as_object().ok_or(CredentialDefect::Invalid(label))?;
    let public = obj.get("public").ok_or(CredentialDefect::Missing(label))?;
    let private = obj.get("private").ok_or(CredentialDefect::Missing(label))?;
    Ok(KeyPair {
        public: fixed_bytes(public, label, KEY_LEN)?,
        private: fixed_bytes(private, label, KEY_LEN)?,
    })
}

fn signed_key(value: &Value) -> Result<SignedKey, CredentialDefect> {
    let obj = value.as_object().ok_or(CredentialDefect::Invalid("signed_pre_key"))?;
    let pair = required(obj, &["key_pair", "keyPair"], "signed_pre_key.key_pair")?;
    let signature = required(obj, &["signature"], "signed_pre_key.signature")?;
    let key_id = required(obj, &["key_id", "keyId"], "signed_pre_key.key_id")?
        .as_u64()
        .and_then(|id| u32::try_from(id).ok())
        .ok_or(CredentialDefect::Invalid("signed_pre_key.key_id"))?;
    Ok(SignedKey {
        key_pair: key_pair(pair, "signed_pre_key.key_pair")?,
        signature: fixed_bytes(signature, "signed_pre_key.signature", SIGNATURE_LEN)?,
        key_id,
    })
}

fn device_identity(value: &Value) -> Result<DeviceIdentity, CredentialDefect> {
    let obj = value.as_object().ok_or(CredentialDefect::Invalid("device_identity"))?;
    let details = decode_bytes(required(obj, &["details"], "device_identity.details")?)
        .filter(|d| !d.is_empty())
        .ok_or(CredentialDefect::NotBytes("device_identity.details"))?;
    Ok(DeviceIdentity {
        details,
        account_signature_key: fixed_bytes(
            required(
                obj,
                &["account_signature_key", "accountSignatureKey"],
                "device_identity.account_signature_key",
            )?,
            "device_identity.account_signature_key",
            KEY_LEN,
        )?,
        account_signature: fixed_bytes(
            required(
                obj,
                &["account_signature", "accountSignature"],
                "device_identity.account_signature",
            )?,
            "device_identity.account_signature",
            SIGNATURE_LEN,
        )?,
        device_signature: fixed_bytes(
            required(
                obj,
                &["device_signature", "deviceSignature"],
                "device_identity.device_signature",
            )?,
            "device_identity.device_signature",
            SIGNATURE_LEN,
        )?,
    })
}

mod b64 {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[path = "credential_tests.rs"]
mod tests;
