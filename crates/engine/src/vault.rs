// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential vault.
//!
//! Credentials are validated before anything is written, sealed with
//! AES-256-GCM (agent identity bound as associated data) for the durable
//! record and the shared tier, and kept decrypted only in the instance-local
//! tier.

use crate::cache::SessionCache;
use aes_gcm::aead::rand_core::RngCore as _;
use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::Aes256Gcm;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sb_core::credential::KEY_LEN;
use sb_core::{
    AgentId, AgentSession, AgentStatus, Clock, Credential, CredentialDefect, SealedCredential,
};
use sb_storage::{AgentStore, StoreError};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const SEAL_ALGORITHM: &str = "aes-256-gcm";
pub const SEAL_VERSION: u32 = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("credential rejected: {0}")]
    Invalid(#[from] CredentialDefect),
    /// The sealed payload failed authentication or decoding
    #[error("credential integrity check failed: {0}")]
    Corrupt(String),
    #[error("unsupported seal {algorithm} v{version}")]
    UnsupportedSeal { algorithm: String, version: u32 },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("store request timed out")]
    Timeout,
}

/// Outcome of the freshness check performed before a restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Freshness {
    pub valid: bool,
    pub reason: Option<String>,
}

impl Freshness {
    fn valid() -> Self {
        Self { valid: true, reason: None }
    }

    fn stale(reason: impl Into<String>) -> Self {
        Self { valid: false, reason: Some(reason.into()) }
    }
}

pub struct Vault<C: Clock> {
    cipher: Aes256Gcm,
    store: Arc<dyn AgentStore>,
    cache: Arc<SessionCache<C>>,
    clock: C,
    freshness_window: Duration,
    op_timeout: Duration,
}

impl<C: Clock> Vault<C> {
    pub fn new(
        key: &[u8; KEY_LEN],
        store: Arc<dyn AgentStore>,
        cache: Arc<SessionCache<C>>,
        clock: C,
        freshness_window: Duration,
        op_timeout: Duration,
    ) -> Self {
        Self {
            cipher: Aes256Gcm::new(key.into()),
            store,
            cache,
            clock,
            freshness_window,
            op_timeout,
        }
    }

    /// Validate and persist transport-reported credentials.
    ///
    /// A credential that fails validation leaves every tier untouched.
    pub async fn store(&self, agent: &AgentId, raw: &Value) -> Result<Credential, VaultError> {
        let credential = Credential::from_value(raw)?;
        credential.validate()?;
        let sealed = self.seal(agent, &credential)?;

        let now_ms = self.clock.epoch_ms();
        self.bounded(self.store.set_credential(agent, Some(sealed.clone()), now_ms)).await?;
        self.cache.put_credential(agent, &credential, &sealed).await;
        tracing::debug!(agent_id = %agent, paired = credential.is_paired(), "credential stored");
        Ok(credential)
    }

    /// Load from the nearest tier: local, then shared, then durable.
    pub async fn load(&self, agent: &AgentId) -> Result<Option<Credential>, VaultError> {
        if let Some(credential) = self.cache.local_credential(agent) {
            return Ok(Some(credential));
        }

        if let Some(sealed) = self.cache.shared_credential(agent).await {
            match self.open(agent, &sealed) {
                Ok(credential) => {
                    self.cache.promote_credential(agent, &credential);
                    return Ok(Some(credential));
                }
                // The durable record is authoritative; fall through to it
                Err(e) => {
                    tracing::warn!(agent_id = %agent, error = %e, "shared credential unusable")
                }
            }
        }

        let Some(session) = self.bounded(self.store.get_session(agent)).await? else {
            return Ok(None);
        };
        let Some(sealed) = session.credential else {
            return Ok(None);
        };
        let credential = self.open(agent, &sealed)?;
        self.cache.put_credential(agent, &credential, &sealed).await;
        Ok(Some(credential))
    }

    /// Whether stored credentials may be used to restore without pairing.
    pub fn validate_freshness(&self, session: &AgentSession, credential: &Credential) -> Freshness {
        if session.status == AgentStatus::Conflict {
            return Freshness::stale("agent is in conflict");
        }
        if !credential.is_paired() {
            return Freshness::stale("credential never completed pairing");
        }
        if let Err(defect) = credential.validate() {
            return Freshness::stale(format!("credential invalid: {defect}"));
        }
        if let Some(at) = session.disconnected_at_ms {
            let connected_since = session.connected_at_ms.is_some_and(|c| c > at);
            let idle_ms = self.clock.ms_since(at);
            if !connected_since && idle_ms > self.freshness_window.as_millis() as u64 {
                return Freshness::stale(format!("disconnected for {}s", idle_ms / 1000));
            }
        }
        Freshness::valid()
    }

    /// Remove the credential from every tier.
    pub async fn wipe(&self, agent: &AgentId) -> Result<(), VaultError> {
        self.cache.invalidate_credential(agent).await;
        let now_ms = self.clock.epoch_ms();
        self.bounded(self.store.set_credential(agent, None, now_ms)).await?;
        tracing::info!(agent_id = %agent, "credential wiped");
        Ok(())
    }

    pub fn seal(
        &self,
        agent: &AgentId,
        credential: &Credential,
    ) -> Result<SealedCredential, VaultError> {
        let plaintext = serde_json::to_vec(credential)
            .map_err(|e| VaultError::Corrupt(format!("encode: {e}")))?;
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let mut sealed = self
            .cipher
            .encrypt((&nonce).into(), Payload { msg: &plaintext, aad: agent.as_str().as_bytes() })
            .map_err(|_| VaultError::Corrupt("encryption failed".to_string()))?;
        let tag = sealed.split_off(sealed.len().saturating_sub(TAG_LEN));

        Ok(SealedCredential {
            algorithm: SEAL_ALGORITHM.to_string(),
            version: SEAL_VERSION,
            iv: BASE64.encode(nonce),
            tag: BASE64.encode(tag),
            ciphertext: BASE64.encode(sealed),
            sealed_at_ms: self.clock.epoch_ms(),
        })
    }

    pub fn open(
        &self,
        agent: &AgentId,
        sealed: &SealedCredential,
    ) -> Result<Credential, VaultError> {
        if sealed.algorithm != SEAL_ALGORITHM || sealed.version != SEAL_VERSION {
            return Err(VaultError::UnsupportedSeal {
                algorithm: sealed.algorithm.clone(),
                version: sealed.version,
            });
        }
        let nonce: [u8; NONCE_LEN] = decode(&sealed.iv, "iv")?
            .try_into()
            .map_err(|_| VaultError::Corrupt("iv has the wrong length".to_string()))?;
        let tag = decode(&sealed.tag, "tag")?;
        if tag.len() != TAG_LEN {
            return Err(VaultError::Corrupt("tag has the wrong length".to_string()));
        }
        let mut message = decode(&sealed.ciphertext, "ciphertext")?;
        message.extend_from_slice(&tag);

        let plaintext = self
            .cipher
            .decrypt((&nonce).into(), Payload { msg: &message, aad: agent.as_str().as_bytes() })
            .map_err(|_| VaultError::Corrupt("authentication failed".to_string()))?;
        let credential: Credential = serde_json::from_slice(&plaintext)
            .map_err(|e| VaultError::Corrupt(format!("decode: {e}")))?;
        credential.validate().map_err(|d| VaultError::Corrupt(d.to_string()))?;
        Ok(credential)
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, StoreError>>,
    ) -> Result<T, VaultError> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result.map_err(VaultError::from),
            Err(_) => Err(VaultError::Timeout),
        }
    }
}

fn decode(field: &str, label: &str) -> Result<Vec<u8>, VaultError> {
    BASE64.decode(field).map_err(|_| VaultError::Corrupt(format!("{label} is not base64")))
}

#[cfg(test)]
#[path = "vault_tests.rs"]
mod tests;
