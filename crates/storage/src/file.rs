// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON snapshot store shared by every instance on one host.
//!
//! Each operation takes an exclusive `fs2` lock on a sidecar lock file,
//! reloads the snapshot, applies the change, and atomically replaces the
//! snapshot before unlocking. Peers therefore observe every write and
//! conditional updates are compare-and-set across processes.

use crate::{AgentStore, ClaimOutcome, StoreError, StoreState};
use async_trait::async_trait;
use fs2::FileExt;
use sb_core::{
    AgentId, AgentSession, InstanceId, InstanceRecord, MessageRecord, OwnerStamp,
    SealedCredential, SessionPatch,
};
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const MAX_BAK_FILES: u32 = 3;

#[derive(Debug)]
struct Paths {
    data: PathBuf,
    lock: PathBuf,
    tmp: PathBuf,
}

#[derive(Debug, Clone)]
pub struct FileStore {
    paths: Arc<Paths>,
}

impl FileStore {
    /// Open (or create) the store at `path`, creating parent directories.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let data = path.into();
        if let Some(parent) = data.parent() {
            fs::create_dir_all(parent)?;
        }
        let paths = Paths {
            lock: data.with_extension("lock"),
            tmp: data.with_extension("tmp"),
            data,
        };
        let store = Self { paths: Arc::new(paths) };
        store.paths.transact(false, |_| Ok(()))?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.paths.data
    }

    async fn with_state<R, F>(&self, mutate: bool, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut StoreState) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let paths = Arc::clone(&self.paths);
        tokio::task::spawn_blocking(move || paths.transact(mutate, f))
            .await
            .map_err(|e| StoreError::Unavailable(format!("store task failed: {e}")))?
    }
}

impl Paths {
    fn transact<R>(
        &self,
        mutate: bool,
        f: impl FnOnce(&mut StoreState) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock)?;
        lock_file
            .lock_exclusive()
            .map_err(|source| StoreError::Lock { path: self.lock.clone(), source })?;

        let result = self.load().and_then(|mut state| {
            let out = f(&mut state)?;
            if mutate {
                self.save(&state)?;
            }
            Ok(out)
        });

        let _ = FileExt::unlock(&lock_file);
        result
    }

    fn load(&self) -> Result<StoreState, StoreError> {
        let bytes = match fs::read(&self.data) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StoreState::default()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(state) => Ok(state),
            Err(e) => {
                let bak = rotate_bak_path(&self.data);
                tracing::warn!(
                    error = %e,
                    path = %self.data.display(),
                    backup = %bak.display(),
                    "corrupt store snapshot, moving aside and starting empty"
                );
                fs::rename(&self.data, &bak)?;
                Ok(StoreState::default())
            }
        }
    }

    fn save(&self, state: &StoreState) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(state)?;
        let mut tmp = File::create(&self.tmp)?;
        tmp.write_all(&bytes)?;
        tmp.sync_all()?;
        fs::rename(&self.tmp, &self.data)?;
        Ok(())
    }
}

/// Pick the next `.bak` / `.bak.N` path, rotating older backups out.
fn rotate_bak_path(path: &Path) -> PathBuf {
    let bak = |n: u32| {
        if n == 1 {
            path.with_extension("bak")
        } else {
            path.with_extension(format!("bak.{n}"))
        }
    };

    let oldest = bak(MAX_BAK_FILES);
    if oldest.exists() {
        let _ = fs::remove_file(&oldest);
    }
    for n in (1..MAX_BAK_FILES).rev() {
        let src = bak(n);
        if src.exists() {
            let _ = fs::rename(&src, bak(n + 1));
        }
    }
    bak(1)
}

#[async_trait]
impl AgentStore for FileStore {
    async fn get_session(&self, agent_id: &AgentId) -> Result<Option<AgentSession>, StoreError> {
        let id = agent_id.clone();
        self.with_state(false, move |s| Ok(s.sessions.get(&id).cloned())).await
    }

    async fn list_sessions(&self) -> Result<Vec<AgentSession>, StoreError> {
        self.with_state(false, |s| Ok(s.sessions.values().cloned().collect())).await
    }

    async fn ensure_session(
        &self,
        agent_id: &AgentId,
        now_ms: u64,
    ) -> Result<AgentSession, StoreError> {
        let id = agent_id.clone();
        self.with_state(true, move |s| Ok(s.ensure_session(&id, now_ms))).await
    }

    async fn update_session(
        &self,
        agent_id: &AgentId,
        patch: SessionPatch,
        now_ms: u64,
    ) -> Result<Option<AgentSession>, StoreError> {
        let id = agent_id.clone();
        self.with_state(true, move |s| Ok(s.update_session(&id, &patch, now_ms))).await
    }

    async fn set_credential(
        &self,
        agent_id: &AgentId,
        credential: Option<SealedCredential>,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        let id = agent_id.clone();
        self.with_state(true, move |s| s.set_credential(&id, credential, now_ms)).await
    }

    async fn claim_owner(
        &self,
        agent_id: &AgentId,
        expected: Option<InstanceId>,
        claim: OwnerStamp,
    ) -> Result<ClaimOutcome, StoreError> {
        let id = agent_id.clone();
        self.with_state(true, move |s| Ok(s.claim_owner(&id, expected.as_ref(), claim))).await
    }

    async fn release_owner(
        &self,
        agent_id: &AgentId,
        owner: &InstanceId,
    ) -> Result<bool, StoreError> {
        let (id, owner) = (agent_id.clone(), owner.clone());
        self.with_state(true, move |s| Ok(s.release_owner(&id, &owner))).await
    }

    async fn delete_session(&self, agent_id: &AgentId) -> Result<bool, StoreError> {
        let id = agent_id.clone();
        self.with_state(true, move |s| Ok(s.delete_session(&id))).await
    }

    async fn upsert_instance(&self, record: InstanceRecord) -> Result<(), StoreError> {
        self.with_state(true, move |s| {
            s.instances.insert(record.instance_id.clone(), record);
            Ok(())
        })
        .await
    }

    async fn heartbeat_instance(
        &self,
        instance_id: &InstanceId,
        now_ms: u64,
        assigned: BTreeSet<AgentId>,
    ) -> Result<bool, StoreError> {
        let id = instance_id.clone();
        self.with_state(true, move |s| Ok(s.heartbeat_instance(&id, now_ms, assigned))).await
    }

    async fn list_instances(&self) -> Result<Vec<InstanceRecord>, StoreError> {
        self.with_state(false, |s| Ok(s.instances.values().cloned().collect())).await
    }

    async fn remove_instance(&self, instance_id: &InstanceId) -> Result<bool, StoreError> {
        let id = instance_id.clone();
        self.with_state(true, move |s| Ok(s.instances.remove(&id).is_some())).await
    }

    async fn insert_messages(&self, records: Vec<MessageRecord>) -> Result<usize, StoreError> {
        self.with_state(true, move |s| Ok(s.insert_messages(records))).await
    }

    async fn list_messages(&self, agent_id: &AgentId) -> Result<Vec<MessageRecord>, StoreError> {
        let id = agent_id.clone();
        self.with_state(false, move |s| Ok(s.list_messages(&id))).await
    }
}

#[cfg(test)]
#[path = "file_tests.rs"]
mod tests;
