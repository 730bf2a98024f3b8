// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host and process liveness checks used to supersede stale owners.

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;

pub trait ProcessProbe: Send + Sync + 'static {
    /// Name of the host this process runs on
    fn host(&self) -> String;

    /// Whether `pid` names a running process on this host
    fn is_running(&self, pid: u32) -> bool;

    fn process_id(&self) -> u32 {
        std::process::id()
    }
}

/// Probe backed by `gethostname(2)` and signal-0 delivery.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostProcessProbe;

impl ProcessProbe for HostProcessProbe {
    fn host(&self) -> String {
        nix::unistd::gethostname()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string())
    }

    fn is_running(&self, pid: u32) -> bool {
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        match kill(Pid::from_raw(raw), None) {
            Ok(()) => true,
            // Exists but owned by another user
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
mod fake {
    use super::ProcessProbe;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::Arc;

    /// Probe with a fixed host and a configurable set of dead pids.
    #[derive(Clone)]
    pub struct FakeProcessProbe {
        host: String,
        pid: u32,
        dead: Arc<Mutex<HashSet<u32>>>,
    }

    impl FakeProcessProbe {
        pub fn new(host: impl Into<String>, pid: u32) -> Self {
            Self { host: host.into(), pid, dead: Arc::new(Mutex::new(HashSet::new())) }
        }

        pub fn kill(&self, pid: u32) {
            self.dead.lock().insert(pid);
        }
    }

    impl ProcessProbe for FakeProcessProbe {
        fn host(&self) -> String {
            self.host.clone()
        }

        fn is_running(&self, pid: u32) -> bool {
            !self.dead.lock().contains(&pid)
        }

        fn process_id(&self) -> u32 {
            self.pid
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeProcessProbe;

#[cfg(test)]
#[path = "probe_tests.rs"]
mod tests;
