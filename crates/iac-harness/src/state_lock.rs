//! Explicit state lock handles.
//!
//! Applies against the same state must not overlap. Each
//! [`RunConfig`](crate::run_config::RunConfig) carries a [`StateLock`] handle;
//! runners acquire a [`StateLockGuard`] for the duration of a mutating stage,
//! and the guard releases the lock on every exit path when dropped. Unless a
//! handle is set explicitly, configs take theirs from
//! [`StateLockRegistry::global`], so every config for one module directory in
//! this process shares one lock. The tool's own backend lock (`-lock=true`)
//! still applies on top of this for runs in other processes.

use crate::errors::HarnessError;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Handle to the lock guarding one target's state.
///
/// Clones share the same lock.
#[derive(Clone)]
pub struct StateLock {
    target: Arc<str>,
    inner: Arc<Mutex<()>>,
}

impl fmt::Debug for StateLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateLock")
            .field("target", &self.target)
            .field("held", &self.is_held())
            .finish()
    }
}

impl StateLock {
    /// Create an unshared lock for `target`.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: Arc::from(target.into()),
            inner: Arc::new(Mutex::new(())),
        }
    }

    /// Name of the guarded target.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Whether some run currently holds the lock.
    pub fn is_held(&self) -> bool {
        self.inner.try_lock().is_err()
    }

    /// Wait up to `timeout` for the lock.
    ///
    /// # Errors
    ///
    /// Returns `HarnessError::LockContention` if the lock is still held when
    /// `timeout` elapses.
    pub async fn acquire(&self, timeout: Duration) -> Result<StateLockGuard, HarnessError> {
        match tokio::time::timeout(timeout, Arc::clone(&self.inner).lock_owned()).await {
            Ok(guard) => {
                debug!(target: "iac.harness.state_lock", target_name = %self.target, "State lock acquired");
                Ok(StateLockGuard {
                    target: Arc::clone(&self.target),
                    _guard: guard,
                })
            }
            Err(_) => {
                warn!(
                    target: "iac.harness.state_lock",
                    target_name = %self.target,
                    timeout_secs = timeout.as_secs(),
                    "Timed out waiting for state lock"
                );
                Err(HarnessError::LockContention {
                    target: self.target.to_string(),
                })
            }
        }
    }
}

/// Proof of holding a [`StateLock`]. Dropping it releases the lock.
pub struct StateLockGuard {
    target: Arc<str>,
    _guard: OwnedMutexGuard<()>,
}

impl StateLockGuard {
    pub fn target(&self) -> &str {
        &self.target
    }
}

impl fmt::Debug for StateLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateLockGuard")
            .field("target", &self.target)
            .finish()
    }
}

impl Drop for StateLockGuard {
    fn drop(&mut self) {
        debug!(target: "iac.harness.state_lock", target_name = %self.target, "State lock released");
    }
}

/// Hands out one shared [`StateLock`] per module directory.
#[derive(Debug, Default)]
pub struct StateLockRegistry {
    locks: RwLock<HashMap<PathBuf, StateLock>>,
}

impl StateLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by every config in this process.
    pub fn global() -> &'static StateLockRegistry {
        static REGISTRY: OnceLock<StateLockRegistry> = OnceLock::new();
        REGISTRY.get_or_init(StateLockRegistry::new)
    }

    /// Lock for `dir`; the same canonical directory always yields the same lock.
    pub fn lock_for(&self, dir: &Path) -> StateLock {
        let key = std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());

        // The map holds no invariant a panicking writer could break
        {
            let locks = self.locks.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(lock) = locks.get(&key) {
                return lock.clone();
            }
        }

        let mut locks = self.locks.write().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(key.clone())
            .or_insert_with(|| StateLock::new(key.display().to_string()))
            .clone()
    }
}
