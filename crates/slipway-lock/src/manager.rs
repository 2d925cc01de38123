//! In-process lock registry with TTL expiry and generation-checked release.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use slipway_retry::BackoffPolicy;

/// Errors from lock acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// Contention persisted past the retry budget. Distinct from domain
    /// failures so callers can surface it as "try again later".
    #[error("lock {name} not acquired after {attempts} attempts")]
    NotAcquired { name: String, attempts: u32 },
}

struct LockEntry {
    generation: u64,
    expires_at: Instant,
}

/// Named mutual-exclusion locks, entity-scoped (`"rollout:<id>"`).
#[derive(Clone)]
pub struct LockManager {
    locks: Arc<Mutex<HashMap<String, LockEntry>>>,
    next_generation: Arc<Mutex<u64>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Arc::new(Mutex::new(0)),
        }
    }

    /// Attempt to take the named lock once. `None` means it is held and
    /// unexpired.
    pub fn try_acquire(&self, name: &str, ttl: Duration) -> Option<LockGuard> {
        let now = Instant::now();
        let mut locks = self.locks.lock().expect("lock table poisoned");

        if let Some(entry) = locks.get(name) {
            if entry.expires_at > now {
                return None;
            }
            // Expired holder: the TTL has passed, the entry is up for grabs.
            warn!(lock = %name, "expired lock reclaimed");
        }

        let generation = {
            let mut next = self.next_generation.lock().expect("generation poisoned");
            *next += 1;
            *next
        };
        locks.insert(
            name.to_string(),
            LockEntry {
                generation,
                expires_at: now + ttl,
            },
        );
        debug!(lock = %name, generation, "lock acquired");

        Some(LockGuard {
            locks: Arc::clone(&self.locks),
            name: name.to_string(),
            generation,
        })
    }

    /// Run `f` while holding the named lock, releasing on every exit path.
    ///
    /// Acquisition is retried with the policy's jittered delays; past the
    /// budget this returns [`LockError::NotAcquired`]. The closure's own
    /// result is passed through untouched.
    pub async fn with_lock<T, F, Fut>(
        &self,
        name: &str,
        ttl: Duration,
        policy: &BackoffPolicy,
        f: F,
    ) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let mut attempts = 0u32;
        let guard = loop {
            if let Some(guard) = self.try_acquire(name, ttl) {
                break guard;
            }
            attempts += 1;
            if attempts > policy.max_retries {
                warn!(lock = %name, attempts, "lock contention exhausted retry budget");
                return Err(LockError::NotAcquired {
                    name: name.to_string(),
                    attempts,
                });
            }
            tokio::time::sleep(policy.jittered_delay_for(attempts)).await;
        };

        let result = f().await;
        drop(guard);
        Ok(result)
    }

    /// Whether the named lock is currently held (and unexpired).
    pub fn is_held(&self, name: &str) -> bool {
        let now = Instant::now();
        let locks = self.locks.lock().expect("lock table poisoned");
        locks.get(name).is_some_and(|e| e.expires_at > now)
    }
}

/// Held lock; releases on drop if this holder still owns the entry.
pub struct LockGuard {
    locks: Arc<Mutex<HashMap<String, LockEntry>>>,
    name: String,
    generation: u64,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().expect("lock table poisoned");
        // Only release our own generation: if the TTL expired and someone
        // else reacquired, their entry stays.
        if locks.get(&self.name).is_some_and(|e| e.generation == self.generation) {
            locks.remove(&self.name);
            debug!(lock = %self.name, "lock released");
        }
    }
}
