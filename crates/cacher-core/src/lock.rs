//! Distributed mutex used to coordinate cache fills across processes.
//!
//! ## How It Works
//!
//! 1. `acquire` writes a random token under the lock name with a lease, only
//!    if nobody holds it (`SET NX PX` on Redis)
//! 2. On contention it retries with exponential backoff plus jitter, up to
//!    `tries` attempts, then fails with `LockTimeout`
//! 3. `release` deletes the lock only if it still carries our token, so a
//!    holder whose lease already expired cannot free someone else's lock
//!
//! The lease expires in the lock store even if the holder crashes or its task
//! is cancelled, so a key can never be wedged forever.

use std::time::Duration;

use rand::Rng;

use crate::error::{CacheError, CacheResult};
use crate::traits::DynLockStore;

/// Ownership of a distributed lock.
///
/// Deliberately not `Clone`: exactly one task owns a handle and gives it up
/// by passing it to [`DistributedMutex::release`].
#[derive(Debug, PartialEq, Eq)]
pub struct LockHandle {
    name: String,
    token: String,
}

impl LockHandle {
    /// Rebuilds a handle from its parts.
    ///
    /// Releasing a handle that never owned the lock is a no-op.
    pub fn new(name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            token: token.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Lease and retry budget for lock acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOptions {
    /// How long the lock stays held without an explicit release.
    pub lease: Duration,
    /// Maximum number of acquisition attempts (at least 1).
    pub tries: u32,
    /// Pause after the first failed attempt; doubled after each further one.
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(60),
            tries: 8,
            retry_delay: Duration::from_millis(50),
            max_retry_delay: Duration::from_secs(1),
        }
    }
}

impl LockOptions {
    /// Upper bound of the time `acquire` can spend sleeping between attempts.
    pub fn max_wait(&self) -> Duration {
        let mut total = Duration::ZERO;
        let mut delay = self.retry_delay;
        for _ in 1..self.tries.max(1) {
            total += delay + delay / 2;
            delay = (delay * 2).min(self.max_retry_delay);
        }
        total
    }
}

/// Named, lease-bounded mutual exclusion over a [`LockStore`](crate::LockStore).
#[derive(Clone)]
pub struct DistributedMutex {
    store: DynLockStore,
    options: LockOptions,
}

impl DistributedMutex {
    pub fn new(store: DynLockStore, options: LockOptions) -> Self {
        Self { store, options }
    }

    pub fn options(&self) -> &LockOptions {
        &self.options
    }

    /// Acquires the lock `name`, retrying with backoff within the configured budget.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::LockTimeout` once every attempt found the lock
    /// held, or the lock store error if the store could not be reached.
    pub async fn acquire(&self, name: &str) -> CacheResult<LockHandle> {
        let token = uuid::Uuid::new_v4().to_string();
        let tries = self.options.tries.max(1);
        let mut delay = self.options.retry_delay;

        for attempt in 1..=tries {
            if self
                .store
                .try_lock(name, &token, self.options.lease)
                .await?
            {
                tracing::debug!(lock = %name, attempt, "lock acquired");
                return Ok(LockHandle::new(name, token));
            }

            if attempt < tries {
                tokio::time::sleep(jittered(delay)).await;
                delay = (delay * 2).min(self.options.max_retry_delay);
            }
        }

        tracing::debug!(lock = %name, attempts = tries, "lock acquisition timed out");
        Err(CacheError::lock_timeout(name, tries))
    }

    /// Releases a lock. Releasing an expired or foreign lock is a no-op.
    pub async fn release(&self, handle: LockHandle) -> CacheResult<()> {
        if self.store.unlock(&handle.name, &handle.token).await? {
            tracing::debug!(lock = %handle.name, "lock released");
        } else {
            tracing::debug!(lock = %handle.name, "lock was not held by this handle");
        }
        Ok(())
    }

    pub async fn is_locked(&self, name: &str) -> CacheResult<bool> {
        self.store.is_locked(name).await
    }
}

impl std::fmt::Debug for DistributedMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedMutex")
            .field("backend", &self.store.backend_name())
            .field("options", &self.options)
            .finish()
    }
}

// Spread retries of competing waiters so they do not hit the store in lockstep.
fn jittered(delay: Duration) -> Duration {
    let half = u64::try_from(delay.as_millis() / 2).unwrap_or(u64::MAX);
    if half == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=half))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::LockStore;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Lock store without leases, enough to exercise retry and token checks.
    #[derive(Default)]
    struct TestLockStore {
        held: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl LockStore for TestLockStore {
        async fn try_lock(&self, name: &str, token: &str, _lease: Duration) -> CacheResult<bool> {
            let mut held = self.held.lock().unwrap();
            if held.contains_key(name) {
                return Ok(false);
            }
            held.insert(name.to_string(), token.to_string());
            Ok(true)
        }

        async fn unlock(&self, name: &str, token: &str) -> CacheResult<bool> {
            let mut held = self.held.lock().unwrap();
            if held.get(name).map(String::as_str) == Some(token) {
                held.remove(name);
                return Ok(true);
            }
            Ok(false)
        }

        async fn is_locked(&self, name: &str) -> CacheResult<bool> {
            Ok(self.held.lock().unwrap().contains_key(name))
        }

        fn backend_name(&self) -> &'static str {
            "test"
        }
    }

    fn fast_options(tries: u32) -> LockOptions {
        LockOptions {
            lease: Duration::from_secs(5),
            tries,
            retry_delay: Duration::from_millis(1),
            max_retry_delay: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let mutex = DistributedMutex::new(Arc::new(TestLockStore::default()), fast_options(3));

        let handle = mutex.acquire("lock:employee:1").await.unwrap();
        assert_eq!(handle.name(), "lock:employee:1");
        assert!(mutex.is_locked("lock:employee:1").await.unwrap());

        mutex.release(handle).await.unwrap();
        assert!(!mutex.is_locked("lock:employee:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_contended_acquire_times_out() {
        let mutex = DistributedMutex::new(Arc::new(TestLockStore::default()), fast_options(3));

        let _held = mutex.acquire("lock:k").await.unwrap();
        let err = mutex.acquire("lock:k").await.unwrap_err();
        match err {
            CacheError::LockTimeout { name, attempts } => {
                assert_eq!(name, "lock:k");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected LockTimeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_release_with_foreign_token_is_noop() {
        let mutex = DistributedMutex::new(Arc::new(TestLockStore::default()), fast_options(1));

        let handle = mutex.acquire("lock:k").await.unwrap();
        mutex
            .release(LockHandle::new("lock:k", "not-my-token"))
            .await
            .unwrap();
        assert!(mutex.is_locked("lock:k").await.unwrap());

        let token = handle.token().to_string();
        mutex.release(handle).await.unwrap();
        // Releasing the same lock again is harmless.
        mutex.release(LockHandle::new("lock:k", token)).await.unwrap();
        assert!(!mutex.is_locked("lock:k").await.unwrap());
    }

    #[test]
    fn test_zero_tries_still_attempts_once() {
        let mutex = DistributedMutex::new(Arc::new(TestLockStore::default()), fast_options(0));
        let handle = tokio_test::block_on(mutex.acquire("lock:once")).unwrap();
        assert_eq!(handle.name(), "lock:once");
    }

    #[test]
    fn test_max_wait_is_bounded() {
        let options = LockOptions::default();
        assert!(options.max_wait() < Duration::from_secs(10));
        assert_eq!(fast_options(1).max_wait(), Duration::ZERO);
    }

    #[test]
    fn test_jitter_stays_within_half_delay() {
        for _ in 0..100 {
            let d = jittered(Duration::from_millis(100));
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(150));
        }
    }
}
