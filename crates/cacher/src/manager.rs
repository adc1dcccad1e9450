//! Cache-aside manager with stampede protection and negative caching.
//!
//! ## Protocol
//!
//! 1. [`CacheManager::get_or_lock`] reads the key from the cache store
//! 2. A real value is a [`Lookup::Hit`]; the negative-cache marker is
//!    [`Lookup::ConfirmedAbsent`] and the caller must not recompute
//! 3. On a miss the manager takes the distributed fill lock for the key,
//!    reads once more, and hands the lock to the caller as [`Lookup::Fill`]
//! 4. The filler computes the value from the source of truth, stores it (or
//!    the nil marker) and releases the lock via [`CacheManager::store`] or
//!    [`CacheManager::safe_unlock`]
//!
//! A disabled manager answers every read with [`Lookup::Bypass`] (or nothing)
//! and never touches the network.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use cacher_core::keys;
use cacher_core::{
    CacheItem, CacheResult, CacheStore, DistributedMutex, DynCacheStore, LockHandle, NIL_MARKER,
    is_nil_marker,
};
use futures_util::{StreamExt, stream};

use crate::metrics::{CacheStats, StatsRecorder};

/// Outcome of a read that may hand out fill rights.
///
/// Exactly one of "value", "confirmed absent" or "caller must fill" holds, so
/// a value and a lock can never be returned together.
#[derive(Debug)]
pub enum Lookup<T = Vec<u8>> {
    /// The cached value.
    Hit(T),
    /// The key holds the negative-cache marker: the record does not exist.
    ConfirmedAbsent,
    /// Nothing is cached and the caller now owns the fill lock.
    Fill(LockHandle),
    /// Caching is disabled; go to the source of truth.
    Bypass,
}

impl<T> Lookup<T> {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }

    pub fn is_fill(&self) -> bool {
        matches!(self, Lookup::Fill(_))
    }

    /// The cached value, if any. A fill lock held by `self` is dropped
    /// without release and expires with its lease.
    pub fn into_value(self) -> Option<T> {
        match self {
            Lookup::Hit(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Hit(value) => Lookup::Hit(f(value)),
            Lookup::ConfirmedAbsent => Lookup::ConfirmedAbsent,
            Lookup::Fill(handle) => Lookup::Fill(handle),
            Lookup::Bypass => Lookup::Bypass,
        }
    }

    pub fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<Lookup<U>, E> {
        Ok(match self {
            Lookup::Hit(value) => Lookup::Hit(f(value)?),
            Lookup::ConfirmedAbsent => Lookup::ConfirmedAbsent,
            Lookup::Fill(handle) => Lookup::Fill(handle),
            Lookup::Bypass => Lookup::Bypass,
        })
    }
}

/// Runtime settings of a manager, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerSettings {
    /// TTL for items stored without one.
    pub default_ttl: Duration,
    /// TTL of the negative-cache marker.
    pub nil_ttl: Duration,
    /// Concurrent reads issued by [`CacheManager::get_many`].
    pub fan_out_concurrency: usize,
    pub disabled: bool,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(900),
            nil_ttl: Duration::from_secs(300),
            fan_out_concurrency: 8,
            disabled: false,
        }
    }
}

enum Backend {
    Disabled,
    Enabled {
        store: DynCacheStore,
        mutex: DistributedMutex,
    },
}

struct Inner {
    backend: Backend,
    settings: ManagerSettings,
    stats: StatsRecorder,
}

/// The interface the repository layer talks to.
///
/// Cheap to clone; clones share stores, settings and statistics.
#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<Inner>,
}

/// What a read is aimed at: a plain key or one field of a hash entry.
#[derive(Clone, Copy)]
enum Target<'a> {
    Key(&'a str),
    Member { identifier: &'a str, field: &'a str },
}

impl Target<'_> {
    async fn fetch(&self, store: &dyn CacheStore) -> CacheResult<Vec<u8>> {
        match *self {
            Target::Key(key) => store.get(key).await,
            Target::Member { identifier, field } => store.get_hash_member(identifier, field).await,
        }
    }

    fn lock_name(&self) -> String {
        match *self {
            Target::Key(key) => keys::lock_name(key),
            Target::Member { identifier, field } => keys::hash_member_lock_name(identifier, field),
        }
    }
}

impl fmt::Display for Target<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Key(key) => f.write_str(key),
            Target::Member { identifier, field } => write!(f, "{identifier}:{field}"),
        }
    }
}

enum Probe {
    Value(Vec<u8>),
    Nil,
    Absent,
}

async fn probe(store: &dyn CacheStore, target: Target<'_>) -> CacheResult<Probe> {
    match target.fetch(store).await {
        Ok(value) if is_nil_marker(&value) => Ok(Probe::Nil),
        Ok(value) => Ok(Probe::Value(value)),
        Err(e) if e.is_not_exist() => Ok(Probe::Absent),
        Err(e) => Err(e),
    }
}

impl CacheManager {
    /// Creates a manager over a cache store and a mutex on a separate lock store.
    ///
    /// With `settings.disabled` set the stores are dropped and never used.
    pub fn new(store: DynCacheStore, mutex: DistributedMutex, settings: ManagerSettings) -> Self {
        let backend = if settings.disabled {
            Backend::Disabled
        } else {
            Backend::Enabled { store, mutex }
        };
        Self {
            inner: Arc::new(Inner {
                backend,
                settings,
                stats: StatsRecorder::default(),
            }),
        }
    }

    /// A manager that bypasses caching entirely.
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(Inner {
                backend: Backend::Disabled,
                settings: ManagerSettings {
                    disabled: true,
                    ..ManagerSettings::default()
                },
                stats: StatsRecorder::default(),
            }),
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self.inner.backend, Backend::Disabled)
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.inner.settings
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }

    pub fn backend_name(&self) -> &'static str {
        match &self.inner.backend {
            Backend::Disabled => "disabled",
            Backend::Enabled { store, .. } => store.backend_name(),
        }
    }

    fn enabled(&self) -> Option<(&dyn CacheStore, &DistributedMutex)> {
        match &self.inner.backend {
            Backend::Disabled => None,
            Backend::Enabled { store, mutex } => Some((store.as_ref(), mutex)),
        }
    }

    /// Reads `key`, or claims the right to fill it.
    ///
    /// Across all processes sharing the lock store, at most one caller holds
    /// [`Lookup::Fill`] for a key at a time. Callers that lose the race wait
    /// within the lock retry budget and then see the winner's value.
    ///
    /// # Errors
    ///
    /// - `CacheError::LockTimeout` when the fill lock stayed busy for the
    ///   whole retry budget
    /// - `CacheError::Unavailable`/`Timeout` when a store could not be reached
    pub async fn get_or_lock(&self, key: &str) -> CacheResult<Lookup> {
        self.lookup(Target::Key(key)).await
    }

    /// [`get_or_lock`](Self::get_or_lock) for one field of a hash entry.
    ///
    /// The fill lock is scoped to the field, not the whole entry.
    pub async fn get_hash_member_or_lock(
        &self,
        identifier: &str,
        field: &str,
    ) -> CacheResult<Lookup> {
        self.lookup(Target::Member { identifier, field }).await
    }

    async fn lookup(&self, target: Target<'_>) -> CacheResult<Lookup> {
        let Some((store, mutex)) = self.enabled() else {
            return Ok(Lookup::Bypass);
        };
        let backend = store.backend_name();
        let stats = &self.inner.stats;

        match probe(store, target).await? {
            Probe::Value(value) => {
                stats.hit(backend);
                tracing::debug!(key = %target, "cache hit");
                return Ok(Lookup::Hit(value));
            }
            Probe::Nil => {
                stats.nil_hit(backend);
                tracing::debug!(key = %target, "cache hit (confirmed absent)");
                return Ok(Lookup::ConfirmedAbsent);
            }
            Probe::Absent => {
                stats.miss(backend);
                tracing::debug!(key = %target, "cache miss");
            }
        }

        let handle = match mutex.acquire(&target.lock_name()).await {
            Ok(handle) => handle,
            Err(e) => {
                if e.is_lock_timeout() {
                    stats.lock_timeout(backend);
                    tracing::warn!(key = %target, error = %e, "could not obtain fill lock");
                }
                return Err(e);
            }
        };

        // Another filler may have finished while we waited for the lock.
        match probe(store, target).await {
            Ok(Probe::Absent) => {
                stats.fill(backend);
                tracing::debug!(key = %target, lock = %handle.name(), "fill lock granted");
                Ok(Lookup::Fill(handle))
            }
            Ok(Probe::Value(value)) => {
                stats.hit(backend);
                tracing::debug!(key = %target, "cache hit after lock wait");
                self.safe_unlock(Some(handle)).await;
                Ok(Lookup::Hit(value))
            }
            Ok(Probe::Nil) => {
                stats.nil_hit(backend);
                tracing::debug!(key = %target, "confirmed absent after lock wait");
                self.safe_unlock(Some(handle)).await;
                Ok(Lookup::ConfirmedAbsent)
            }
            Err(e) => {
                self.safe_unlock(Some(handle)).await;
                Err(e)
            }
        }
    }

    /// Plain read without fill rights. The nil marker reads as `None`.
    pub async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.read(Target::Key(key)).await
    }

    pub async fn get_hash_member(
        &self,
        identifier: &str,
        field: &str,
    ) -> CacheResult<Option<Vec<u8>>> {
        self.read(Target::Member { identifier, field }).await
    }

    async fn read(&self, target: Target<'_>) -> CacheResult<Option<Vec<u8>>> {
        let Some((store, _)) = self.enabled() else {
            return Ok(None);
        };
        let backend = store.backend_name();
        match probe(store, target).await? {
            Probe::Value(value) => {
                self.inner.stats.hit(backend);
                Ok(Some(value))
            }
            Probe::Nil => {
                self.inner.stats.nil_hit(backend);
                Ok(None)
            }
            Probe::Absent => {
                self.inner.stats.miss(backend);
                Ok(None)
            }
        }
    }

    /// Reads several keys with bounded concurrency.
    ///
    /// Results line up with `keys`. The first store error aborts the batch.
    pub async fn get_many<K>(&self, keys: &[K]) -> CacheResult<Vec<Option<Vec<u8>>>>
    where
        K: AsRef<str> + Sync,
    {
        if self.is_disabled() {
            return Ok(keys.iter().map(|_| None).collect());
        }
        let limit = self.inner.settings.fan_out_concurrency.max(1);
        let results: Vec<CacheResult<Option<Vec<u8>>>> = stream::iter(keys)
            .map(|key| self.get(key.as_ref()))
            .buffered(limit)
            .collect()
            .await;
        results.into_iter().collect()
    }

    /// Stores the item and then releases the fill lock, even if the write fails.
    pub async fn store(&self, lock: Option<LockHandle>, item: CacheItem) -> CacheResult<()> {
        let result = self.store_without_blocking(item).await;
        self.safe_unlock(lock).await;
        result
    }

    /// Writes the item without taking or waiting on any lock. Last write wins.
    pub async fn store_without_blocking(&self, item: CacheItem) -> CacheResult<()> {
        let Some((store, _)) = self.enabled() else {
            return Ok(());
        };
        let ttl = item.effective_ttl(self.inner.settings.default_ttl);
        store.set(item.key(), item.value(), ttl).await
    }

    /// Writes several items in one round trip.
    pub async fn store_multi_without_blocking(&self, items: &[CacheItem]) -> CacheResult<()> {
        let Some((store, _)) = self.enabled() else {
            return Ok(());
        };
        store
            .set_many(items, self.inner.settings.default_ttl)
            .await
    }

    /// Marks `key` as confirmed absent for the nil TTL.
    pub async fn store_nil(&self, key: &str) -> CacheResult<()> {
        let Some((store, _)) = self.enabled() else {
            return Ok(());
        };
        let item = CacheItem::new(key, NIL_MARKER)?;
        tracing::debug!(key = %key, "storing nil marker");
        store
            .set(item.key(), item.value(), self.inner.settings.nil_ttl)
            .await
    }

    /// Writes `item.value` under field `item.key` of the hash `identifier`.
    ///
    /// The TTL applies to the whole hash entry.
    pub async fn store_hash_member(&self, identifier: &str, item: CacheItem) -> CacheResult<()> {
        let Some((store, _)) = self.enabled() else {
            return Ok(());
        };
        let ttl = item.effective_ttl(self.inner.settings.default_ttl);
        store
            .set_hash_member(identifier, item.key(), item.value(), ttl)
            .await
    }

    /// Removes keys unconditionally. Keys that were never cached are fine.
    pub async fn delete_by_keys<I, K>(&self, keys: I) -> CacheResult<()>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let Some((store, _)) = self.enabled() else {
            return Ok(());
        };
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        if keys.is_empty() {
            return Ok(());
        }
        store.delete(&keys).await
    }

    pub async fn delete_hash_member(&self, identifier: &str, field: &str) -> CacheResult<()> {
        let Some((store, _)) = self.enabled() else {
            return Ok(());
        };
        store.delete_hash_member(identifier, field).await
    }

    /// Releases a fill lock if there is one.
    ///
    /// Never fails: a stale or foreign handle is a no-op and store errors are
    /// logged, since the lease frees the lock anyway.
    pub async fn safe_unlock(&self, lock: Option<LockHandle>) {
        let Some(handle) = lock else {
            return;
        };
        let Some((_, mutex)) = self.enabled() else {
            return;
        };
        let name = handle.name().to_string();
        if let Err(e) = mutex.release(handle).await {
            tracing::warn!(lock = %name, error = %e, "failed to release fill lock");
        }
    }

    /// Takes the fill lock for `key` without reading the cache.
    ///
    /// Returns `None` when caching is disabled.
    pub async fn acquire_lock(&self, key: &str) -> CacheResult<Option<LockHandle>> {
        let Some((_, mutex)) = self.enabled() else {
            return Ok(None);
        };
        mutex.acquire(&keys::lock_name(key)).await.map(Some)
    }

    pub async fn check_key_exist(&self, key: &str) -> CacheResult<bool> {
        let Some((store, _)) = self.enabled() else {
            return Ok(false);
        };
        store.exists(key).await
    }

    /// Resets the TTL of `key`.
    pub async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<()> {
        let Some((store, _)) = self.enabled() else {
            return Ok(());
        };
        store.expire(key, ttl).await
    }

    /// Atomically increments a counter, starting from 1. `None` when disabled.
    pub async fn increase_cached_value_by_one(&self, key: &str) -> CacheResult<Option<i64>> {
        let Some((store, _)) = self.enabled() else {
            return Ok(None);
        };
        store.increment(key).await.map(Some)
    }
}

impl fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheManager")
            .field("backend", &self.backend_name())
            .field("settings", &self.inner.settings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cacher_core::LockOptions;
    use cacher_memory::create_memory_stores;

    fn manager() -> CacheManager {
        let (store, locks) = create_memory_stores();
        CacheManager::new(
            store,
            DistributedMutex::new(locks, LockOptions::default()),
            ManagerSettings::default(),
        )
    }

    #[test]
    fn test_lookup_map_keeps_lock() {
        let lookup: Lookup<Vec<u8>> = Lookup::Fill(LockHandle::new("lock:k", "t"));
        let mapped = lookup.map(|v| v.len());
        assert!(mapped.is_fill());

        let hit = Lookup::Hit(b"abc".to_vec()).map(|v| v.len());
        assert_eq!(hit.into_value(), Some(3));
    }

    #[test]
    fn test_target_display_and_lock_name() {
        let key = Target::Key("cache:object:employee:id:1");
        assert_eq!(key.to_string(), "cache:object:employee:id:1");
        assert_eq!(key.lock_name(), "lock:cache:object:employee:id:1");

        let member = Target::Member {
            identifier: "employees",
            field: "7",
        };
        assert_eq!(member.to_string(), "employees:7");
        assert_eq!(member.lock_name(), "lock:employees:7");
    }

    #[tokio::test]
    async fn test_settings_disable_flag_builds_disabled_manager() {
        let (store, locks) = create_memory_stores();
        let manager = CacheManager::new(
            store,
            DistributedMutex::new(locks, LockOptions::default()),
            ManagerSettings {
                disabled: true,
                ..ManagerSettings::default()
            },
        );
        assert!(manager.is_disabled());
        assert_eq!(manager.backend_name(), "disabled");
        assert!(matches!(manager.get_or_lock("k").await.unwrap(), Lookup::Bypass));
    }

    #[tokio::test]
    async fn test_get_counts_nil_as_absent() {
        let manager = manager();
        manager.store_nil("employee:999").await.unwrap();
        assert_eq!(manager.get("employee:999").await.unwrap(), None);
        let stats = manager.stats();
        assert_eq!(stats.nil_hits, 1);
        assert_eq!(stats.misses, 0);
    }

    #[tokio::test]
    async fn test_store_releases_lock() {
        let manager = manager();
        let Lookup::Fill(handle) = manager.get_or_lock("k").await.unwrap() else {
            panic!("expected fill rights on a cold key");
        };
        let item = CacheItem::new("k", b"v".to_vec()).unwrap();
        manager.store(Some(handle), item).await.unwrap();

        // A fresh lock on the same key proves the fill lock was released.
        let lock = manager.acquire_lock("k").await.unwrap();
        assert!(lock.is_some());
        manager.safe_unlock(lock).await;
    }

    #[tokio::test]
    async fn test_store_nil_rejects_empty_key() {
        let manager = manager();
        let err = manager.store_nil("").await.unwrap_err();
        assert!(matches!(err, cacher_core::CacheError::InvalidItem { .. }));
    }
}
