//! Store traits implemented by every cache backend.
//!
//! [`CacheStore`] is the shared key/value store holding cached payloads and
//! [`LockStore`] is the store backing the distributed mutex. In production
//! these are two distinct Redis instances so lock traffic never starves cache
//! traffic.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheResult;
use crate::item::CacheItem;

/// Accessor over the shared cache store.
///
/// Implementations must be thread-safe and must hand every borrowed
/// connection back to its pool on every exit path, including errors.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Reads a key, checking existence and fetching the value as one atomic unit.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::KeyNotExist` when the key is absent. A malformed
    /// existence reply is reported the same way.
    async fn get(&self, key: &str) -> CacheResult<Vec<u8>>;

    /// Reads one field of a hash entry with the same atomicity as [`get`](Self::get).
    async fn get_hash_member(&self, identifier: &str, field: &str) -> CacheResult<Vec<u8>>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Writes a value with the given TTL, replacing any previous value.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()>;

    /// Writes several items in one round trip. Items without a TTL use `default_ttl`.
    async fn set_many(&self, items: &[CacheItem], default_ttl: Duration) -> CacheResult<()>;

    /// Writes one field of a hash entry and refreshes the TTL of the whole entry.
    async fn set_hash_member(
        &self,
        identifier: &str,
        field: &str,
        value: &[u8],
        ttl: Duration,
    ) -> CacheResult<()>;

    /// Removes keys. Keys that do not exist are ignored.
    async fn delete(&self, keys: &[String]) -> CacheResult<()>;

    async fn delete_hash_member(&self, identifier: &str, field: &str) -> CacheResult<()>;

    /// Resets the TTL of an existing key. Missing keys are ignored.
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<()>;

    /// Atomically increments an integer value, creating it at 1 if absent.
    async fn increment(&self, key: &str) -> CacheResult<i64>;

    /// Short backend identifier used in logs ("redis", "memory").
    fn backend_name(&self) -> &'static str;
}

/// Primitive operations backing the distributed mutex.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Sets `name` to `token` with a lease, only if `name` is not held.
    ///
    /// Returns `true` if the lock was taken.
    async fn try_lock(&self, name: &str, token: &str, lease: Duration) -> CacheResult<bool>;

    /// Deletes `name` only if it is still held with `token`.
    ///
    /// Returns `true` if this call released the lock.
    async fn unlock(&self, name: &str, token: &str) -> CacheResult<bool>;

    async fn is_locked(&self, name: &str) -> CacheResult<bool>;

    fn backend_name(&self) -> &'static str;
}

/// Type alias for a shareable cache store.
pub type DynCacheStore = Arc<dyn CacheStore>;

/// Type alias for a shareable lock store.
pub type DynLockStore = Arc<dyn LockStore>;
