//! Redis backends for cacher.
//!
//! ## Architecture
//!
//! - **Cache store**: shared payloads, one pool per process
//! - **Lock store**: fill locks, on a separate Redis instance with its own pool
//!
//! Keeping the two on distinct instances means lock contention can never
//! starve ordinary cache traffic.
//!
//! All connections come from `deadpool-redis` pools and are returned when
//! dropped, so every exit path of every call gives its connection back.

pub mod lock;
pub mod pool;
pub mod store;

pub use lock::RedisLockStore;
pub use pool::{RedisEndpoint, create_pool, ping};
pub use store::RedisCacheStore;

use cacher_core::CacheResult;

/// Builds a cache store for `endpoint`.
pub fn create_cache_store(endpoint: &RedisEndpoint) -> CacheResult<RedisCacheStore> {
    let pool = create_pool(endpoint)?;
    Ok(RedisCacheStore::new(
        pool,
        endpoint.read_timeout,
        endpoint.write_timeout,
    ))
}

/// Builds a lock store for `endpoint`.
///
/// Lock commands are writes, so they run under the write timeout.
pub fn create_lock_store(endpoint: &RedisEndpoint) -> CacheResult<RedisLockStore> {
    let pool = create_pool(endpoint)?;
    Ok(RedisLockStore::new(pool, endpoint.write_timeout))
}
