//! # cacher
//!
//! Distributed read-through cache layer sitting between a repository and its
//! datastore.
//!
//! - Hot reads are served from a shared cache store
//! - A distributed mutex on a separate lock store keeps concurrent processes
//!   from recomputing the same missing key
//! - "Not found" results are negative-cached under a shorter TTL
//! - A kill-switch bypasses caching entirely
//!
//! ## Usage
//!
//! ```ignore
//! let config = cacher::config::loader::load_config(None)?;
//! cacher::observability::init_from_config(&config);
//! let cache = cacher::connect_or_disable(&config).await;
//!
//! let key = keys::object_key("employee", id);
//! match cache.get_or_lock(&key).await? {
//!     Lookup::Hit(bytes) => decode(bytes),
//!     Lookup::ConfirmedAbsent => not_found(),
//!     Lookup::Fill(lock) => {
//!         let row = db.find(id).await?;
//!         cache.store(Some(lock), new_item(&key, encode(&row), None)?).await?;
//!         row
//!     }
//!     Lookup::Bypass => db.find(id).await?,
//! }
//! ```

use std::sync::Arc;

use cacher_core::{DistributedMutex, DynCacheStore, DynLockStore};

pub mod config;
pub mod manager;
pub mod metrics;
pub mod observability;
mod typed;

pub use cacher_core::{
    CacheError, CacheItem, CacheResult, ErrorCategory, LockHandle, LockOptions, MultiResponse,
    keys, new_item,
};
pub use config::{CacheMode, CacherConfig};
pub use manager::{CacheManager, Lookup, ManagerSettings};
pub use metrics::CacheStats;

/// Builds a cache manager from configuration.
///
/// In redis mode two pools are created (cache and lock instances) and both
/// are pinged before the manager is returned.
pub async fn connect(config: &CacherConfig) -> CacheResult<CacheManager> {
    config.validate().map_err(CacheError::configuration)?;

    if config.disable_caching {
        tracing::info!("Caching disabled by configuration");
        return Ok(CacheManager::disabled());
    }

    let (store, locks): (DynCacheStore, DynLockStore) = match config.mode {
        CacheMode::Local => cacher_memory::create_memory_stores(),
        CacheMode::Redis => {
            let cache_store = cacher_redis::create_cache_store(&config.cache_endpoint())?;
            let lock_store = cacher_redis::create_lock_store(&config.lock_endpoint())?;
            cacher_redis::ping(cache_store.pool()).await?;
            cacher_redis::ping(lock_store.pool()).await?;
            let cache_store: DynCacheStore = Arc::new(cache_store);
            let lock_store: DynLockStore = Arc::new(lock_store);
            (cache_store, lock_store)
        }
    };

    tracing::info!(
        mode = %config.mode,
        default_ttl_secs = config.cache.default_ttl_secs,
        nil_ttl_secs = config.cache.nil_ttl_secs,
        "Cache manager initialized"
    );

    Ok(CacheManager::new(
        store,
        DistributedMutex::new(locks, config.lock_options()),
        config.manager_settings(),
    ))
}

/// Like [`connect`], but falls back to a disabled manager when the stores
/// cannot be set up. The cache is an optimization, so startup proceeds.
pub async fn connect_or_disable(config: &CacherConfig) -> CacheManager {
    match connect(config).await {
        Ok(manager) => manager,
        Err(e) => {
            tracing::warn!(
                error = %e,
                mode = %config.mode,
                "Failed to initialize cache, falling back to disabled caching"
            );
            CacheManager::disabled()
        }
    }
}
