//! In-process cache and lock stores for cacher.
//!
//! These implement the `CacheStore` and `LockStore` traits from
//! `cacher-core` on top of `DashMap`. They back the single-instance
//! ("local") mode and serve as the test double for the cache manager.
//!
//! # Example
//!
//! ```ignore
//! use cacher_memory::{MemoryCacheStore, MemoryLockStore};
//!
//! let store = MemoryCacheStore::new();
//! store.set("employee:1", b"{}", Duration::from_secs(60)).await?;
//! ```

pub mod lock;
pub mod store;

pub use lock::MemoryLockStore;
pub use store::MemoryCacheStore;

use cacher_core::{DynCacheStore, DynLockStore};

/// Creates a fresh pair of in-process stores.
pub fn create_memory_stores() -> (DynCacheStore, DynLockStore) {
    (
        std::sync::Arc::new(MemoryCacheStore::new()),
        std::sync::Arc::new(MemoryLockStore::new()),
    )
}
