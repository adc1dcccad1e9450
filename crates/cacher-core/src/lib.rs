//! # cacher-core
//!
//! Shared model for the cacher workspace: cache items and keys, the error
//! taxonomy, the [`CacheStore`] and [`LockStore`] traits every backend
//! implements, and the [`DistributedMutex`] built on top of a lock store.
//!
//! Backends live in separate crates (`cacher-memory`, `cacher-redis`); the
//! cache-aside protocol itself lives in `cacher`.

pub mod error;
pub mod item;
pub mod keys;
pub mod lock;
mod traits;
pub mod types;

pub use error::{CacheError, CacheResult, ErrorCategory};
pub use item::{CacheItem, NIL_MARKER, is_nil_marker, new_item};
pub use lock::{DistributedMutex, LockHandle, LockOptions};
pub use traits::{CacheStore, DynCacheStore, DynLockStore, LockStore};
pub use types::MultiResponse;
