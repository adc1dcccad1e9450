//! JSON helpers for repositories caching serde types.
//!
//! Payloads are stored as JSON. Note that a value serializing to `null` is
//! indistinguishable from the negative-cache marker and reads back as
//! [`Lookup::ConfirmedAbsent`].

use std::future::Future;
use std::time::Duration;

use cacher_core::{CacheError, CacheResult, ErrorCategory, new_item};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::manager::{CacheManager, Lookup};

fn decode<T: DeserializeOwned>(key: &str, lookup: Lookup) -> CacheResult<Lookup<T>> {
    lookup.try_map(|bytes| serde_json::from_slice(&bytes).map_err(|e| CacheError::decode(key, e)))
}

impl CacheManager {
    /// [`get_or_lock`](Self::get_or_lock) decoding the cached payload as JSON.
    ///
    /// A payload that does not decode is deleted and the read continues down
    /// the miss path, so the caller usually ends up with fill rights.
    pub async fn get_or_lock_json<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Lookup<T>> {
        match decode(key, self.get_or_lock(key).await?) {
            Err(e) if e.category() == ErrorCategory::Serialization => {
                tracing::warn!(key = %key, error = %e, "discarding undecodable cache entry");
                self.delete_by_keys([key]).await?;
                decode(key, self.get_or_lock(key).await?)
            }
            other => other,
        }
    }

    /// Serializes `value` as JSON and writes it without blocking.
    pub async fn store_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        if self.is_disabled() {
            return Ok(());
        }
        let item = new_item(key, serde_json::to_vec(value)?, ttl)?;
        self.store_without_blocking(item).await
    }

    /// Full read-through: cached value, or `load` from the source of truth.
    ///
    /// `Ok(None)` from `load` is negative-cached. Cache failures never fail
    /// the call; they degrade to loading without caching. When the fill lock
    /// stays busy the value is loaded and written without the lock.
    pub async fn get_or_set_json<T, E, F, Fut>(&self, key: &str, load: F) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let lookup = match self.get_or_lock_json::<T>(key).await {
            Ok(lookup) => lookup,
            Err(e) if e.is_lock_timeout() => {
                let loaded = load().await?;
                if let Some(value) = &loaded {
                    if let Err(e) = self.store_json(key, value, None).await {
                        tracing::warn!(key = %key, error = %e, "failed to cache loaded value");
                    }
                }
                return Ok(loaded);
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, category = %e.category(), "cache read failed, loading from source");
                return load().await;
            }
        };

        match lookup {
            Lookup::Hit(value) => Ok(Some(value)),
            Lookup::ConfirmedAbsent => Ok(None),
            Lookup::Bypass => load().await,
            Lookup::Fill(handle) => {
                let loaded = load().await;
                let written = match &loaded {
                    Ok(Some(value)) => self.store_json(key, value, None).await,
                    Ok(None) => self.store_nil(key).await,
                    Err(_) => Ok(()),
                };
                if let Err(e) = written {
                    tracing::warn!(key = %key, error = %e, "failed to populate cache");
                }
                self.safe_unlock(Some(handle)).await;
                loaded
            }
        }
    }
}
