//! Cache item model.
//!
//! A [`CacheItem`] is produced fresh for every store call and never mutated
//! afterwards. The TTL is optional; stores fall back to the manager's
//! default TTL when it is absent.

use std::time::Duration;

use crate::error::{CacheError, CacheResult};

/// Sentinel payload stored for keys whose authoritative lookup found nothing.
///
/// It is the JSON encoding of null, so a typed decode of a nil-marked entry
/// also yields "no value".
pub const NIL_MARKER: &[u8] = b"null";

/// Returns true if a stored payload is the nil sentinel.
pub fn is_nil_marker(value: &[u8]) -> bool {
    value == NIL_MARKER
}

/// A value to be written to the cache store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheItem {
    key: String,
    value: Vec<u8>,
    ttl: Option<Duration>,
}

impl CacheItem {
    /// Creates an item without an explicit TTL.
    ///
    /// Fails with [`CacheError::InvalidItem`] when the key is empty.
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> CacheResult<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(CacheError::invalid_item("cache key must not be empty"));
        }
        Ok(Self {
            key,
            value: value.into(),
            ttl: None,
        })
    }

    /// Returns a copy of this item with the given TTL.
    ///
    /// A zero TTL is treated as "use the default".
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = (!ttl.is_zero()).then_some(ttl);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// TTL to apply when writing, falling back to `default_ttl`.
    pub fn effective_ttl(&self, default_ttl: Duration) -> Duration {
        self.ttl.unwrap_or(default_ttl)
    }

    pub fn into_parts(self) -> (String, Vec<u8>, Option<Duration>) {
        (self.key, self.value, self.ttl)
    }
}

/// Pure constructor mirroring the manager API: key, value and optional TTL.
pub fn new_item(
    key: impl Into<String>,
    value: impl Into<Vec<u8>>,
    ttl: Option<Duration>,
) -> CacheResult<CacheItem> {
    let item = CacheItem::new(key, value)?;
    Ok(match ttl {
        Some(ttl) => item.with_ttl(ttl),
        None => item,
    })
}
