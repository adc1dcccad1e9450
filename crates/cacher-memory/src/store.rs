//! DashMap-backed cache store with TTL support.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cacher_core::{CacheError, CacheItem, CacheResult, CacheStore};
use dashmap::DashMap;

const WRONG_TYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

#[derive(Debug, Clone)]
enum EntryData {
    Value(Arc<Vec<u8>>),
    Hash(HashMap<String, Vec<u8>>),
}

/// A cached entry with an optional expiry.
#[derive(Debug, Clone)]
struct CachedEntry {
    data: EntryData,
    expires_at: Option<Instant>,
}

/// Expiry instant for a TTL; `None` (never expires) when it does not fit in an `Instant`.
fn deadline(now: Instant, ttl: Duration) -> Option<Instant> {
    now.checked_add(ttl)
}

impl CachedEntry {
    fn value(data: Vec<u8>, ttl: Duration) -> Self {
        Self {
            data: EntryData::Value(Arc::new(data)),
            expires_at: deadline(Instant::now(), ttl),
        }
    }

    fn hash(ttl: Duration) -> Self {
        Self {
            data: EntryData::Hash(HashMap::new()),
            expires_at: deadline(Instant::now(), ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Single-instance cache store.
///
/// Every read of a key happens under that key's shard lock, so the existence
/// check and the fetch cannot interleave with a concurrent writer. Expired
/// entries are dropped lazily on access or by [`cleanup_expired`](Self::cleanup_expired).
#[derive(Debug, Default, Clone)]
pub struct MemoryCacheStore {
    entries: Arc<DashMap<String, CachedEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, including ones that expired but were not yet dropped.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes all expired entries and returns how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    fn drop_if_expired(&self, key: &str, now: Instant) {
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> CacheResult<Vec<u8>> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return match &entry.data {
                    EntryData::Value(data) => Ok(data.as_ref().clone()),
                    EntryData::Hash(_) => Err(CacheError::unavailable("get", key, WRONG_TYPE)),
                };
            }
        }
        self.drop_if_expired(key, now);
        Err(CacheError::key_not_exist(key))
    }

    async fn get_hash_member(&self, identifier: &str, field: &str) -> CacheResult<Vec<u8>> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(identifier) {
            if !entry.is_expired(now) {
                return match &entry.data {
                    EntryData::Hash(fields) => fields
                        .get(field)
                        .cloned()
                        .ok_or_else(|| CacheError::key_not_exist(format!("{identifier}:{field}"))),
                    EntryData::Value(_) => {
                        Err(CacheError::unavailable("hget", identifier, WRONG_TYPE))
                    }
                };
            }
        }
        self.drop_if_expired(identifier, now);
        Err(CacheError::key_not_exist(format!("{identifier}:{field}")))
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now)))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        self.entries
            .insert(key.to_string(), CachedEntry::value(value.to_vec(), ttl));
        tracing::trace!(key = %key, ttl_ms = ttl.as_millis() as u64, "memory cache set");
        Ok(())
    }

    async fn set_many(&self, items: &[CacheItem], default_ttl: Duration) -> CacheResult<()> {
        for item in items {
            self.entries.insert(
                item.key().to_string(),
                CachedEntry::value(item.value().to_vec(), item.effective_ttl(default_ttl)),
            );
        }
        Ok(())
    }

    async fn set_hash_member(
        &self,
        identifier: &str,
        field: &str,
        value: &[u8],
        ttl: Duration,
    ) -> CacheResult<()> {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(identifier.to_string())
            .or_insert_with(|| CachedEntry::hash(ttl));

        if entry.is_expired(now) {
            *entry = CachedEntry::hash(ttl);
        }
        match &mut entry.data {
            EntryData::Hash(fields) => {
                fields.insert(field.to_string(), value.to_vec());
            }
            EntryData::Value(_) => {
                return Err(CacheError::unavailable("hset", identifier, WRONG_TYPE));
            }
        }
        entry.expires_at = deadline(now, ttl);
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> CacheResult<()> {
        for key in keys {
            self.entries.remove(key);
        }
        Ok(())
    }

    async fn delete_hash_member(&self, identifier: &str, field: &str) -> CacheResult<()> {
        let now_empty = match self.entries.get_mut(identifier) {
            Some(mut entry) => match &mut entry.data {
                EntryData::Hash(fields) => {
                    fields.remove(field);
                    fields.is_empty()
                }
                EntryData::Value(_) => {
                    return Err(CacheError::unavailable("hdel", identifier, WRONG_TYPE));
                }
            },
            None => false,
        };
        if now_empty {
            self.entries.remove_if(identifier, |_, entry| {
                matches!(&entry.data, EntryData::Hash(fields) if fields.is_empty())
            });
        }
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<()> {
        let now = Instant::now();
        if let Some(mut entry) = self.entries.get_mut(key) {
            if !entry.is_expired(now) {
                entry.expires_at = deadline(now, ttl);
            }
        }
        Ok(())
    }

    async fn increment(&self, key: &str) -> CacheResult<i64> {
        let now = Instant::now();
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| CachedEntry {
            data: EntryData::Value(Arc::new(b"0".to_vec())),
            expires_at: None,
        });
        if entry.is_expired(now) {
            *entry = CachedEntry {
                data: EntryData::Value(Arc::new(b"0".to_vec())),
                expires_at: None,
            };
        }

        let current = match &entry.data {
            EntryData::Value(data) => std::str::from_utf8(data)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or_else(|| {
                    CacheError::unavailable("incr", key, "ERR value is not an integer")
                })?,
            EntryData::Hash(_) => return Err(CacheError::unavailable("incr", key, WRONG_TYPE)),
        };
        let next = current + 1;
        entry.data = EntryData::Value(Arc::new(next.to_string().into_bytes()));
        Ok(next)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
