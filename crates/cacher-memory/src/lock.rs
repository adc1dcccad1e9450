use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cacher_core::{CacheResult, LockStore};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

#[derive(Debug, Clone)]
struct LeaseEntry {
    token: String,
    /// `None` when the lease is too long to represent; it then never lapses.
    expires_at: Option<Instant>,
}

impl LeaseEntry {
    fn new(token: &str, lease: Duration) -> Self {
        Self {
            token: token.to_string(),
            expires_at: Instant::now().checked_add(lease),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-process lock store with leases.
///
/// Only coordinates tasks that share this instance; use the Redis lock store
/// when several processes fill the same cache.
#[derive(Debug, Default, Clone)]
pub struct MemoryLockStore {
    leases: Arc<DashMap<String, LeaseEntry>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn try_lock(&self, name: &str, token: &str, lease: Duration) -> CacheResult<bool> {
        let now = Instant::now();
        match self.leases.entry(name.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(LeaseEntry::new(token, lease));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(LeaseEntry::new(token, lease));
                Ok(true)
            }
        }
    }

    async fn unlock(&self, name: &str, token: &str) -> CacheResult<bool> {
        let now = Instant::now();
        Ok(self
            .leases
            .remove_if(name, |_, entry| entry.token == token && !entry.is_expired(now))
            .is_some())
    }

    async fn is_locked(&self, name: &str) -> CacheResult<bool> {
        let now = Instant::now();
        Ok(self
            .leases
            .get(name)
            .is_some_and(|entry| !entry.is_expired(now)))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
