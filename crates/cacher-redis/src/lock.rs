//! Redis lock store backing the distributed mutex.

use std::time::Duration;

use async_trait::async_trait;
use cacher_core::{CacheError, CacheResult, LockStore};
use deadpool_redis::Pool;

use crate::pool::{connection, ttl_millis, with_deadline};

/// Deletes the lock only if it still holds the caller's token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Lock store over a pooled Redis instance, separate from the cache instance.
#[derive(Clone)]
pub struct RedisLockStore {
    pool: Pool,
    timeout: Duration,
    release_script: redis::Script,
}

impl RedisLockStore {
    pub fn new(pool: Pool, timeout: Duration) -> Self {
        Self {
            pool,
            timeout,
            release_script: redis::Script::new(RELEASE_SCRIPT),
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn try_lock(&self, name: &str, token: &str, lease: Duration) -> CacheResult<bool> {
        with_deadline("lock", name, self.timeout, async {
            let mut conn = connection(&self.pool, "lock", name).await?;
            let reply: Option<String> = redis::cmd("SET")
                .arg(name)
                .arg(token)
                .arg("NX")
                .arg("PX")
                .arg(ttl_millis(lease))
                .query_async(&mut conn)
                .await
                .map_err(|e| CacheError::unavailable("lock", name, e))?;
            Ok(reply.is_some())
        })
        .await
    }

    async fn unlock(&self, name: &str, token: &str) -> CacheResult<bool> {
        with_deadline("unlock", name, self.timeout, async {
            let mut conn = connection(&self.pool, "unlock", name).await?;
            let deleted: i64 = self
                .release_script
                .key(name)
                .arg(token)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| CacheError::unavailable("unlock", name, e))?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn is_locked(&self, name: &str) -> CacheResult<bool> {
        with_deadline("is_locked", name, self.timeout, async {
            let mut conn = connection(&self.pool, "is_locked", name).await?;
            let count: i64 = redis::cmd("EXISTS")
                .arg(name)
                .query_async(&mut conn)
                .await
                .map_err(|e| CacheError::unavailable("is_locked", name, e))?;
            Ok(count > 0)
        })
        .await
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

impl std::fmt::Debug for RedisLockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLockStore")
            .field("pool_size", &self.pool.status().size)
            .field("timeout", &self.timeout)
            .finish()
    }
}
