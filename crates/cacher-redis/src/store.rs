//! Redis cache store.
//!
//! Reads run `EXISTS`+`GET` (or `HEXISTS`+`HGET`) inside one `MULTI`/`EXEC`
//! block, so a key cannot expire or be deleted between the existence check and
//! the fetch.

use std::time::Duration;

use async_trait::async_trait;
use cacher_core::{CacheError, CacheItem, CacheResult, CacheStore};
use deadpool_redis::Pool;
use redis::Value;

use crate::pool::{connection, ttl_millis, with_deadline};

/// Cache store over a pooled Redis instance.
#[derive(Clone)]
pub struct RedisCacheStore {
    pool: Pool,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl RedisCacheStore {
    pub fn new(pool: Pool, read_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            pool,
            read_timeout,
            write_timeout,
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

/// Interprets the `[exists, value]` reply of a checked fetch.
///
/// Anything other than a positive integer in the existence slot means the
/// key is absent, including replies of an unexpected shape.
fn checked_value(
    operation: &'static str,
    key: &str,
    exists: Value,
    value: Value,
) -> CacheResult<Vec<u8>> {
    match exists {
        Value::Int(n) if n > 0 => {}
        _ => return Err(CacheError::key_not_exist(key)),
    }
    match value {
        Value::Nil => Err(CacheError::key_not_exist(key)),
        other => redis::from_redis_value::<Vec<u8>>(&other)
            .map_err(|e| CacheError::unavailable(operation, key, e)),
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> CacheResult<Vec<u8>> {
        with_deadline("get", key, self.read_timeout, async {
            let mut conn = connection(&self.pool, "get", key).await?;
            let (exists, value): (Value, Value) = redis::pipe()
                .atomic()
                .exists(key)
                .get(key)
                .query_async(&mut conn)
                .await
                .map_err(|e| CacheError::unavailable("get", key, e))?;
            checked_value("get", key, exists, value)
        })
        .await
    }

    async fn get_hash_member(&self, identifier: &str, field: &str) -> CacheResult<Vec<u8>> {
        with_deadline("hget", identifier, self.read_timeout, async {
            let mut conn = connection(&self.pool, "hget", identifier).await?;
            let (exists, value): (Value, Value) = redis::pipe()
                .atomic()
                .hexists(identifier, field)
                .hget(identifier, field)
                .query_async(&mut conn)
                .await
                .map_err(|e| CacheError::unavailable("hget", identifier, e))?;
            checked_value("hget", &format!("{identifier}:{field}"), exists, value)
        })
        .await
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        with_deadline("exists", key, self.read_timeout, async {
            let mut conn = connection(&self.pool, "exists", key).await?;
            let count: i64 = redis::cmd("EXISTS")
                .arg(key)
                .query_async(&mut conn)
                .await
                .map_err(|e| CacheError::unavailable("exists", key, e))?;
            Ok(count > 0)
        })
        .await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        with_deadline("set", key, self.write_timeout, async {
            let mut conn = connection(&self.pool, "set", key).await?;
            let _: () = redis::cmd("PSETEX")
                .arg(key)
                .arg(ttl_millis(ttl))
                .arg(value)
                .query_async(&mut conn)
                .await
                .map_err(|e| CacheError::unavailable("set", key, e))?;
            tracing::debug!(key = %key, ttl_ms = ttl_millis(ttl), "cache set (redis)");
            Ok(())
        })
        .await
    }

    async fn set_many(&self, items: &[CacheItem], default_ttl: Duration) -> CacheResult<()> {
        let Some(first) = items.first() else {
            return Ok(());
        };
        let first_key = first.key().to_string();

        with_deadline("set_many", &first_key, self.write_timeout, async {
            let mut conn = connection(&self.pool, "set_many", &first_key).await?;
            let mut pipe = redis::pipe();
            for item in items {
                pipe.cmd("PSETEX")
                    .arg(item.key())
                    .arg(ttl_millis(item.effective_ttl(default_ttl)))
                    .arg(item.value())
                    .ignore();
            }
            let _: () = pipe
                .query_async(&mut conn)
                .await
                .map_err(|e| CacheError::unavailable("set_many", &first_key, e))?;
            Ok(())
        })
        .await
    }

    async fn set_hash_member(
        &self,
        identifier: &str,
        field: &str,
        value: &[u8],
        ttl: Duration,
    ) -> CacheResult<()> {
        with_deadline("hset", identifier, self.write_timeout, async {
            let mut conn = connection(&self.pool, "hset", identifier).await?;
            let _: () = redis::pipe()
                .atomic()
                .hset(identifier, field, value)
                .ignore()
                .cmd("PEXPIRE")
                .arg(identifier)
                .arg(ttl_millis(ttl))
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(|e| CacheError::unavailable("hset", identifier, e))?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, keys: &[String]) -> CacheResult<()> {
        let Some(first) = keys.first() else {
            return Ok(());
        };

        with_deadline("delete", first, self.write_timeout, async {
            let mut conn = connection(&self.pool, "delete", first).await?;
            let mut del = redis::cmd("DEL");
            for key in keys {
                del.arg(key);
            }
            let _: () = del
                .query_async(&mut conn)
                .await
                .map_err(|e| CacheError::unavailable("delete", first, e))?;
            tracing::debug!(keys = ?keys, "cache keys deleted (redis)");
            Ok(())
        })
        .await
    }

    async fn delete_hash_member(&self, identifier: &str, field: &str) -> CacheResult<()> {
        with_deadline("hdel", identifier, self.write_timeout, async {
            let mut conn = connection(&self.pool, "hdel", identifier).await?;
            let _: () = redis::cmd("HDEL")
                .arg(identifier)
                .arg(field)
                .query_async(&mut conn)
                .await
                .map_err(|e| CacheError::unavailable("hdel", identifier, e))?;
            Ok(())
        })
        .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<()> {
        with_deadline("expire", key, self.write_timeout, async {
            let mut conn = connection(&self.pool, "expire", key).await?;
            let _: () = redis::cmd("PEXPIRE")
                .arg(key)
                .arg(ttl_millis(ttl))
                .query_async(&mut conn)
                .await
                .map_err(|e| CacheError::unavailable("expire", key, e))?;
            Ok(())
        })
        .await
    }

    async fn increment(&self, key: &str) -> CacheResult<i64> {
        with_deadline("incr", key, self.write_timeout, async {
            let mut conn = connection(&self.pool, "incr", key).await?;
            redis::cmd("INCR")
                .arg(key)
                .query_async(&mut conn)
                .await
                .map_err(|e| CacheError::unavailable("incr", key, e))
        })
        .await
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

impl std::fmt::Debug for RedisCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.pool.status();
        f.debug_struct("RedisCacheStore")
            .field("pool_size", &status.size)
            .field("pool_available", &status.available)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_value_present() {
        let value = checked_value(
            "get",
            "k",
            Value::Int(1),
            Value::BulkString(b"payload".to_vec()),
        )
        .unwrap();
        assert_eq!(value, b"payload".to_vec());
    }

    #[test]
    fn test_checked_value_empty_but_present() {
        let value = checked_value("get", "k", Value::Int(1), Value::BulkString(Vec::new())).unwrap();
        assert!(value.is_empty());
    }

    #[test]
    fn test_checked_value_absent() {
        let err = checked_value("get", "k", Value::Int(0), Value::Nil).unwrap_err();
        assert!(err.is_not_exist());
    }

    #[test]
    fn test_malformed_existence_reply_is_a_miss() {
        let err = checked_value(
            "get",
            "k",
            Value::BulkString(b"yes".to_vec()),
            Value::BulkString(b"payload".to_vec()),
        )
        .unwrap_err();
        assert!(err.is_not_exist());

        let err = checked_value("get", "k", Value::Nil, Value::Nil).unwrap_err();
        assert!(err.is_not_exist());
    }
}
