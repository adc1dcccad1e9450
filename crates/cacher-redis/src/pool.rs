//! Connection pool construction for the cache and lock Redis instances.

use std::future::Future;
use std::time::Duration;

use cacher_core::{CacheError, CacheResult};
use deadpool_redis::{Connection, Pool};

/// Connection settings for one Redis instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisEndpoint {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
    /// Maximum number of pooled connections
    pub max_size: usize,
    /// Bound on establishing or waiting for a connection
    pub dial_timeout: Duration,
    /// Deadline for read commands
    pub read_timeout: Duration,
    /// Deadline for write commands
    pub write_timeout: Duration,
}

impl RedisEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

impl Default for RedisEndpoint {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            max_size: 50,
            dial_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(2),
        }
    }
}

/// Creates a connection pool for an endpoint.
///
/// The pool connects lazily; use [`ping`] to check reachability up front.
pub fn create_pool(endpoint: &RedisEndpoint) -> CacheResult<Pool> {
    let mut redis_config = deadpool_redis::Config::from_url(&endpoint.url);

    let mut pool_config = deadpool_redis::PoolConfig::new(endpoint.max_size);
    pool_config.timeouts.wait = Some(endpoint.dial_timeout);
    pool_config.timeouts.create = Some(endpoint.dial_timeout);
    pool_config.timeouts.recycle = Some(endpoint.dial_timeout);
    redis_config.pool = Some(pool_config);

    redis_config
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .map_err(|e| {
            CacheError::configuration(format!(
                "failed to create Redis pool for {}: {e}",
                endpoint.url
            ))
        })
}

/// Round-trips a PING through the pool.
pub async fn ping(pool: &Pool) -> CacheResult<()> {
    let mut conn = connection(pool, "ping", "").await?;
    let _: String = redis::cmd("PING")
        .query_async(&mut conn)
        .await
        .map_err(|e| CacheError::unavailable("ping", "", e))?;
    Ok(())
}

/// Borrows a connection. It goes back to the pool when dropped, on every path.
pub(crate) async fn connection(
    pool: &Pool,
    operation: &'static str,
    key: &str,
) -> CacheResult<Connection> {
    pool.get()
        .await
        .map_err(|e| CacheError::unavailable(operation, key, e))
}

/// Runs a store call under a deadline.
///
/// On timeout the in-flight future is dropped, which also drops (and so
/// returns) any connection it borrowed.
pub(crate) async fn with_deadline<T, F>(
    operation: &'static str,
    key: &str,
    timeout: Duration,
    fut: F,
) -> CacheResult<T>
where
    F: Future<Output = CacheResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, key = %key, timeout_ms = timeout.as_millis() as u64, "Redis call timed out");
            Err(CacheError::timeout(
                operation,
                key,
                u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            ))
        }
    }
}

/// Milliseconds for PSETEX/PEXPIRE; Redis rejects zero.
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_millis_never_zero() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
        assert_eq!(ttl_millis(Duration::from_secs(900)), 900_000);
    }

    #[test]
    fn test_create_pool_is_lazy() {
        // Nothing listens here; creating the pool must still succeed.
        let endpoint = RedisEndpoint {
            url: "redis://127.0.0.1:1".to_string(),
            max_size: 2,
            dial_timeout: Duration::from_millis(100),
            ..RedisEndpoint::default()
        };
        assert!(create_pool(&endpoint).is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unavailable() {
        let endpoint = RedisEndpoint {
            url: "redis://127.0.0.1:1".to_string(),
            max_size: 1,
            dial_timeout: Duration::from_millis(200),
            ..RedisEndpoint::default()
        };
        let pool = create_pool(&endpoint).unwrap();
        let err = ping(&pool).await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_with_deadline_times_out() {
        let err = with_deadline("get", "slow", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, CacheError>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, CacheError::Timeout { timeout_ms: 10, .. }));
    }

    #[test]
    fn test_malformed_url_is_a_configuration_error() {
        let err = create_pool(&RedisEndpoint::new("not a url")).unwrap_err();
        assert!(matches!(err, CacheError::Configuration(_)));
    }
}
