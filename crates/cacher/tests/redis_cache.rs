//! Integration tests against a real Redis.
//!
//! One container serves both roles: the cache on database 0 and the lock
//! store on database 1, mimicking the separate instances used in production.
//!
//! Run with `cargo test -p cacher --test redis_cache -- --ignored`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use cacher::{CacheManager, CacheMode, CacherConfig, LockHandle, Lookup, keys, new_item};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

/// Get or create the shared Redis container
async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");

            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            let url = format!("redis://127.0.0.1:{}", host_port);

            (container, url)
        })
        .await;

    url.clone()
}

async fn redis_manager(nil_ttl_secs: u64) -> CacheManager {
    let url = get_redis_url().await;
    let mut config = CacherConfig::default();
    config.mode = CacheMode::Redis;
    config.redis.cache_url = format!("{url}/0");
    config.redis.lock_url = format!("{url}/1");
    config.cache.nil_ttl_secs = nil_ttl_secs;
    config.lock.tries = 40;
    config.lock.retry_delay_ms = 10;
    config.lock.max_retry_delay_ms = 50;
    cacher::connect(&config).await.expect("connect to redis")
}

fn unique_key(name: &str) -> String {
    keys::object_key(name, unique_suffix())
}

fn unique_suffix() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_store_and_hit() {
    let cache = redis_manager(300).await;
    assert_eq!(cache.backend_name(), "redis");
    let key = unique_key("employee");

    let Lookup::Fill(handle) = cache.get_or_lock(&key).await.unwrap() else {
        panic!("expected fill rights on a cold key");
    };
    cache
        .store(Some(handle), new_item(&key, b"alice".to_vec(), None).unwrap())
        .await
        .unwrap();

    match cache.get_or_lock(&key).await.unwrap() {
        Lookup::Hit(value) => assert_eq!(value, b"alice".to_vec()),
        other => panic!("expected hit, got {other:?}"),
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_empty_value_is_present() {
    let cache = redis_manager(300).await;
    let key = unique_key("empty");
    cache
        .store_without_blocking(new_item(&key, Vec::new(), None).unwrap())
        .await
        .unwrap();
    assert_eq!(cache.get(&key).await.unwrap(), Some(Vec::new()));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_concurrent_fill_once() {
    let cache = redis_manager(300).await;
    let key = unique_key("stampede");
    let fills = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let cache = cache.clone();
        let fills = fills.clone();
        let key = key.clone();
        tasks.push(tokio::spawn(async move {
            match cache.get_or_lock(&key).await.unwrap() {
                Lookup::Fill(handle) => {
                    fills.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    cache
                        .store(Some(handle), new_item(&key, b"v".to_vec(), None).unwrap())
                        .await
                        .unwrap();
                }
                Lookup::Hit(value) => assert_eq!(value, b"v".to_vec()),
                other => panic!("unexpected lookup: {other:?}"),
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(fills.load(Ordering::SeqCst), 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_nil_marker_and_expiry() {
    let cache = redis_manager(1).await;
    let key = unique_key("missing");
    cache.store_nil(&key).await.unwrap();
    assert!(matches!(
        cache.get_or_lock(&key).await.unwrap(),
        Lookup::ConfirmedAbsent
    ));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let lookup = cache.get_or_lock(&key).await.unwrap();
    assert!(lookup.is_fill());
    if let Lookup::Fill(handle) = lookup {
        cache.safe_unlock(Some(handle)).await;
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_delete_by_keys() {
    let cache = redis_manager(300).await;
    let key = unique_key("deleted");
    cache
        .store_without_blocking(new_item(&key, b"v".to_vec(), None).unwrap())
        .await
        .unwrap();
    cache
        .delete_by_keys([key.clone(), unique_key("never")])
        .await
        .unwrap();
    assert!(!cache.check_key_exist(&key).await.unwrap());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_foreign_handle_does_not_release() {
    let cache = redis_manager(300).await;
    let key = unique_key("locked");
    let handle = cache.acquire_lock(&key).await.unwrap().unwrap();

    cache
        .safe_unlock(Some(LockHandle::new(handle.name(), "intruder")))
        .await;
    cache.safe_unlock(None).await;

    let mut impatient = CacherConfig::default();
    impatient.redis.cache_url = format!("{}/0", get_redis_url().await);
    impatient.redis.lock_url = format!("{}/1", get_redis_url().await);
    impatient.lock.tries = 2;
    impatient.lock.retry_delay_ms = 5;
    impatient.lock.max_retry_delay_ms = 5;
    let other_process = cacher::connect(&impatient).await.unwrap();
    assert!(
        other_process
            .get_or_lock(&key)
            .await
            .unwrap_err()
            .is_lock_timeout()
    );

    cache.safe_unlock(Some(handle)).await;
    let lookup = other_process.get_or_lock(&key).await.unwrap();
    assert!(lookup.is_fill());
    if let Lookup::Fill(handle) = lookup {
        other_process.safe_unlock(Some(handle)).await;
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_hash_members_and_counters() {
    let cache = redis_manager(300).await;
    let identifier = unique_key("employees");
    cache
        .store_hash_member(&identifier, new_item("1", b"alice".to_vec(), None).unwrap())
        .await
        .unwrap();

    assert_eq!(
        cache.get_hash_member(&identifier, "1").await.unwrap(),
        Some(b"alice".to_vec())
    );
    assert_eq!(cache.get_hash_member(&identifier, "2").await.unwrap(), None);

    cache.delete_hash_member(&identifier, "1").await.unwrap();
    assert_eq!(cache.get_hash_member(&identifier, "1").await.unwrap(), None);

    let counter = unique_key("counter");
    assert_eq!(
        cache.increase_cached_value_by_one(&counter).await.unwrap(),
        Some(1)
    );
    assert_eq!(
        cache.increase_cached_value_by_one(&counter).await.unwrap(),
        Some(2)
    );
    cache.expire(&counter, Duration::from_millis(50)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!cache.check_key_exist(&counter).await.unwrap());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_multi_store_and_get_many() {
    let cache = redis_manager(300).await;
    let keys: Vec<String> = (0..4).map(|i| unique_key(&format!("bulk{i}"))).collect();
    let items: Vec<_> = keys
        .iter()
        .take(3)
        .map(|k| new_item(k, k.clone().into_bytes(), Some(Duration::from_secs(60))).unwrap())
        .collect();
    cache.store_multi_without_blocking(&items).await.unwrap();

    let values = cache.get_many(&keys).await.unwrap();
    assert_eq!(values.len(), 4);
    for (key, value) in keys.iter().take(3).zip(&values) {
        assert_eq!(value.as_deref(), Some(key.as_bytes()));
    }
    assert_eq!(values[3], None);
}
