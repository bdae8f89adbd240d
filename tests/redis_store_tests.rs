//! Redis store contract tests using testcontainers.
//!
//! A throwaway Redis container is started per test. These need a Docker
//! daemon and are ignored by default.
//!
//! Run with: `cargo test --test redis_store_tests -- --ignored`
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage};
use tokio::time::sleep;

use compliance_guard::cache::RedisStore;
use compliance_guard::config::RedisConfig;
use compliance_guard::{Cache, CacheCategory, CacheKey, CacheStore};

const IMAGE: &str = "redis";
const TAG: &str = "7-alpine";
const PORT: u16 = 6379;

/// Start a Redis container and connect a store to it.
async fn start_redis() -> (ContainerAsync<GenericImage>, RedisStore) {
    let container = GenericImage::new(IMAGE, TAG)
        .with_exposed_port(PORT.tcp())
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
        .start()
        .await
        .expect("Failed to start Redis container");

    let port = container
        .get_host_port_ipv4(PORT)
        .await
        .expect("Failed to get Redis port");

    let store = RedisStore::connect(&RedisConfig {
        host: "127.0.0.1".to_string(),
        port,
        password: None,
        db: 0,
    })
    .await
    .expect("Failed to connect to Redis");

    (container, store)
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_set_get_delete() {
    let (_container, store) = start_redis().await;
    let cache = Cache::new(Arc::new(store), "it", Duration::from_secs(60));
    let key = CacheKey::new(CacheCategory::SecurityHeaders, "/api/account");

    cache.set(&key, &"nosniff", None).await.unwrap();
    assert_eq!(cache.get::<String>(&key).await.unwrap().as_deref(), Some("nosniff"));

    cache.delete(&key).await.unwrap();
    assert_eq!(cache.get::<String>(&key).await.unwrap(), None);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_entry_expires_after_ttl() {
    let (_container, store) = start_redis().await;
    let cache = Cache::new(Arc::new(store), "it", Duration::from_secs(60));
    let key = CacheKey::new(CacheCategory::PasswordPolicy, "digest");

    cache
        .set(&key, &true, Some(Duration::from_millis(200)))
        .await
        .unwrap();
    sleep(Duration::from_millis(400)).await;

    assert_eq!(cache.get::<bool>(&key).await.unwrap(), None);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_increment_is_atomic_under_concurrency() {
    let (_container, store) = start_redis().await;
    let cache = Cache::new(Arc::new(store), "it", Duration::from_secs(60));
    let key = CacheKey::new(CacheCategory::RateLimit, "10.0.0.1").with_bucket(1);

    let tasks: Vec<_> = (0..50)
        .map(|_| {
            let cache = cache.clone();
            let key = key.clone();
            tokio::spawn(async move {
                cache
                    .increment(&key, Duration::from_secs(60))
                    .await
                    .unwrap()
            })
        })
        .collect();

    let mut counts = Vec::new();
    for task in tasks {
        counts.push(task.await.unwrap().unwrap());
    }
    counts.sort_unstable();

    assert_eq!(counts, (1..=50).collect::<Vec<u64>>());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_clear_only_touches_own_prefix() {
    let (_container, store) = start_redis().await;
    let store: Arc<dyn CacheStore> = Arc::new(store);
    let ours = Cache::new(store.clone(), "ours", Duration::from_secs(60));
    let theirs = Cache::new(store, "theirs", Duration::from_secs(60));
    let key = CacheKey::new(CacheCategory::AuditLog, "GET:/");

    ours.set(&key, &1, None).await.unwrap();
    theirs.set(&key, &2, None).await.unwrap();
    ours.clear().await.unwrap();

    assert_eq!(ours.get::<i32>(&key).await.unwrap(), None);
    assert_eq!(theirs.get::<i32>(&key).await.unwrap(), Some(2));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_malformed_value_is_a_miss() {
    let (_container, store) = start_redis().await;
    let store = Arc::new(store);
    let cache = Cache::new(store.clone(), "it", Duration::from_secs(60));
    let key = CacheKey::new(CacheCategory::SecurityHeaders, "/");

    store
        .set(&cache.physical_key(&key), "{broken".to_string(), None)
        .await
        .unwrap();

    assert_eq!(cache.get::<serde_json::Value>(&key).await.unwrap(), None);
}
