//! Cache abstraction shared by every security middleware.
//!
//! [`Cache`] is a cheap, clonable handle over a [`CacheStore`]. Values are
//! stored as JSON text; a stored payload that fails to deserialize is
//! reported as a miss rather than an error. Store I/O failures, on the
//! other hand, are always propagated: the middleware decides whether to
//! degrade or fail the request.
//!
//! A disabled cache (`CACHE_ENABLED=false`) holds no store at all and every
//! operation completes immediately as a miss / no-op, so the pipeline can
//! run without any backing store present.
//!
//! # Store variants
//!
//! | Store | Expiry | Increment |
//! |-------|--------|-----------|
//! | [`MemoryStore`] | checked lazily on read | under the map's write lock |
//! | [`RedisStore`]  | delegated to Redis `PX` | Lua `INCR` + `PEXPIRE` |

pub mod key;
pub mod memory;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::config::{CacheConfig, StoreKind};
use crate::error::{CacheError, CacheResult};
use crate::metrics;

pub use key::{CacheCategory, CacheKey};
pub use memory::MemoryStore;
pub use redis::RedisStore;

/// Capability interface of a backing store.
///
/// Keys arrive fully serialized (prefix included). `ttl = None` means the
/// entry never expires.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Raw payload stored under `key`, if present and not expired.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()>;

    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Remove every entry whose key starts with `prefix`.
    async fn clear(&self, prefix: &str) -> CacheResult<()>;

    /// Atomically increment the counter at `key`, starting a missing or
    /// expired counter at zero and giving it `ttl`. Returns the new value.
    async fn increment(&self, key: &str, ttl: Duration) -> CacheResult<u64>;

    /// Drop expired entries eagerly. Stores with native expiry do nothing.
    async fn purge_expired(&self) -> CacheResult<usize> {
        Ok(0)
    }

    /// Short store name for logs.
    fn name(&self) -> &'static str;
}

/// Handle to the configured cache.
#[derive(Clone)]
pub struct Cache {
    store: Option<Arc<dyn CacheStore>>,
    prefix: Arc<str>,
    default_ttl: Option<Duration>,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("store", &self.store.as_ref().map(|s| s.name()))
            .field("prefix", &self.prefix)
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl Cache {
    /// Wrap an existing store.
    ///
    /// A zero `default_ttl` means entries written without an explicit TTL
    /// never expire.
    pub fn new(store: Arc<dyn CacheStore>, prefix: impl Into<String>, default_ttl: Duration) -> Self {
        let prefix: String = prefix.into();
        Self {
            store: Some(store),
            prefix: Arc::from(prefix),
            default_ttl: (!default_ttl.is_zero()).then_some(default_ttl),
        }
    }

    /// In-process cache with the given prefix and default TTL.
    pub fn memory(prefix: impl Into<String>, default_ttl: Duration) -> Self {
        Self::new(Arc::new(MemoryStore::new()), prefix, default_ttl)
    }

    /// A cache where every operation is a no-op miss.
    pub fn disabled() -> Self {
        Self {
            store: None,
            prefix: Arc::from(""),
            default_ttl: None,
        }
    }

    /// Build the cache described by `config`, connecting to Redis if selected.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Connection` if the Redis store cannot be reached
    /// or its configuration block is missing.
    pub async fn from_config(config: &CacheConfig) -> CacheResult<Self> {
        if !config.enabled {
            info!("Security cache disabled; all cache operations are no-ops");
            return Ok(Self::disabled());
        }

        let ttl = Duration::from_secs(config.ttl_secs);
        let cache = match config.store {
            StoreKind::Memory => Self::memory(config.prefix.clone(), ttl),
            StoreKind::Redis => {
                let redis_config = config.redis.as_ref().ok_or_else(|| {
                    CacheError::Connection("CACHE_STORE=redis requires REDIS_HOST".to_string())
                })?;
                let store = RedisStore::connect(redis_config).await?;
                Self::new(Arc::new(store), config.prefix.clone(), ttl)
            }
        };

        info!(
            store = cache.store_name(),
            prefix = %cache.prefix,
            default_ttl_secs = config.ttl_secs,
            "Security cache initialized"
        );
        Ok(cache)
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn store_name(&self) -> &'static str {
        self.store.as_ref().map_or("disabled", |s| s.name())
    }

    /// Physical key for `key` under this cache's prefix.
    pub fn physical_key(&self, key: &CacheKey) -> String {
        key.serialize(&self.prefix)
    }

    /// Read and deserialize a value. Malformed payloads are treated as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> CacheResult<Option<T>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let physical = self.physical_key(key);
        let raw = store
            .get(&physical)
            .await
            .inspect_err(|_| metrics::record_cache_error("get"))?;

        Ok(raw.and_then(|payload| match serde_json::from_str(&payload) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(key = %physical, error = %e, "Discarding malformed cache payload");
                None
            }
        }))
    }

    /// Serialize and store a value. `ttl = None` falls back to the default TTL.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let payload = serde_json::to_string(value)?;
        store
            .set(&self.physical_key(key), payload, ttl.or(self.default_ttl))
            .await
            .inspect_err(|_| metrics::record_cache_error("set"))
    }

    pub async fn delete(&self, key: &CacheKey) -> CacheResult<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        store
            .delete(&self.physical_key(key))
            .await
            .inspect_err(|_| metrics::record_cache_error("delete"))
    }

    /// Remove every entry under this cache's prefix.
    pub async fn clear(&self) -> CacheResult<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let scope = key::prefix_scope(&self.prefix);
        store
            .clear(&scope)
            .await
            .inspect_err(|_| metrics::record_cache_error("clear"))
    }

    /// Atomically bump a counter. Returns `None` when the cache is disabled.
    pub async fn increment(&self, key: &CacheKey, ttl: Duration) -> CacheResult<Option<u64>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        store
            .increment(&self.physical_key(key), ttl)
            .await
            .map(Some)
            .inspect_err(|_| metrics::record_cache_error("increment"))
    }

    /// Eagerly drop expired entries (memory store only).
    pub async fn purge_expired(&self) -> CacheResult<usize> {
        match &self.store {
            Some(store) => store.purge_expired().await,
            None => Ok(0),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn key(id: &str) -> CacheKey {
        CacheKey::new(CacheCategory::SecurityHeaders, id)
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[tokio::test]
    async fn test_set_then_get_round_trip() {
        let cache = Cache::memory("test", Duration::from_secs(60));
        let value = Sample {
            name: "a".to_string(),
            count: 3,
        };
        cache.set(&key("k"), &value, None).await.unwrap();
        let read: Option<Sample> = cache.get(&key("k")).await.unwrap();
        assert_eq!(read, Some(value));
    }

    #[tokio::test]
    async fn test_get_after_ttl_is_miss() {
        let cache = Cache::memory("test", Duration::from_secs(60));
        cache
            .set(&key("short"), &1u32, Some(Duration::from_millis(20)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        let read: Option<u32> = cache.get(&key("short")).await.unwrap();
        assert_eq!(read, None);
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let cache = Cache::memory("test", Duration::from_secs(60));
        cache.set(&key("a"), &1u32, None).await.unwrap();
        cache.set(&key("b"), &2u32, None).await.unwrap();

        cache.delete(&key("a")).await.unwrap();
        assert_eq!(cache.get::<u32>(&key("a")).await.unwrap(), None);
        assert_eq!(cache.get::<u32>(&key("b")).await.unwrap(), Some(2));

        cache.clear().await.unwrap();
        assert_eq!(cache.get::<u32>(&key("b")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_keeps_other_prefixes() {
        let store: Arc<dyn CacheStore> = Arc::new(MemoryStore::new());
        let first = Cache::new(store.clone(), "first", Duration::from_secs(60));
        let second = Cache::new(store, "second", Duration::from_secs(60));

        first.set(&key("k"), &1u32, None).await.unwrap();
        second.set(&key("k"), &2u32, None).await.unwrap();
        first.clear().await.unwrap();

        assert_eq!(first.get::<u32>(&key("k")).await.unwrap(), None);
        assert_eq!(second.get::<u32>(&key("k")).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_miss() {
        let store = Arc::new(MemoryStore::new());
        let cache = Cache::new(store.clone(), "test", Duration::from_secs(60));
        let physical = cache.physical_key(&key("broken"));
        store
            .set(&physical, "{not json".to_string(), None)
            .await
            .unwrap();

        let read: Option<Sample> = cache.get(&key("broken")).await.unwrap();
        assert_eq!(read, None);
    }

    #[tokio::test]
    async fn test_wrong_shape_payload_is_miss() {
        let cache = Cache::memory("test", Duration::from_secs(60));
        cache.set(&key("k"), &"a string", None).await.unwrap();
        let read: Option<Sample> = cache.get(&key("k")).await.unwrap();
        assert_eq!(read, None);
    }

    #[tokio::test]
    async fn test_disabled_cache_is_noop() {
        let cache = Cache::disabled();
        assert!(!cache.is_enabled());
        cache.set(&key("k"), &1u32, None).await.unwrap();
        assert_eq!(cache.get::<u32>(&key("k")).await.unwrap(), None);
        assert_eq!(
            cache
                .increment(&key("k"), Duration::from_secs(1))
                .await
                .unwrap(),
            None
        );
        cache.delete(&key("k")).await.unwrap();
        cache.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_increment_reads_back_as_json_number() {
        let cache = Cache::memory("test", Duration::from_secs(60));
        let counter = CacheKey::new(CacheCategory::RateLimit, "client").with_bucket(1);
        cache.increment(&counter, Duration::from_secs(60)).await.unwrap();
        cache.increment(&counter, Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get::<u64>(&counter).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_from_config_disabled() {
        let config = CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        };
        let cache = Cache::from_config(&config).await.unwrap();
        assert!(!cache.is_enabled());
        assert_eq!(cache.store_name(), "disabled");
    }

    #[tokio::test]
    async fn test_from_config_redis_without_block_fails() {
        let config = CacheConfig {
            store: StoreKind::Redis,
            redis: None,
            ..CacheConfig::default()
        };
        let result = Cache::from_config(&config).await;
        assert!(matches!(result, Err(CacheError::Connection(_))));
    }
}
