//! In-process backing store.
//!
//! Each record carries its own expiry instant; expiry is evaluated when the
//! record is read, never by a background sweep. The map is private to the
//! store and guarded by a Tokio `RwLock`, which also makes `increment`
//! atomic within the process.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::trace;

use super::CacheStore;
use crate::error::CacheResult;

#[derive(Debug, Clone)]
struct StoredRecord {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredRecord {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// Process-local store backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, StoredRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of physical records held, including expired ones not yet purged.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|record| record.is_live(now))
            .map(|record| record.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .write()
            .await
            .insert(key.to_string(), StoredRecord { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn clear(&self, prefix: &str) -> CacheResult<()> {
        self.entries
            .write()
            .await
            .retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }

    async fn increment(&self, key: &str, ttl: Duration) -> CacheResult<u64> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        // A live counter keeps its original expiry; anything else starts over.
        let (current, expires_at) = match entries.get(key).filter(|r| r.is_live(now)) {
            Some(record) => (
                record.value.trim().parse::<u64>().unwrap_or(0),
                record.expires_at,
            ),
            None => (0, Some(now + ttl)),
        };

        let next = current.saturating_add(1);
        entries.insert(
            key.to_string(),
            StoredRecord {
                value: next.to_string(),
                expires_at,
            },
        );
        trace!(key, count = next, "Counter incremented");
        Ok(next)
    }

    async fn purge_expired(&self) -> CacheResult<usize> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, record| record.is_live(now));
        Ok(before - entries.len())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
