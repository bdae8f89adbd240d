//! Redis backing store.
//!
//! Expiry is enforced by Redis itself (`SET ... PX`). Connections go through
//! a [`ConnectionManager`], which reconnects transparently; any command
//! failure is surfaced as [`CacheError::Store`] and never swallowed here.

use std::time::Duration;

use async_trait::async_trait;
use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo, Script};
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use super::CacheStore;
use crate::config::RedisConfig;
use crate::error::{CacheError, CacheResult};

/// Batch size for `SCAN` during `clear`.
const SCAN_BATCH: usize = 200;

/// Increment a counter and give it an expiry only when it was just created.
const INCREMENT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
";

/// Connection parameters for `config`.
///
/// Built field by field rather than as a URL, so passwords containing
/// `@`, `/`, `#` or `:` reach the server unchanged.
pub fn connection_info(config: &RedisConfig) -> ConnectionInfo {
    ConnectionInfo {
        addr: ConnectionAddr::Tcp(config.host.clone(), config.port),
        redis: RedisConnectionInfo {
            db: config.db,
            password: config.password.clone(),
            ..RedisConnectionInfo::default()
        },
    }
}

/// Store backed by a Redis server.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    increment: Script,
}

impl RedisStore {
    /// Connect to the Redis server described by `config`.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Connection` if the URL is invalid or the server
    /// cannot be reached.
    pub async fn connect(config: &RedisConfig) -> CacheResult<Self> {
        let client = redis::Client::open(connection_info(config))
            .map_err(|e| CacheError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        info!(host = %config.host, port = config.port, db = config.db, "Connected to Redis");
        Ok(Self {
            conn,
            increment: Script::new(INCREMENT_SCRIPT),
        })
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn.clone();
        let raw: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::store("get", e))?;
        // Non-UTF-8 payloads fall through to JSON parsing and read as a miss.
        Ok(raw.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let _: () = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::store("set", e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::store("delete", e))?;
        Ok(())
    }

    async fn clear(&self, prefix: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", escape_glob(prefix));
        let mut cursor: u64 = 0;
        let mut removed = 0usize;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| CacheError::store("clear", e))?;

            if !keys.is_empty() {
                removed += keys.len();
                let _: i64 = redis::cmd("DEL")
                    .arg(&keys)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| CacheError::store("clear", e))?;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(prefix, removed, "Cleared Redis keys");
        Ok(())
    }

    async fn increment(&self, key: &str, ttl: Duration) -> CacheResult<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = self
            .increment
            .key(key)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CacheError::store("increment", e))?;
        Ok(count)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Milliseconds for `PX`/`PEXPIRE`; Redis rejects zero.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Escape Redis glob metacharacters so a prefix matches literally.
fn escape_glob(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
