use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use deadpool_redis::{Pool, Runtime};
use redis::AsyncCommands;

/// LookasideCache
///
/// Key/value accelerator sitting beside the authoritative store. Every
/// operation is safe to fail, retry, or skip: `get` reports any backend or
/// decoding problem as a plain miss, and `set`/`delete` absorb their errors
/// after logging them. Nothing in this trait can fail a request.
#[async_trait]
pub trait LookasideCache: Send + Sync {
    /// Returns the raw cached bytes, or `None` on absence, expiry, or any
    /// backend error.
    async fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Stores `value` under `key` for `ttl`. Runs to completion (success or
    /// logged failure) before returning, so a caller that awaits it can
    /// consider the write cycle finished.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration);

    /// Best-effort removal; a missing key is not an error.
    async fn delete(&self, key: &str);
}

/// The shared handle type for the cache across the application state.
pub type CacheState = Arc<dyn LookasideCache>;

/// A cached entry with its expiry bookkeeping. Data is wrapped in the map
/// directly; entries past their TTL read as absent and are reaped lazily.
#[derive(Clone, Debug)]
struct CachedEntry {
    data: Vec<u8>,
    cached_at: Instant,
    ttl: Duration,
}

impl CachedEntry {
    fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// MemoryCache
///
/// In-process TTL map. The default tier when no Redis URL is configured, and
/// the backend for the test suite.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, CachedEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LookasideCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => Some(entry.data.clone()),
            Some(entry) => {
                drop(entry);
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            CachedEntry {
                data: value,
                cached_at: Instant::now(),
                ttl,
            },
        );
    }

    async fn delete(&self, key: &str) {
        self.entries.remove(key);
    }
}

/// RedisCache
///
/// Redis-backed tier for multi-instance deployments. Connection or command
/// failures are logged at `warn` and reported as misses/no-ops; the cache is
/// never the system of record, so losing it costs latency, not correctness.
pub struct RedisCache {
    pool: Pool,
}

impl RedisCache {
    pub fn connect(url: &str) -> Result<Self, deadpool_redis::CreatePoolError> {
        let pool = deadpool_redis::Config::from_url(url).create_pool(Some(Runtime::Tokio1))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl LookasideCache for RedisCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "redis connection failed, treating as miss");
                return None;
            }
        };
        match conn.get::<_, Option<Vec<u8>>>(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "redis GET failed, treating as miss");
                None
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "redis connection failed, skipping SET");
                return;
            }
        };
        if let Err(e) = conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await {
            tracing::warn!(key = %key, error = %e, "redis SET failed");
        } else {
            tracing::debug!(key = %key, ttl_secs = ttl.as_secs(), "cache set");
        }
    }

    async fn delete(&self, key: &str) {
        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "redis connection failed, skipping DEL");
                return;
            }
        };
        if let Err(e) = conn.del::<_, ()>(key).await {
            tracing::warn!(key = %key, error = %e, "redis DEL failed");
        }
    }
}
