//! Application cache with a Redis backend and an in-memory fallback.
//!
//! Values are stored as JSON. The [`CacheManager`] prefers Redis when it is
//! configured and reachable and falls back to a bounded in-memory map
//! otherwise, so cached reads keep working through a Redis outage.
//!
//! Derived cache keys hash the call arguments, so two calls with the same
//! arguments share an entry regardless of argument order in the keyword map.

use async_trait::async_trait;
use fred::clients::Client as RedisClient;
use fred::interfaces::KeysInterface;
use fred::types::Expiration;
use fred::types::scan::Scanner;
use futures::StreamExt;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};

/// Default capacity for the in-memory fallback.
const DEFAULT_MEMORY_CAPACITY: usize = 1000;

/// Storage backend for the cache.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch a value. Expired entries read as absent.
    async fn get(&self, key: &str) -> AppResult<Option<Value>>;

    /// Store a value with an optional TTL.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> AppResult<()>;

    /// Remove a single entry. Returns whether it existed.
    async fn delete(&self, key: &str) -> AppResult<bool>;

    /// Remove every entry whose key starts with `prefix`. Returns the count.
    async fn delete_prefix(&self, prefix: &str) -> AppResult<u64>;

    /// Remove all entries.
    async fn clear(&self) -> AppResult<()>;

    /// Number of live entries.
    async fn len(&self) -> AppResult<u64>;
}

struct MemoryEntry {
    value: Value,
    created_at: Instant,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Bounded in-memory cache.
///
/// Expiry is lazy: entries are dropped when read or when the map is swept
/// during an insert. At capacity the oldest entry by insertion time is
/// evicted.
pub struct MemoryCache {
    entries: RwLock<HashMap<String, MemoryEntry>>,
    capacity: usize,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_CAPACITY)
    }
}

impl MemoryCache {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> AppResult<Option<Value>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }
        // Expired: drop it under the write lock.
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> AppResult<()> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;

        entries.retain(|_, entry| !entry.is_expired(now));

        if entries.len() >= self.capacity && !entries.contains_key(key) {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.created_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                created_at: now,
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> AppResult<u64> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }

    async fn clear(&self) -> AppResult<()> {
        self.entries.write().await.clear();
        Ok(())
    }

    async fn len(&self) -> AppResult<u64> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries.values().filter(|e| !e.is_expired(now)).count() as u64)
    }
}

/// Redis-backed cache. Keys are namespaced under a configurable prefix.
pub struct RedisCache {
    client: Arc<RedisClient>,
    prefix: String,
}

impl RedisCache {
    #[must_use]
    pub fn new(client: Arc<RedisClient>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }
}

fn redis_err(e: &fred::error::Error) -> AppError {
    AppError::Cache(format!("redis: {e}"))
}

fn json_err(e: &serde_json::Error) -> AppError {
    AppError::Cache(format!("cache serialization: {e}"))
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> AppResult<Option<Value>> {
        let raw: Option<String> = self
            .client
            .get(self.full_key(key))
            .await
            .map_err(|e| redis_err(&e))?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json).map_err(|e| json_err(&e))?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> AppResult<()> {
        let json = serde_json::to_string(&value).map_err(|e| json_err(&e))?;
        let expiration = ttl.map(|ttl| Expiration::EX(ttl.as_secs().max(1) as i64));
        self.client
            .set::<(), _, _>(self.full_key(key), json, expiration, None, false)
            .await
            .map_err(|e| redis_err(&e))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<bool> {
        let removed: i64 = self
            .client
            .del(self.full_key(key))
            .await
            .map_err(|e| redis_err(&e))?;
        Ok(removed > 0)
    }

    async fn delete_prefix(&self, prefix: &str) -> AppResult<u64> {
        let pattern = format!("{}*", self.full_key(prefix));
        let mut deleted = 0u64;
        let mut scanner = self.client.scan(pattern, Some(100), None);
        while let Some(page) = scanner.next().await {
            let mut page = page.map_err(|e| redis_err(&e))?;
            if let Some(keys) = page.take_results() {
                if !keys.is_empty() {
                    let removed: i64 = self.client.del(keys).await.map_err(|e| redis_err(&e))?;
                    deleted += removed.max(0) as u64;
                }
            }
            page.next();
        }
        Ok(deleted)
    }

    async fn clear(&self) -> AppResult<()> {
        self.delete_prefix("").await?;
        Ok(())
    }

    async fn len(&self) -> AppResult<u64> {
        let pattern = format!("{}:*", self.prefix);
        let mut count = 0u64;
        let mut scanner = self.client.scan(pattern, Some(100), None);
        while let Some(page) = scanner.next().await {
            let mut page = page.map_err(|e| redis_err(&e))?;
            if let Some(keys) = page.take_results() {
                count += keys.len() as u64;
            }
            page.next();
        }
        Ok(count)
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    /// Hits over reads, 0.0 when nothing has been read.
    pub hit_rate: f64,
}

/// Cache front-end preferring Redis with an in-memory fallback.
pub struct CacheManager {
    redis: Option<RedisCache>,
    memory: MemoryCache,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
}

impl CacheManager {
    /// Build a manager with both backends.
    #[must_use]
    pub fn new(redis: Option<RedisCache>, memory: MemoryCache, default_ttl: Duration) -> Self {
        Self {
            redis,
            memory,
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    /// Memory-only manager, used when Redis is not configured and in tests.
    #[must_use]
    pub fn memory_only(capacity: usize, default_ttl: Duration) -> Self {
        Self::new(None, MemoryCache::new(capacity), default_ttl)
    }

    /// Whether the Redis backend is configured.
    #[must_use]
    pub const fn has_redis(&self) -> bool {
        self.redis.is_some()
    }

    /// Deterministic key fragment for a set of call arguments.
    ///
    /// Positional arguments keep their order; keyword arguments are sorted
    /// by name, so insertion order does not change the key.
    #[must_use]
    pub fn argument_hash(args: &[Value], kwargs: &BTreeMap<String, Value>) -> String {
        let canonical = serde_json::json!({
            "args": args,
            "kwargs": kwargs,
        });
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    pub async fn get(&self, key: &str) -> AppResult<Option<Value>> {
        let found = match &self.redis {
            Some(redis) => match redis.get(key).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(error = %e, key = %key, "Redis read failed, falling back to memory");
                    self.memory.get(key).await?
                }
            },
            None => self.memory.get(key).await?,
        };

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Cache miss");
        }
        Ok(found)
    }

    pub async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> AppResult<()> {
        let ttl = Some(ttl.unwrap_or(self.default_ttl));
        self.sets.fetch_add(1, Ordering::Relaxed);

        match &self.redis {
            Some(redis) => {
                if let Err(e) = redis.set(key, value.clone(), ttl).await {
                    warn!(error = %e, key = %key, "Redis write failed, falling back to memory");
                    self.memory.set(key, value, ttl).await?;
                }
            }
            None => self.memory.set(key, value, ttl).await?,
        }
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> AppResult<bool> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        let from_memory = self.memory.delete(key).await?;
        let from_redis = match &self.redis {
            Some(redis) => match redis.delete(key).await {
                Ok(removed) => removed,
                Err(e) => {
                    warn!(error = %e, key = %key, "Redis delete failed");
                    false
                }
            },
            None => false,
        };
        Ok(from_memory || from_redis)
    }

    /// Delete every entry under a key prefix, across both backends.
    pub async fn delete_prefix(&self, prefix: &str) -> AppResult<u64> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        let mut removed = self.memory.delete_prefix(prefix).await?;
        if let Some(redis) = &self.redis {
            match redis.delete_prefix(prefix).await {
                Ok(n) => removed += n,
                Err(e) => warn!(error = %e, prefix = %prefix, "Redis prefix delete failed"),
            }
        }
        Ok(removed)
    }

    pub async fn clear(&self) -> AppResult<()> {
        self.memory.clear().await?;
        if let Some(redis) = &self.redis {
            if let Err(e) = redis.clear().await {
                warn!(error = %e, "Redis clear failed");
            }
        }
        Ok(())
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let reads = hits + misses;
        CacheStats {
            hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            hit_rate: if reads == 0 {
                0.0
            } else {
                hits as f64 / reads as f64
            },
        }
    }
}

/// Cache wrapper for one named computation.
///
/// Keys take the shape `{prefix}:{name}:{argument_hash}` so a whole
/// computation can be invalidated with one prefix delete.
pub struct CachedFn {
    manager: Arc<CacheManager>,
    prefix: String,
    name: String,
    ttl: Option<Duration>,
}

impl CachedFn {
    #[must_use]
    pub fn new(
        manager: Arc<CacheManager>,
        prefix: impl Into<String>,
        name: impl Into<String>,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            manager,
            prefix: prefix.into(),
            name: name.into(),
            ttl,
        }
    }

    /// Full cache key for a set of call arguments.
    #[must_use]
    pub fn key(&self, args: &[Value], kwargs: &BTreeMap<String, Value>) -> String {
        format!(
            "{}:{}:{}",
            self.prefix,
            self.name,
            CacheManager::argument_hash(args, kwargs)
        )
    }

    /// Read the cached result for these arguments, or compute and store it.
    pub async fn get_or_compute<F, Fut>(
        &self,
        args: &[Value],
        kwargs: &BTreeMap<String, Value>,
        compute: F,
    ) -> AppResult<Value>
    where
        F: FnOnce() -> Fut + Send,
        Fut: std::future::Future<Output = AppResult<Value>> + Send,
    {
        let key = self.key(args, kwargs);
        if let Some(found) = self.manager.get(&key).await? {
            return Ok(found);
        }
        let value = compute().await?;
        self.manager.set(&key, value.clone(), self.ttl).await?;
        Ok(value)
    }

    /// Drop every cached result of this computation.
    pub async fn invalidate(&self) -> AppResult<u64> {
        self.manager
            .delete_prefix(&format!("{}:{}:", self.prefix, self.name))
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manager() -> Arc<CacheManager> {
        Arc::new(CacheManager::memory_only(10, Duration::from_secs(300)))
    }

    #[tokio::test]
    async fn test_memory_set_get_delete() {
        let cache = MemoryCache::new(10);
        cache.set("a", json!({"n": 1}), None).await.unwrap();
        assert_eq!(cache.get("a").await.unwrap(), Some(json!({"n": 1})));
        assert!(cache.delete("a").await.unwrap());
        assert!(!cache.delete("a").await.unwrap());
        assert_eq!(cache.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_expiry_is_lazy() {
        let cache = MemoryCache::new(10);
        cache
            .set("a", json!(1), Some(Duration::from_millis(5)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.get("a").await.unwrap(), None);
        assert_eq!(cache.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_memory_evicts_oldest_at_capacity() {
        let cache = MemoryCache::new(2);
        cache.set("first", json!(1), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.set("second", json!(2), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
        cache.set("third", json!(3), None).await.unwrap();

        assert_eq!(cache.get("first").await.unwrap(), None);
        assert_eq!(cache.get("second").await.unwrap(), Some(json!(2)));
        assert_eq!(cache.get("third").await.unwrap(), Some(json!(3)));
    }

    #[tokio::test]
    async fn test_memory_delete_prefix() {
        let cache = MemoryCache::new(10);
        cache.set("requests:list:a", json!(1), None).await.unwrap();
        cache.set("requests:list:b", json!(2), None).await.unwrap();
        cache.set("users:list:a", json!(3), None).await.unwrap();

        assert_eq!(cache.delete_prefix("requests:list:").await.unwrap(), 2);
        assert_eq!(cache.get("users:list:a").await.unwrap(), Some(json!(3)));
    }

    #[test]
    fn test_argument_hash_is_order_insensitive_for_kwargs() {
        let args = vec![json!(1), json!("x")];
        let mut forward = BTreeMap::new();
        forward.insert("status".to_string(), json!("pending"));
        forward.insert("user_id".to_string(), json!(7));
        let mut reverse = BTreeMap::new();
        reverse.insert("user_id".to_string(), json!(7));
        reverse.insert("status".to_string(), json!("pending"));

        assert_eq!(
            CacheManager::argument_hash(&args, &forward),
            CacheManager::argument_hash(&args, &reverse)
        );
        assert_ne!(
            CacheManager::argument_hash(&args, &forward),
            CacheManager::argument_hash(&[json!("x"), json!(1)], &forward)
        );
    }

    #[tokio::test]
    async fn test_manager_counts_hits_and_misses() {
        let manager = manager();
        manager.set("k", json!(1), None).await.unwrap();
        assert!(manager.get("k").await.unwrap().is_some());
        assert!(manager.get("absent").await.unwrap().is_none());

        let stats = manager.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_cached_fn_computes_once_then_hits() {
        let manager = manager();
        let cached = CachedFn::new(manager, "cmsvs", "active_requests", None);
        let args = vec![json!(7)];
        let kwargs = BTreeMap::new();

        let first = cached
            .get_or_compute(&args, &kwargs, || async { Ok(json!([1, 2, 3])) })
            .await
            .unwrap();
        assert_eq!(first, json!([1, 2, 3]));

        // Second call must not recompute.
        let second = cached
            .get_or_compute(&args, &kwargs, || async {
                Err(AppError::Fatal("recomputed".into()))
            })
            .await
            .unwrap();
        assert_eq!(second, json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn test_cached_fn_invalidate() {
        let manager = manager();
        let cached = CachedFn::new(manager.clone(), "cmsvs", "active_requests", None);
        let args = vec![json!(7)];
        let kwargs = BTreeMap::new();

        cached
            .get_or_compute(&args, &kwargs, || async { Ok(json!(1)) })
            .await
            .unwrap();
        assert!(cached.invalidate().await.unwrap() >= 1);
        assert!(manager.get(&cached.key(&args, &kwargs)).await.unwrap().is_none());
    }
}
