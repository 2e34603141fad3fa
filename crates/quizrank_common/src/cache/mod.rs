//! Cache Layer
//!
//! Read-through cache in front of the authoritative store. Never a source of
//! truth: every failure in here degrades to a miss.
//!
//! ## Tiers
//!
//! - Primary: a shared store reachable by every instance (optional)
//! - Local: bounded in-process map, used only when the primary is absent,
//!   failing, or short-circuited. It is not shared between instances, so a
//!   local hit may not reflect writes made elsewhere.
//!
//! ## Records
//!
//! Every value is wrapped in a `CacheRecord { payload, written_at, ttl }`.
//! Records older than their TTL are dropped on read.

pub mod circuit;
pub mod keys;
pub mod shared;

pub use circuit::{CircuitBreaker, CircuitSettings, CircuitState};
pub use keys::CacheKey;
pub use shared::{MemorySharedCache, SharedCacheStore};

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use chrono::Utc;
use lru::LruCache;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Stored envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    pub payload: serde_json::Value,
    /// Unix milliseconds
    pub written_at: i64,
    /// Milliseconds
    pub ttl: u64,
}

impl CacheRecord {
    pub fn new(payload: serde_json::Value, ttl: Duration) -> Self {
        Self {
            payload,
            written_at: Utc::now().timestamp_millis(),
            ttl: ttl.as_millis() as u64,
        }
    }

    pub fn age(&self) -> Duration {
        let elapsed = Utc::now().timestamp_millis() - self.written_at;
        Duration::from_millis(elapsed.max(0) as u64)
    }

    pub fn is_expired(&self) -> bool {
        self.age() >= Duration::from_millis(self.ttl)
    }
}

/// Which tier answered a read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    Primary,
    Local,
    Miss,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    primary_hits: AtomicU64,
    local_hits: AtomicU64,
    errors: AtomicU64,
    refreshes: AtomicU64,
    refresh_failures: AtomicU64,
}

/// Point-in-time cache statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub primary_hits: u64,
    pub local_hits: u64,
    pub errors: u64,
    pub refreshes: u64,
    pub refresh_failures: u64,
    pub local_entries: usize,
    pub circuit: CircuitState,
}

pub struct CacheLayer {
    primary: Option<Arc<dyn SharedCacheStore>>,
    local: Mutex<LruCache<String, CacheRecord>>,
    circuit: Mutex<CircuitBreaker>,
    refreshing: Mutex<HashSet<String>>,
    counters: Counters,
    config: CacheConfig,
}

impl CacheLayer {
    pub fn new(primary: Option<Arc<dyn SharedCacheStore>>, config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.local_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            primary,
            local: Mutex::new(LruCache::new(capacity)),
            circuit: Mutex::new(CircuitBreaker::new(CircuitSettings::from_config(&config))),
            refreshing: Mutex::new(HashSet::new()),
            counters: Counters::default(),
            config,
        }
    }

    /// Local tier only
    pub fn local_only(config: CacheConfig) -> Self {
        Self::new(None, config)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.lookup(key).await.0
    }

    /// Read `key`, reporting which tier served it
    pub async fn lookup<T: DeserializeOwned>(&self, key: &str) -> (Option<T>, CacheTier) {
        match self.lookup_record(key).await {
            Some((record, tier)) => match self.decode(key, record).await {
                Some(value) => (Some(value), tier),
                None => (None, CacheTier::Miss),
            },
            None => (None, CacheTier::Miss),
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        if !self.config.enabled {
            return;
        }
        let payload = match serde_json::to_value(value) {
            Ok(payload) => payload,
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key, error = %e, "Failed to serialize cache value");
                return;
            }
        };
        self.put_record(key, CacheRecord::new(payload, ttl)).await;
    }

    /// Remove `key` from both tiers
    pub async fn delete(&self, key: &str) {
        if !self.config.enabled {
            return;
        }
        if let Some(primary) = self.primary_tier().await {
            let _ = self.call_primary("delete", primary.delete(key)).await;
        }
        self.local.lock().await.pop(key);
    }

    /// Remove every key starting with `prefix` from both tiers
    pub async fn invalidate_prefix(&self, prefix: &str) -> u64 {
        if !self.config.enabled {
            return 0;
        }
        let mut removed = 0;
        if let Some(primary) = self.primary_tier().await {
            if let Ok(n) = self.call_primary("delete_prefix", primary.delete_prefix(prefix)).await {
                removed += n;
            }
        }

        let mut local = self.local.lock().await;
        let doomed: Vec<String> = local
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            local.pop(key);
        }
        removed += doomed.len() as u64;
        debug!(prefix, removed, "Invalidated cache prefix");
        removed
    }

    /// Batch read. A failing key yields `None` without failing the rest; when
    /// the primary has no batch primitive each key is looked up on its own.
    pub async fn mget<T: DeserializeOwned>(&self, keys: &[String]) -> Vec<Option<T>> {
        if !self.config.enabled {
            return keys.iter().map(|_| None).collect();
        }

        if let Some(primary) = self.primary_tier().await {
            match self.call_primary("mget", primary.mget(keys)).await {
                Ok(raw) if raw.len() == keys.len() => {
                    let mut out = Vec::with_capacity(keys.len());
                    for (key, value) in keys.iter().zip(raw) {
                        let record = value.and_then(|s| self.parse_record(key, &s));
                        let decoded = match record {
                            Some(record) if !record.is_expired() => {
                                self.record_hit(CacheTier::Primary);
                                self.decode(key, record).await
                            }
                            _ => {
                                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                                None
                            }
                        };
                        out.push(decoded);
                    }
                    return out;
                }
                Ok(_) => warn!("Batch get returned a mismatched result count"),
                Err(CacheError::BatchUnsupported) => {
                    debug!("Batch get unsupported, falling back to single lookups")
                }
                Err(_) => {}
            }
        }

        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.get(key).await);
        }
        out
    }

    /// Stale-while-revalidate read.
    ///
    /// On a hit older than `ttl * refresh_ratio` the cached value is returned
    /// and `recompute` runs in a background task that overwrites the entry.
    /// On a miss `recompute` runs inline and its result is stored.
    pub async fn get_with_refresh<T, F, Fut>(
        self: &Arc<Self>,
        key: &str,
        ttl: Duration,
        recompute: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if !self.config.enabled {
            return recompute().await;
        }

        if let Some((record, _tier)) = self.lookup_record(key).await {
            let age = record.age();
            if let Some(value) = self.decode::<T>(key, record).await {
                if age >= ttl.mul_f64(self.config.refresh_ratio) {
                    self.spawn_refresh(key.to_string(), ttl, recompute).await;
                }
                return Ok(value);
            }
        }

        let value = recompute().await?;
        self.set(key, &value, ttl).await;
        Ok(value)
    }

    pub async fn stats(&self) -> CacheStats {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            primary_hits: self.counters.primary_hits.load(Ordering::Relaxed),
            local_hits: self.counters.local_hits.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            refreshes: self.counters.refreshes.load(Ordering::Relaxed),
            refresh_failures: self.counters.refresh_failures.load(Ordering::Relaxed),
            local_entries: self.local.lock().await.len(),
            circuit: self.circuit.lock().await.state(),
        }
    }

    async fn spawn_refresh<T, F, Fut>(self: &Arc<Self>, key: String, ttl: Duration, recompute: F)
    where
        T: Serialize + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if !self.refreshing.lock().await.insert(key.clone()) {
            return;
        }
        self.counters.refreshes.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "Refreshing cache entry in background");

        let cache = Arc::clone(self);
        tokio::spawn(async move {
            // The key is released even when `recompute` panics
            match tokio::spawn(async move { recompute().await }).await {
                Ok(Ok(value)) => cache.set(&key, &value, ttl).await,
                Ok(Err(e)) => {
                    cache.counters.refresh_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(key = %key, error = %e, "Background cache refresh failed");
                }
                Err(e) => {
                    cache.counters.refresh_failures.fetch_add(1, Ordering::Relaxed);
                    error!(key = %key, error = %e, "Background cache refresh aborted");
                }
            }
            cache.refreshing.lock().await.remove(&key);
        });
    }

    async fn lookup_record(&self, key: &str) -> Option<(CacheRecord, CacheTier)> {
        if !self.config.enabled {
            return None;
        }

        let found = match self.primary_tier().await {
            Some(primary) => match self.call_primary("get", primary.get(key)).await {
                Ok(raw) => raw
                    .and_then(|s| self.parse_record(key, &s))
                    .map(|r| (r, CacheTier::Primary)),
                Err(_) => self.local_record(key).await,
            },
            None => self.local_record(key).await,
        };

        match found {
            Some((record, tier)) if record.is_expired() => {
                debug!(key, ?tier, "Dropping expired cache record");
                self.drop_record(key, tier).await;
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some((record, tier)) => {
                self.record_hit(tier);
                Some((record, tier))
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn local_record(&self, key: &str) -> Option<(CacheRecord, CacheTier)> {
        self.local
            .lock()
            .await
            .peek(key)
            .cloned()
            .map(|r| (r, CacheTier::Local))
    }

    async fn put_record(&self, key: &str, record: CacheRecord) {
        if let Some(primary) = self.primary_tier().await {
            match serde_json::to_string(&record) {
                Ok(raw) => {
                    let ttl = Duration::from_millis(record.ttl);
                    if self.call_primary("set", primary.set(key, raw, ttl)).await.is_ok() {
                        // The primary now holds the newest value
                        self.local.lock().await.pop(key);
                        return;
                    }
                }
                Err(e) => {
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(key, error = %e, "Failed to encode cache record");
                }
            }
        }
        self.local.lock().await.put(key.to_string(), record);
    }

    async fn drop_record(&self, key: &str, tier: CacheTier) {
        match tier {
            CacheTier::Primary => {
                if let Some(primary) = self.primary_tier().await {
                    let _ = self.call_primary("delete", primary.delete(key)).await;
                }
            }
            CacheTier::Local => {
                self.local.lock().await.pop(key);
            }
            CacheTier::Miss => {}
        }
    }

    fn parse_record(&self, key: &str, raw: &str) -> Option<CacheRecord> {
        match serde_json::from_str(raw) {
            Ok(record) => Some(record),
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key, error = %e, "Unreadable cache record");
                None
            }
        }
    }

    async fn decode<T: DeserializeOwned>(&self, key: &str, record: CacheRecord) -> Option<T> {
        match serde_json::from_value(record.payload) {
            Ok(value) => Some(value),
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key, error = %e, "Cached payload has an unexpected shape, evicting");
                self.delete(key).await;
                None
            }
        }
    }

    fn record_hit(&self, tier: CacheTier) {
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        match tier {
            CacheTier::Primary => self.counters.primary_hits.fetch_add(1, Ordering::Relaxed),
            CacheTier::Local => self.counters.local_hits.fetch_add(1, Ordering::Relaxed),
            CacheTier::Miss => 0,
        };
    }

    /// The primary tier, unless absent or short-circuited
    async fn primary_tier(&self) -> Option<Arc<dyn SharedCacheStore>> {
        let primary = self.primary.as_ref()?;
        if self.circuit.lock().await.is_open() {
            return None;
        }
        Some(Arc::clone(primary))
    }

    async fn call_primary<T, Fut>(&self, op: &'static str, call: Fut) -> std::result::Result<T, CacheError>
    where
        Fut: Future<Output = std::result::Result<T, CacheError>>,
    {
        let outcome = match tokio::time::timeout(self.config.primary_timeout(), call).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout),
        };
        match &outcome {
            Ok(_) => self.circuit.lock().await.record_success(),
            Err(CacheError::BatchUnsupported) => {}
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(op, error = %e, "Primary cache call failed, using local tier");
                self.circuit.lock().await.record_failure();
            }
        }
        outcome
    }
}
