//! Primary (shared) cache tier contract.
//!
//! In production this is an external key/value server reachable by every
//! instance. `MemorySharedCache` stands in for it in tests and single-node
//! deployments.

use crate::error::CacheError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

#[async_trait]
pub trait SharedCacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Delete every key starting with `prefix`, returning how many were removed
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError>;

    /// Batch read. Stores without a batch primitive keep the default.
    async fn mget(&self, _keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        Err(CacheError::BatchUnsupported)
    }
}

/// In-process shared tier with fault injection
pub struct MemorySharedCache {
    entries: RwLock<HashMap<String, (String, Instant)>>,
    available: AtomicBool,
    batch_supported: AtomicBool,
    latency_ms: AtomicU64,
    failing_keys: RwLock<HashSet<String>>,
}

impl MemorySharedCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            batch_supported: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
            failing_keys: RwLock::new(HashSet::new()),
        }
    }

    /// Simulate the server going away (or coming back)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_batch_supported(&self, supported: bool) {
        self.batch_supported.store(supported, Ordering::SeqCst);
    }

    /// Delay added to every call
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make single-key reads of `key` fail
    pub fn fail_key(&self, key: &str) {
        if let Ok(mut keys) = self.failing_keys.write() {
            keys.insert(key.to_string());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn enter(&self) -> Result<(), CacheError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("shared cache offline".into()));
        }
        Ok(())
    }

    fn read_live(&self, key: &str) -> Result<Option<String>, CacheError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| CacheError::Unavailable("lock poisoned".into()))?;
        Ok(entries
            .get(key)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(value, _)| value.clone()))
    }
}

impl Default for MemorySharedCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedCacheStore for MemorySharedCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.enter().await?;
        let failing = self
            .failing_keys
            .read()
            .map(|keys| keys.contains(key))
            .unwrap_or(false);
        if failing {
            return Err(CacheError::Unavailable(format!("read of {} failed", key)));
        }
        self.read_live(key)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.enter().await?;
        let mut entries = self
            .entries
            .write()
            .map_err(|_| CacheError::Unavailable("lock poisoned".into()))?;
        entries.insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.enter().await?;
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(key);
        }
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        self.enter().await?;
        let mut entries = self
            .entries
            .write()
            .map_err(|_| CacheError::Unavailable("lock poisoned".into()))?;
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        if !self.batch_supported.load(Ordering::SeqCst) {
            return Err(CacheError::BatchUnsupported);
        }
        self.enter().await?;
        keys.iter().map(|k| self.read_live(k)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = MemorySharedCache::new();
        cache.set("a", "1".into(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("a").await.unwrap().as_deref(), Some("1"));
        cache.delete("a").await.unwrap();
        assert_eq!(cache.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_prefix() {
        let cache = MemorySharedCache::new();
        for key in ["lb:1", "lb:2", "stats:1"] {
            cache.set(key, "x".into(), Duration::from_secs(60)).await.unwrap();
        }
        assert_eq!(cache.delete_prefix("lb:").await.unwrap(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_errors() {
        let cache = MemorySharedCache::new();
        cache.set_available(false);
        assert!(matches!(cache.get("a").await, Err(CacheError::Unavailable(_))));
    }
}
