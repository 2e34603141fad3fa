//! Two-tier cache behaviour with a fault-injecting shared tier.

use quizrank_common::cache::{CacheLayer, CacheTier, MemorySharedCache, SharedCacheStore};
use quizrank_common::config::CacheConfig;
use std::sync::Arc;
use std::time::Duration;

fn layer() -> (Arc<MemorySharedCache>, Arc<CacheLayer>) {
    let shared = Arc::new(MemorySharedCache::new());
    let primary: Arc<dyn SharedCacheStore> = shared.clone();
    let cache = Arc::new(CacheLayer::new(Some(primary), CacheConfig::default()));
    (shared, cache)
}

#[tokio::test]
async fn test_ttl_round_trip() {
    let (shared, cache) = layer();
    cache.set("stats:1", &vec![1u32, 2, 3], Duration::from_millis(60)).await;
    assert!(!shared.is_empty());

    let (value, tier) = cache.lookup::<Vec<u32>>("stats:1").await;
    assert_eq!(value, Some(vec![1, 2, 3]));
    assert_eq!(tier, CacheTier::Primary);

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(cache.get::<Vec<u32>>("stats:1").await, None);
}

#[tokio::test]
async fn test_serves_from_local_tier_when_shared_is_down() {
    let (shared, cache) = layer();
    shared.set_available(false);

    cache.set("progression:a", &42u64, Duration::from_secs(30)).await;
    let (value, tier) = cache.lookup::<u64>("progression:a").await;
    assert_eq!(value, Some(42));
    assert_eq!(tier, CacheTier::Local);

    let stats = cache.stats().await;
    assert!(stats.errors >= 1);
    assert_eq!(stats.local_hits, 1);
}

#[tokio::test]
async fn test_batch_fallback_keeps_partial_results() {
    let (shared, cache) = layer();
    shared.set_batch_supported(false);

    cache.set("k:1", &"one".to_string(), Duration::from_secs(30)).await;
    cache.set("k:3", &"three".to_string(), Duration::from_secs(30)).await;

    let keys = vec!["k:1".to_string(), "k:2".to_string(), "k:3".to_string()];
    let values = cache.mget::<String>(&keys).await;
    assert_eq!(values, vec![Some("one".to_string()), None, Some("three".to_string())]);
}

#[tokio::test]
async fn test_prefix_invalidation_spans_tiers() {
    let (_, cache) = layer();
    for i in 0..3 {
        cache.set(&format!("leaderboard:{}", i), &i, Duration::from_secs(30)).await;
    }
    cache.set("top_players:10", &0, Duration::from_secs(30)).await;

    cache.invalidate_prefix("leaderboard:").await;
    assert_eq!(cache.get::<i32>("leaderboard:0").await, None);
    assert_eq!(cache.get::<i32>("top_players:10").await, Some(0));
}

#[tokio::test]
async fn test_refresh_recomputes_once_on_miss() {
    let (_, cache) = layer();
    let first: u64 = cache
        .get_with_refresh("answer", Duration::from_secs(30), || async { Ok(7u64) })
        .await
        .unwrap();
    let second: u64 = cache
        .get_with_refresh("answer", Duration::from_secs(30), || async { Ok(8u64) })
        .await
        .unwrap();
    assert_eq!((first, second), (7, 7));
}
