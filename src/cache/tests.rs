use super::*;
use crate::error::PromoteError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

fn test_cache() -> (JobCache<MemoryCacheStore>, Arc<AtomicU64>) {
    let now = Arc::new(AtomicU64::new(10 * DAY_MS));
    let clock_now = now.clone();
    let cache = JobCache::new(MemoryCacheStore::new(), DEFAULT_TTL)
        .with_clock(Arc::new(move || clock_now.load(Ordering::SeqCst)));
    (cache, now)
}

fn payload(key: &str, value: &str) -> CachePayload {
    let mut p = CachePayload::new();
    p.insert(key.to_string(), serde_json::Value::String(value.to_string()));
    p
}

#[tokio::test]
async fn test_set_latest_unset() {
    let (cache, _) = test_cache();

    cache.set("A00x", CachePayload::new()).await.unwrap();
    assert_eq!(cache.latest_key().await.unwrap(), "A00x");

    cache.unset("A00x").await.unwrap();
    assert!(cache.get("A00x").await.unwrap().is_none());
}

#[tokio::test]
async fn test_latest_is_most_recent_write() {
    let (cache, now) = test_cache();

    cache.set("job-a", CachePayload::new()).await.unwrap();
    now.fetch_add(1_000, Ordering::SeqCst);
    cache.set("job-b", CachePayload::new()).await.unwrap();
    assert_eq!(cache.latest_key().await.unwrap(), "job-b");

    // Updating an older entry makes it the latest again.
    now.fetch_add(1_000, Ordering::SeqCst);
    cache.update("job-a", payload("stage", "uat")).await.unwrap();
    assert_eq!(cache.latest_key().await.unwrap(), "job-a");
}

#[tokio::test]
async fn test_equal_timestamps_pick_greater_key() {
    let (cache, _) = test_cache();
    cache.set("job-b", CachePayload::new()).await.unwrap();
    cache.set("job-a", CachePayload::new()).await.unwrap();
    assert_eq!(cache.latest_key().await.unwrap(), "job-b");
}

#[tokio::test]
async fn test_expired_entries_are_never_latest() {
    let (cache, now) = test_cache();

    cache.set("old-job", CachePayload::new()).await.unwrap();
    now.fetch_add(3 * DAY_MS + 1, Ordering::SeqCst);

    assert!(matches!(
        cache.latest_key().await,
        Err(PromoteError::NoRecentJob)
    ));
    assert!(cache.get("old-job").await.unwrap().is_none());

    // A fresh write alongside the expired one wins, and the rewrite prunes it.
    cache.set("new-job", CachePayload::new()).await.unwrap();
    assert_eq!(cache.latest_key().await.unwrap(), "new-job");
    assert!(!cache.store().snapshot().contains_key("old-job"));
}

#[tokio::test]
async fn test_entry_exactly_at_ttl_is_still_live() {
    let (cache, now) = test_cache();
    cache.set("edge", CachePayload::new()).await.unwrap();
    now.fetch_add(3 * DAY_MS, Ordering::SeqCst);
    assert_eq!(cache.latest_key().await.unwrap(), "edge");
}

#[tokio::test]
async fn test_empty_cache_has_no_latest() {
    let (cache, _) = test_cache();
    assert!(matches!(
        cache.latest_key().await,
        Err(PromoteError::NoRecentJob)
    ));
}

#[tokio::test]
async fn test_update_merges_payload() {
    let (cache, now) = test_cache();
    cache
        .set("job", payload("variant", "start"))
        .await
        .unwrap();
    now.fetch_add(500, Ordering::SeqCst);
    cache.update("job", payload("target", "uat")).await.unwrap();

    let entry = cache.get("job").await.unwrap().unwrap();
    assert_eq!(entry.payload["variant"], "start");
    assert_eq!(entry.payload["target"], "uat");
    assert_eq!(entry.timestamp, 10 * DAY_MS + 500);
}

#[tokio::test]
async fn test_update_and_unset_missing_key_fail() {
    let (cache, _) = test_cache();
    assert!(matches!(
        cache.update("ghost", CachePayload::new()).await,
        Err(PromoteError::CacheKeyNotFound(k)) if k == "ghost"
    ));
    assert!(matches!(
        cache.unset("ghost").await,
        Err(PromoteError::CacheKeyNotFound(_))
    ));
}

#[tokio::test]
async fn test_set_overwrites_without_error() {
    let (cache, _) = test_cache();
    cache.set("job", payload("a", "1")).await.unwrap();
    cache.set("job", payload("b", "2")).await.unwrap();

    let entry = cache.get("job").await.unwrap().unwrap();
    assert!(!entry.payload.contains_key("a"));
    assert_eq!(entry.payload["b"], "2");
    assert_eq!(cache.keys().await.unwrap(), vec!["job".to_string()]);
}

#[tokio::test]
async fn test_resolve_long_id() {
    let (cache, _) = test_cache();
    let long = "0Af5g00000AbCdEFGH";
    cache.set(long, CachePayload::new()).await.unwrap();

    // 18 characters pass through untouched, even if not cached.
    let other = "0Af5g00000ZZZZZAAA";
    assert_eq!(cache.resolve_long_id(other).await.unwrap(), other);
    let once = cache.resolve_long_id(long).await.unwrap();
    assert_eq!(cache.resolve_long_id(&once).await.unwrap(), once);

    // 15 characters expand through the cache.
    assert_eq!(cache.resolve_long_id(&long[..15]).await.unwrap(), long);

    // Unknown prefix or bad length.
    assert!(matches!(
        cache.resolve_long_id("0Af5g00000QQQQQ").await,
        Err(PromoteError::InvalidJobId(_))
    ));
    assert!(matches!(
        cache.resolve_long_id("0Af5g").await,
        Err(PromoteError::InvalidJobId(_))
    ));
}

#[tokio::test]
async fn test_resolve_latest() {
    let (cache, _) = test_cache();
    let long = "0Af5g00000AbCdEFGH";
    cache.set(long, CachePayload::new()).await.unwrap();

    assert_eq!(cache.resolve_latest(true, None).await.unwrap(), long);
    assert_eq!(
        cache.resolve_latest(false, Some(&long[..15])).await.unwrap(),
        long
    );
    assert!(matches!(
        cache.resolve_latest(false, None).await,
        Err(PromoteError::InvalidJobId(_))
    ));
}

#[test]
fn test_entry_serialization() {
    let entry = CacheEntry::new(1_700_000_000_000, CachePayload::new());
    let json = serde_json::to_string(&entry).unwrap();
    assert_eq!(json, r#"{"timestamp":1700000000000,"payload":{}}"#);

    // Entries written without a payload still load.
    let bare: CacheEntry = serde_json::from_str(r#"{"timestamp":5}"#).unwrap();
    assert!(bare.payload.is_empty());
}

#[tokio::test]
async fn test_preloaded_store_is_read_with_ttl() {
    let mut contents = CacheContents::new();
    contents.insert(
        "stale".to_string(),
        CacheEntry::new(1_000, CachePayload::new()),
    );
    contents.insert(
        "fresh".to_string(),
        CacheEntry::new(10 * DAY_MS - 1, CachePayload::new()),
    );

    let cache = JobCache::new(MemoryCacheStore::with_contents(contents), DEFAULT_TTL)
        .with_clock(Arc::new(|| 10 * DAY_MS));

    assert_eq!(cache.keys().await.unwrap(), vec!["fresh".to_string()]);
    assert_eq!(cache.latest_key().await.unwrap(), "fresh");
    // Reads never rewrite the store.
    assert!(cache.store().snapshot().contains_key("stale"));
}
