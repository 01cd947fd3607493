use pmotidal::cache::cache_key;
use pmotidal::{ManualClock, ResponseCache, TidalError};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const TTL: Duration = Duration::from_secs(60);

fn create_test_cache() -> (Arc<ManualClock>, Arc<ResponseCache>) {
    let clock = Arc::new(ManualClock::default());
    let cache = Arc::new(ResponseCache::new(clock.clone()));
    (clock, cache)
}

async fn lookup(cache: &ResponseCache, calls: &AtomicUsize, params: &Value) -> Vec<String> {
    cache
        .get_or_compute("search", params, TTL, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec!["So What".to_string(), "Blue in Green".to_string()])
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_hit_within_ttl() {
    let (clock, cache) = create_test_cache();
    let calls = AtomicUsize::new(0);
    let params = json!({"query": "kind of blue", "limit": 10});

    let first = lookup(&cache, &calls, &params).await;
    clock.advance_secs(59);
    let second = lookup(&cache, &calls, &params).await;

    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let stats = cache.stats().await;
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.entries, 1);
}

#[tokio::test]
async fn test_many_live_entries_are_all_kept() {
    let (clock, cache) = create_test_cache();
    let calls = AtomicUsize::new(0);
    let queries: Vec<Value> = (0..2_000).map(|i| json!({"query": i})).collect();

    for params in &queries {
        lookup(&cache, &calls, params).await;
    }
    clock.advance_secs(59);
    for params in &queries {
        lookup(&cache, &calls, params).await;
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2_000);
    assert_eq!(cache.stats().await.entries, 2_000);
}

#[tokio::test]
async fn test_expired_entry_is_recomputed() {
    let (clock, cache) = create_test_cache();
    let calls = AtomicUsize::new(0);
    let params = json!({"query": "kind of blue"});

    lookup(&cache, &calls, &params).await;
    // À l'instant exact de l'expiration, l'entrée n'est plus servie
    clock.advance_secs(60);
    lookup(&cache, &calls, &params).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_parameter_order_does_not_matter() {
    let (_clock, cache) = create_test_cache();
    let calls = AtomicUsize::new(0);

    let mut a = Map::new();
    a.insert("query".into(), json!("miles"));
    a.insert("limit".into(), json!(10));
    let mut b = Map::new();
    b.insert("limit".into(), json!(10));
    b.insert("query".into(), json!("miles"));

    lookup(&cache, &calls, &Value::Object(a)).await;
    lookup(&cache, &calls, &Value::Object(b)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_different_parameters_are_distinct_entries() {
    let (_clock, cache) = create_test_cache();
    let calls = AtomicUsize::new(0);

    lookup(&cache, &calls, &json!({"query": "miles"})).await;
    lookup(&cache, &calls, &json!({"query": "coltrane"})).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_ne!(
        cache_key("search", &json!({"query": "miles"})),
        cache_key("search", &json!({"query": "coltrane"}))
    );
}

#[tokio::test]
async fn test_errors_are_not_cached() {
    let (_clock, cache) = create_test_cache();
    let calls = AtomicUsize::new(0);
    let params = json!({"track_id": "1"});

    let failed: pmotidal::Result<String> = cache
        .get_or_compute("track", &params, TTL, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TidalError::NotFound("track 1".into()))
        })
        .await;
    assert!(matches!(failed, Err(TidalError::NotFound(_))));

    let value: String = cache
        .get_or_compute("track", &params, TTL, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok("found".to_string())
        })
        .await
        .unwrap();

    assert_eq!(value, "found");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_sweep_removes_only_expired_entries() {
    let (clock, cache) = create_test_cache();

    let short: String = cache
        .get_or_compute("track", &json!({"id": 1}), Duration::from_secs(10), || async {
            Ok("short".to_string())
        })
        .await
        .unwrap();
    let long: String = cache
        .get_or_compute("track", &json!({"id": 2}), Duration::from_secs(600), || async {
            Ok("long".to_string())
        })
        .await
        .unwrap();
    assert_eq!((short.as_str(), long.as_str()), ("short", "long"));

    clock.advance_secs(30);
    assert_eq!(cache.sweep().await, 1);
    assert_eq!(cache.stats().await.entries, 1);

    clock.advance_secs(600);
    assert_eq!(cache.sweep().await, 1);
    assert_eq!(cache.stats().await.entries, 0);
}

#[tokio::test]
async fn test_background_sweeper_evicts_untouched_entries() {
    let (clock, cache) = create_test_cache();
    let calls = AtomicUsize::new(0);
    lookup(&cache, &calls, &json!({"query": "miles"})).await;

    let handle = cache.spawn_sweeper(Duration::from_millis(20));
    clock.advance_secs(120);
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.abort();

    assert_eq!(cache.stats().await.entries, 0);
}
