mod common;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bulwark::{CacheGuard, GuardConfig, GuardError};
use common::RecordingStore;
use futures::future::join_all;

type Result<T> = std::result::Result<T, GuardError<String>>;

const TTL: Duration = Duration::from_secs(60);

fn setup(config: GuardConfig) -> (Arc<CacheGuard<RecordingStore>>, RecordingStore) {
    let store = RecordingStore::new();
    (Arc::new(CacheGuard::new(store.clone(), config)), store)
}

#[tokio::test]
async fn test_hit_skips_fetch() {
    let (guard, _store) = setup(GuardConfig::default());
    let fetches = AtomicUsize::new(0);

    for _ in 0..3 {
        let value: Result<String> = guard
            .get_with_protection("user:1", TTL, || async {
                fetches.fetch_add(1, Ordering::SeqCst);
                Ok(Some("alice".to_owned()))
            })
            .await;
        assert_eq!(value.unwrap(), "alice");
    }

    assert_eq!(fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_absent_key_is_cached_as_null_marker() {
    let (guard, store) = setup(GuardConfig::default());
    let fetches = AtomicUsize::new(0);

    for _ in 0..5 {
        let value: Result<String> = guard
            .get_with_protection("user:missing", TTL, || async {
                fetches.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            })
            .await;
        assert!(matches!(value, Err(GuardError::EmptyValue)));
    }

    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    // The null marker uses its own TTL, without jitter.
    assert_eq!(
        store.ttls_for("user:missing"),
        vec![Some(Duration::from_secs(60))]
    );
}

#[tokio::test]
async fn test_penetration_disabled_fetches_every_time() {
    let (guard, store) = setup(GuardConfig::builder().penetration(false).build());
    let fetches = AtomicUsize::new(0);

    for _ in 0..3 {
        let value: Result<String> = guard
            .get_with_protection("user:missing", TTL, || async {
                fetches.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            })
            .await;
        assert!(value.unwrap_err().is_empty_value());
    }

    assert_eq!(fetches.load(Ordering::SeqCst), 3);
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn test_invalidate_drops_null_marker() {
    let (guard, _store) = setup(GuardConfig::default());
    let fetches = AtomicUsize::new(0);

    let first: Result<u64> = guard
        .get_with_protection("order:7", TTL, || async {
            fetches.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        })
        .await;
    assert!(first.is_err());

    guard.invalidate("order:7").await.unwrap();

    let second: Result<u64> = guard
        .get_with_protection("order:7", TTL, || async {
            fetches.fetch_add(1, Ordering::SeqCst);
            Ok(Some(7))
        })
        .await;
    assert_eq!(second.unwrap(), 7);
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_jittered_ttls_spread_over_range() {
    let (guard, store) = setup(GuardConfig::default());

    for i in 0..1000 {
        let key = format!("item:{i}");
        let value: Result<u32> = guard
            .get_with_protection(&key, TTL, || async move { Ok(Some(i)) })
            .await;
        assert_eq!(value.unwrap(), i);
    }

    let ttls: Vec<Duration> = store.all_ttls().into_iter().flatten().collect();
    assert_eq!(ttls.len(), 1000);
    for ttl in &ttls {
        assert!(*ttl >= Duration::from_secs(60), "{ttl:?}");
        assert!(*ttl < Duration::from_secs(360), "{ttl:?}");
    }
    let distinct: HashSet<_> = ttls.iter().collect();
    assert!(distinct.len() > 1);
}

#[tokio::test]
async fn test_avalanche_disabled_keeps_ttl() {
    let (guard, store) = setup(GuardConfig::builder().avalanche(false).build());
    assert_eq!(guard.ttl_with_jitter(TTL), TTL);

    let _: Result<u32> = guard
        .get_with_protection("k", TTL, || async { Ok(Some(1)) })
        .await;
    assert_eq!(store.ttls_for("k"), vec![Some(TTL)]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_misses_fetch_once() {
    let (guard, store) = setup(GuardConfig::default());
    let fetches = Arc::new(AtomicUsize::new(0));

    let tasks = (0..50).map(|_| {
        let guard = guard.clone();
        let fetches = fetches.clone();
        tokio::spawn(async move {
            let value: Result<String> = guard
                .get_with_protection("hot", TTL, || async move {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(Some("fresh".to_owned()))
                })
                .await;
            value
        })
    });

    for result in join_all(tasks).await {
        assert_eq!(result.unwrap().unwrap(), "fresh");
    }
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    assert!(store.raw("hot").is_some());

    let cached: Result<String> = guard
        .get_with_protection("hot", TTL, || async {
            fetches.fetch_add(1, Ordering::SeqCst);
            Ok(Some("stale".to_owned()))
        })
        .await;
    assert_eq!(cached.unwrap(), "fresh");
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_leader_does_not_fail_waiters() {
    let (guard, store) = setup(GuardConfig::default());
    let fetches = Arc::new(AtomicUsize::new(0));

    let leader = {
        let guard = guard.clone();
        let fetches = fetches.clone();
        tokio::spawn(async move {
            let load = guard.get_with_protection::<String, String, _, _>("hot", TTL, || async move {
                fetches.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(Some("fresh".to_owned()))
            });
            tokio::time::timeout(Duration::from_millis(20), load).await
        })
    };
    // Let the leader reach its fetch before the others arrive.
    tokio::time::sleep(Duration::from_millis(1)).await;

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let guard = guard.clone();
            let fetches = fetches.clone();
            tokio::spawn(async move {
                let value: Result<String> = guard
                    .get_with_protection("hot", TTL, || async move {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(Some("fresh".to_owned()))
                    })
                    .await;
                value
            })
        })
        .collect();

    assert!(leader.await.unwrap().is_err());
    for waiter in join_all(waiters).await {
        assert_eq!(waiter.unwrap().unwrap(), "fresh");
    }
    // The cancelled fetch plus one retry by a former waiter.
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
    assert!(store.raw("hot").is_some());
}

#[tokio::test]
async fn test_unencodable_value_is_format_error() {
    let (guard, store) = setup(GuardConfig::default());
    let fetches = AtomicUsize::new(0);

    for _ in 0..2 {
        // JSON object keys must be strings.
        let value: Result<HashMap<(u8, u8), u8>> = guard
            .get_with_protection("grid", TTL, || async {
                fetches.fetch_add(1, Ordering::SeqCst);
                Ok(Some(HashMap::from([((0, 0), 1)])))
            })
            .await;
        assert!(matches!(value, Err(GuardError::Format(_))), "{value:?}");
    }

    assert_eq!(fetches.load(Ordering::SeqCst), 2);
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn test_breakdown_disabled_fetches_per_caller() {
    let (guard, _store) = setup(GuardConfig::builder().breakdown(false).build());
    let fetches = AtomicUsize::new(0);

    let results = join_all((0..10).map(|_| {
        guard.get_with_protection("hot", TTL, || async {
            fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, String>(Some(1u8))
        })
    }))
    .await;

    assert!(results.iter().all(|r| matches!(r, Ok(1))));
    assert_eq!(fetches.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn test_fetch_error_is_not_cached() {
    let (guard, store) = setup(GuardConfig::default());

    let failed: Result<String> = guard
        .get_with_protection("user:1", TTL, || async { Err("db timeout".to_owned()) })
        .await;
    assert!(matches!(failed, Err(GuardError::Fetch(ref e)) if e == "db timeout"));
    assert!(store.raw("user:1").is_none());

    let recovered: Result<String> = guard
        .get_with_protection("user:1", TTL, || async { Ok(Some("alice".to_owned())) })
        .await;
    assert_eq!(recovered.unwrap(), "alice");
}

#[tokio::test]
async fn test_fetch_panic_is_reported() {
    for breakdown in [true, false] {
        let (guard, _store) = setup(GuardConfig::builder().breakdown(breakdown).build());

        let panicked: Result<String> = guard
            .get_with_protection("k", TTL, || async { panic!("source exploded") })
            .await;
        assert!(
            matches!(panicked, Err(GuardError::Panicked(ref m)) if m == "source exploded"),
            "{panicked:?}"
        );

        let value: Result<String> = guard
            .get_with_protection("k", TTL, || async { Ok(Some("ok".to_owned())) })
            .await;
        assert_eq!(value.unwrap(), "ok");
    }
}

#[tokio::test(start_paused = true)]
async fn test_lock_timeout() {
    let (guard, _store) = setup(
        GuardConfig::builder()
            .lock_timeout(Duration::from_millis(50))
            .build(),
    );

    // A load of a different value type is not coalesced with this one but
    // contends on the same per-key lock.
    let holder = {
        let guard = guard.clone();
        tokio::spawn(async move {
            let value: Result<String> = guard
                .get_with_protection("k", TTL, || async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(Some("slow".to_owned()))
                })
                .await;
            value
        })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;

    let waited: Result<u64> = guard
        .get_with_protection("k", TTL, || async { Ok(Some(1)) })
        .await;
    match waited {
        Err(GuardError::LockTimeout { key, timeout }) => {
            assert_eq!(key, "k");
            assert_eq!(timeout, Duration::from_millis(50));
        }
        other => panic!("expected lock timeout, got {other:?}"),
    }

    assert_eq!(holder.await.unwrap().unwrap(), "slow");
}

#[tokio::test]
async fn test_store_read_error_is_returned() {
    let (guard, store) = setup(GuardConfig::default());
    store.fail_reads(true);
    let fetches = AtomicUsize::new(0);

    let value: Result<String> = guard
        .get_with_protection("k", TTL, || async {
            fetches.fetch_add(1, Ordering::SeqCst);
            Ok(Some("v".to_owned()))
        })
        .await;

    assert!(matches!(value, Err(GuardError::Store(_))));
    assert_eq!(fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_undecodable_entry_is_refetched() {
    let (guard, store) = setup(GuardConfig::default());
    store.put_raw("k", b"not json at all");

    let value: Result<u32> = guard
        .get_with_protection("k", TTL, || async { Ok(Some(5)) })
        .await;

    assert_eq!(value.unwrap(), 5);
    assert_eq!(store.raw("k").unwrap().as_ref(), br#"{"value":5}"#);
}

#[tokio::test]
async fn test_locks_are_pruned() {
    let (guard, _store) = setup(GuardConfig::builder().max_idle_locks(8).build());

    for i in 0..100u32 {
        let _: Result<u32> = guard
            .get_with_protection(&format!("k{i}"), TTL, || async move { Ok(Some(i)) })
            .await;
    }

    assert!(guard.lock_count() <= 8, "{}", guard.lock_count());
}
