//! Integration tests for the content cache lifecycle: persistence across
//! restarts, age and size eviction, and index/directory consistency.
//!
//! Each test uses its own temporary directory and a manually advanced clock.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use pretty_assertions::assert_eq;
use tidings::cache::{cache_key, Clock, ContentCache};

const HOUR: i64 = 3600;

fn manual_clock(start: i64) -> (Arc<AtomicI64>, Arc<dyn Clock>) {
    let now = Arc::new(AtomicI64::new(start));
    let reader = Arc::clone(&now);
    let clock: Arc<dyn Clock> =
        Arc::new(move || DateTime::from_timestamp(reader.load(Ordering::SeqCst), 0).unwrap());
    (now, clock)
}

/// Keys of every `.html` file in the cache directory.
fn files_on_disk(dir: &Path) -> HashSet<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| {
            let path = entry.unwrap().path();
            if path.extension()? != "html" {
                return None;
            }
            path.file_stem()?.to_str().map(str::to_owned)
        })
        .collect()
}

#[tokio::test]
async fn test_entries_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let (_now, clock) = manual_clock(1_700_000_000);

    let cache = ContentCache::open(dir.path(), Arc::clone(&clock)).await.unwrap();
    cache.put("article-1", "<h1>One</h1>").await.unwrap();
    cache.put("article-2", "<h1>Two</h1>").await.unwrap();
    let before = cache.stats().await.unwrap();
    cache.shutdown().await.unwrap();

    let reopened = ContentCache::open(dir.path(), clock).await.unwrap();
    assert_eq!(reopened.stats().await.unwrap(), before);
    assert_eq!(reopened.get("article-2").await.as_deref(), Some("<h1>Two</h1>"));
}

#[tokio::test]
async fn test_age_then_size_eviction() {
    let dir = tempfile::tempdir().unwrap();
    let (now, clock) = manual_clock(1_700_000_000);
    let cache = ContentCache::open(dir.path(), clock).await.unwrap();

    // Ten 100-byte entries, one per hour
    for i in 0..10 {
        cache.put(&format!("a{i}"), &"z".repeat(100)).await.unwrap();
        now.fetch_add(HOUR, Ordering::SeqCst);
    }

    // Entries a0..a3 were cached more than six hours ago
    let aged = cache
        .evict_older_than(Duration::from_secs(6 * HOUR as u64))
        .await
        .unwrap();
    assert_eq!(aged, 4);

    let sized = cache.enforce_size_limit(450).await.unwrap();
    assert_eq!(sized, 2);

    let stats = cache.stats().await.unwrap();
    assert_eq!(stats.entry_count, 4);
    assert_eq!(stats.total_size, 400);
    for gone in ["a0", "a3", "a4", "a5"] {
        assert_eq!(cache.get(gone).await, None, "{gone}");
    }
    for kept in ["a6", "a9"] {
        assert!(cache.get(kept).await.is_some(), "{kept}");
    }
}

#[tokio::test]
async fn test_directory_matches_index_after_mutations() {
    let dir = tempfile::tempdir().unwrap();
    let (now, clock) = manual_clock(1_700_000_000);
    let cache = ContentCache::open(dir.path(), clock).await.unwrap();

    for i in 0..6 {
        cache.put(&format!("doc-{i}"), &format!("<p>{i}</p>")).await.unwrap();
        now.fetch_add(60, Ordering::SeqCst);
    }
    cache.put("doc-0", "<p>rewritten</p>").await.unwrap();
    cache.enforce_size_limit(40).await.unwrap();

    // 56 bytes total: doc-1 and doc-2 are the oldest and go first
    let expected: HashSet<String> = ["doc-0", "doc-3", "doc-4", "doc-5"]
        .into_iter()
        .map(cache_key)
        .collect();
    assert_eq!(files_on_disk(dir.path()), expected);

    let stats = cache.stats().await.unwrap();
    assert_eq!(stats.entry_count, 4);
    assert_eq!(stats.total_size, 40);
    assert_eq!(cache.get("doc-0").await.as_deref(), Some("<p>rewritten</p>"));

    cache.clear().await.unwrap();
    assert!(files_on_disk(dir.path()).is_empty());
    assert_eq!(cache.stats().await.unwrap().total_size, 0);
}
