//! RevisionLog interface tests.
//!
//! The log is shared by every test in a run, so each test works under its own
//! key prefix and only ever compares revisions relative to ones it produced.
//! Compaction affects the whole log and runs last.

use revkv::storage::{
    KeyRange, LogEntry, NewEntry, RevisionLog, StorageError, COMPACT_REV_KEY,
};

/// Create or update `name` to `value`, returning the new revision.
pub async fn put<S: RevisionLog + ?Sized>(log: &S, name: &str, value: &str) -> i64 {
    let (_, current) = log
        .current_entry(name, true)
        .await
        .expect("current_entry should succeed");
    let entry = match current {
        Some(current) if !current.deleted => {
            NewEntry::update(&current, value.as_bytes().to_vec(), 0)
        }
        Some(tombstone) => NewEntry::create(name, value.as_bytes().to_vec(), 0, tombstone.id),
        None => NewEntry::create(name, value.as_bytes().to_vec(), 0, 0),
    };
    log.append(entry).await.expect("append should succeed")
}

pub async fn delete<S: RevisionLog + ?Sized>(log: &S, name: &str) -> i64 {
    let (_, current) = log.current_entry(name, false).await.unwrap();
    let current = current.expect("key should be live");
    log.append(NewEntry::tombstone(&current))
        .await
        .expect("tombstone should succeed")
}

fn names(entries: &[LogEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.name.as_str()).collect()
}

// =============================================================================
// migrate / append
// =============================================================================

pub async fn test_migrate_is_idempotent<S: RevisionLog + ?Sized>(log: &S) {
    let before = log.current_revision().await.unwrap();
    log.migrate().await.expect("second migrate should succeed");
    assert_eq!(log.current_revision().await.unwrap(), before);
}

pub async fn test_append_revisions_increase<S: RevisionLog + ?Sized>(log: &S) {
    let mut last = log.current_revision().await.unwrap();
    for i in 0..5 {
        let revision = put(log, &format!("/append/{i}"), "v").await;
        assert!(revision > last, "revision {revision} should exceed {last}");
        last = revision;
    }
    assert_eq!(log.current_revision().await.unwrap(), last);
}

pub async fn test_append_same_prev_revision_conflicts<S: RevisionLog + ?Sized>(log: &S) {
    let created = put(log, "/race/k", "0").await;
    let (_, current) = log.current_entry("/race/k", false).await.unwrap();
    let current = current.unwrap();
    assert_eq!(current.id, created);

    log.append(NewEntry::update(&current, b"winner".to_vec(), 0))
        .await
        .expect("first writer should win");
    let loser = log
        .append(NewEntry::update(&current, b"loser".to_vec(), 0))
        .await;
    assert!(
        matches!(loser, Err(StorageError::KeyExists)),
        "second writer should fail with KeyExists, got {loser:?}"
    );

    let (_, current) = log.current_entry("/race/k", false).await.unwrap();
    assert_eq!(current.unwrap().value, b"winner");
}

pub async fn test_duplicate_create_conflicts<S: RevisionLog + ?Sized>(log: &S) {
    put(log, "/dup/k", "0").await;
    let again = log
        .append(NewEntry::create("/dup/k", b"1".to_vec(), 0, 0))
        .await;
    assert!(matches!(again, Err(StorageError::KeyExists)));
}

// =============================================================================
// current_entry / range
// =============================================================================

pub async fn test_read_your_write<S: RevisionLog + ?Sized>(log: &S) {
    let created = put(log, "/ryw/k", "one").await;
    let (revision, current) = log.current_entry("/ryw/k", false).await.unwrap();
    let current = current.expect("key should exist");
    assert!(revision >= created);
    assert_eq!(current.id, created);
    assert_eq!(current.value, b"one");
    assert!(current.created);
    assert_eq!(current.effective_create_revision(), created);

    let updated = put(log, "/ryw/k", "two").await;
    let (_, current) = log.current_entry("/ryw/k", false).await.unwrap();
    let current = current.unwrap();
    assert_eq!(current.id, updated);
    assert_eq!(current.prev_revision, created);
    assert_eq!(current.create_revision, created);
    assert_eq!(current.old_value, b"one");
}

pub async fn test_tombstone_visibility<S: RevisionLog + ?Sized>(log: &S) {
    put(log, "/tomb/a", "1").await;
    put(log, "/tomb/b", "1").await;
    let deleted = delete(log, "/tomb/a").await;

    let (_, current) = log.current_entry("/tomb/a", false).await.unwrap();
    assert!(current.is_none());

    let (_, with_tombstone) = log.current_entry("/tomb/a", true).await.unwrap();
    let tombstone = with_tombstone.expect("tombstone should be readable");
    assert!(tombstone.deleted);
    assert_eq!(tombstone.id, deleted);

    let (_, live) = log
        .range(&KeyRange::prefix("/tomb/"), 0, None, false)
        .await
        .unwrap();
    assert_eq!(names(&live), ["/tomb/b"]);

    let (_, all) = log
        .range(&KeyRange::prefix("/tomb/"), 0, None, true)
        .await
        .unwrap();
    assert_eq!(names(&all), ["/tomb/a", "/tomb/b"]);
}

pub async fn test_range_orders_and_limits<S: RevisionLog + ?Sized>(log: &S) {
    for name in ["/order/c", "/order/a", "/order/b", "/order/d"] {
        put(log, name, "v").await;
    }
    let (_, entries) = log
        .range(&KeyRange::prefix("/order/"), 0, None, false)
        .await
        .unwrap();
    assert_eq!(
        names(&entries),
        ["/order/a", "/order/b", "/order/c", "/order/d"]
    );

    let (_, limited) = log
        .range(&KeyRange::prefix("/order/"), 0, Some(2), false)
        .await
        .unwrap();
    assert_eq!(names(&limited), ["/order/a", "/order/b"]);

    let (_, span) = log
        .range(&KeyRange::span("/order/b", "/order/d"), 0, None, false)
        .await
        .unwrap();
    assert_eq!(names(&span), ["/order/b", "/order/c"]);
}

pub async fn test_range_as_of_revision<S: RevisionLog + ?Sized>(log: &S) {
    let first = put(log, "/history/k", "1").await;
    let second = put(log, "/history/k", "2").await;
    put(log, "/history/k", "3").await;

    let (_, at_first) = log
        .range(&KeyRange::exact("/history/k"), first, None, false)
        .await
        .unwrap();
    assert_eq!(at_first[0].value, b"1");

    let (current, at_second) = log
        .range(&KeyRange::prefix("/history/"), second, None, false)
        .await
        .unwrap();
    assert_eq!(at_second[0].value, b"2");
    assert!(current > second, "response revision is the head, not the as-of");

    let (_, before) = log
        .range(&KeyRange::exact("/history/k"), first - 1, None, false)
        .await
        .unwrap();
    assert!(before.is_empty());
}

pub async fn test_future_revision_rejected<S: RevisionLog + ?Sized>(log: &S) {
    let current = log.current_revision().await.unwrap();
    let result = log
        .range(&KeyRange::prefix("/"), current + 100, None, false)
        .await;
    assert!(matches!(
        result,
        Err(StorageError::FutureRevision { current_revision }) if current_revision == current
    ));
}

pub async fn test_range_excludes_sentinel<S: RevisionLog + ?Sized>(log: &S) {
    let (_, entries) = log
        .range(&KeyRange::from(""), 0, None, true)
        .await
        .unwrap();
    assert!(entries.iter().all(|e| e.name != COMPACT_REV_KEY));
}

pub async fn test_count<S: RevisionLog + ?Sized>(log: &S) {
    for i in 0..3 {
        put(log, &format!("/count/{i}"), "v").await;
    }
    delete(log, "/count/1").await;
    put(log, "/count/2", "w").await;

    let (revision, count) = log.count(&KeyRange::prefix("/count/"), 0).await.unwrap();
    assert_eq!(count, 2);
    assert_eq!(revision, log.current_revision().await.unwrap());
}

// =============================================================================
// after / fill
// =============================================================================

pub async fn test_after_is_the_change_feed<S: RevisionLog + ?Sized>(log: &S) {
    let start = log.current_revision().await.unwrap();
    let a = put(log, "/feed/a", "1").await;
    let b = put(log, "/feed/b", "1").await;
    let c = delete(log, "/feed/a").await;

    let feed = log.after(start, 100).await.unwrap();
    let ids: Vec<i64> = feed.iter().map(|e| e.id).collect();
    assert_eq!(ids, [a, b, c]);
    assert!(feed[2].deleted);

    let limited = log.after(start, 2).await.unwrap();
    assert_eq!(limited.len(), 2);
    assert!(log.after(c, 10).await.unwrap().is_empty());
}

pub async fn test_fill_plugs_gap<S: RevisionLog + ?Sized>(log: &S) {
    put(log, "/fill/k", "1").await;
    // A conflicting insert may consume an id without writing a row.
    let _ = log
        .append(NewEntry::create("/fill/k", b"x".to_vec(), 0, 0))
        .await;
    let current = log.current_revision().await.unwrap();
    let hole = current + 1;

    log.fill(hole).await.expect("fill should succeed");
    assert_eq!(log.current_revision().await.unwrap(), hole);

    let feed = log.after(current, 10).await.unwrap();
    assert_eq!(feed.len(), 1);
    assert!(feed[0].is_fill());
    assert_eq!(feed[0].id, hole);
    assert_eq!(feed[0].prev_revision, hole);

    let next = put(log, "/fill/k", "2").await;
    assert!(next > hole);
}

pub async fn test_size_is_positive<S: RevisionLog + ?Sized>(log: &S) {
    assert!(log.size().await.unwrap() > 0);
}

// =============================================================================
// compact
// =============================================================================

pub async fn test_compact<S: RevisionLog + ?Sized>(log: &S) {
    let keep = put(log, "/compact/keep", "1").await;
    put(log, "/compact/churn", "1").await;
    put(log, "/compact/churn", "2").await;
    let churn = put(log, "/compact/churn", "3").await;
    put(log, "/compact/gone", "1").await;
    delete(log, "/compact/gone").await;
    let watermark = log.current_revision().await.unwrap();
    let tail = put(log, "/compact/tail", "1").await;

    let removed = log.compact(watermark).await.expect("compact should succeed");
    assert!(removed >= 4, "superseded rows and the tombstone chain go");
    assert_eq!(log.compact_revision().await.unwrap(), watermark);

    let (_, live) = log
        .range(&KeyRange::prefix("/compact/"), 0, None, true)
        .await
        .unwrap();
    assert_eq!(
        live.iter().map(|e| (e.name.as_str(), e.id)).collect::<Vec<_>>(),
        [
            ("/compact/churn", churn),
            ("/compact/keep", keep),
            ("/compact/tail", tail)
        ]
    );

    assert_eq!(log.compact(watermark).await.unwrap(), 0, "already compacted");

    let below = log
        .range(&KeyRange::prefix("/compact/"), watermark - 1, None, false)
        .await;
    assert!(matches!(
        below,
        Err(StorageError::Compacted { compact_revision }) if compact_revision == watermark
    ));
    assert!(matches!(
        log.after(watermark - 1, 10).await,
        Err(StorageError::Compacted { .. })
    ));
    // Exact reads below the watermark still answer.
    log.range(&KeyRange::exact("/compact/keep"), watermark - 1, None, false)
        .await
        .expect("exact reads ignore compaction");

    let head = log.current_revision().await.unwrap();
    assert!(matches!(
        log.compact(head + 10).await,
        Err(StorageError::FutureRevision { .. })
    ));
}

// =============================================================================
// Test runner macro
// =============================================================================

/// Run all RevisionLog interface tests against a migrated log.
#[macro_export]
macro_rules! run_revision_log_tests {
    ($log:expr) => {
        use $crate::storage::revision_log_tests::*;

        test_migrate_is_idempotent($log).await;
        println!("  test_migrate_is_idempotent: PASSED");

        test_append_revisions_increase($log).await;
        println!("  test_append_revisions_increase: PASSED");

        test_append_same_prev_revision_conflicts($log).await;
        println!("  test_append_same_prev_revision_conflicts: PASSED");

        test_duplicate_create_conflicts($log).await;
        println!("  test_duplicate_create_conflicts: PASSED");

        test_read_your_write($log).await;
        println!("  test_read_your_write: PASSED");

        test_tombstone_visibility($log).await;
        println!("  test_tombstone_visibility: PASSED");

        test_range_orders_and_limits($log).await;
        println!("  test_range_orders_and_limits: PASSED");

        test_range_as_of_revision($log).await;
        println!("  test_range_as_of_revision: PASSED");

        test_future_revision_rejected($log).await;
        println!("  test_future_revision_rejected: PASSED");

        test_range_excludes_sentinel($log).await;
        println!("  test_range_excludes_sentinel: PASSED");

        test_count($log).await;
        println!("  test_count: PASSED");

        test_after_is_the_change_feed($log).await;
        println!("  test_after_is_the_change_feed: PASSED");

        test_fill_plugs_gap($log).await;
        println!("  test_fill_plugs_gap: PASSED");

        test_size_is_positive($log).await;
        println!("  test_size_is_positive: PASSED");

        // Compaction is log-wide; keep it last.
        test_compact($log).await;
        println!("  test_compact: PASSED");
    };
}
