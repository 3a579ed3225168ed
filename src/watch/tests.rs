use std::time::Duration;

use tokio_stream::StreamExt;

use super::*;
use crate::storage::mock::MockLog;
use crate::storage::{NewEntry, StorageError};

fn fast_config() -> WatchConfig {
    WatchConfig {
        poll_interval_ms: 10,
        batch_size: 2,
        channel_capacity: 4,
    }
}

async fn setup() -> (Arc<MockLog>, Arc<WatchEngine>) {
    let log = Arc::new(MockLog::new());
    log.migrate().await.unwrap();
    let engine = WatchEngine::start(log.clone(), &fast_config()).await.unwrap();
    (log, engine)
}

async fn put(log: &MockLog, engine: &WatchEngine, key: &str, value: &str) -> i64 {
    let (_, current) = log.current_entry(key, true).await.unwrap();
    let entry = match current {
        Some(current) if !current.deleted => {
            NewEntry::update(&current, value.as_bytes().to_vec(), 0)
        }
        Some(tombstone) => NewEntry::create(key, value.as_bytes().to_vec(), 0, tombstone.id),
        None => NewEntry::create(key, value.as_bytes().to_vec(), 0, 0),
    };
    let revision = log.append(entry).await.unwrap();
    engine.notify(revision);
    revision
}

/// Collect revisions from `stream` until `count` entries have arrived.
async fn collect(stream: &mut WatchStream, count: usize) -> Vec<i64> {
    let mut seen = Vec::new();
    while seen.len() < count {
        let batch = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("watch delivery timed out")
            .expect("stream ended")
            .expect("watch error");
        seen.extend(batch.iter().map(|e| e.id));
    }
    seen
}

#[tokio::test]
async fn test_subscriber_sees_matching_writes_in_order() {
    let (log, engine) = setup().await;
    let mut stream = engine.subscribe(KeyRange::prefix("/a/"), 0);

    let mut expected = Vec::new();
    for i in 0..5 {
        expected.push(put(&log, &engine, &format!("/a/{i}"), "v").await);
        put(&log, &engine, &format!("/b/{i}"), "v").await;
    }

    assert_eq!(collect(&mut stream, 5).await, expected);
}

#[tokio::test]
async fn test_subscriber_replays_history_from_start_revision() {
    let (log, engine) = setup().await;
    let first = put(&log, &engine, "/k", "1").await;
    let second = put(&log, &engine, "/k", "2").await;
    let third = put(&log, &engine, "/k", "3").await;

    // Let the poller catch up so the history is behind its watermark.
    while engine.revision() < third {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let mut stream = engine.subscribe(KeyRange::exact("/k"), second);
    let fourth = put(&log, &engine, "/k", "4").await;
    assert_eq!(collect(&mut stream, 3).await, [second, third, fourth]);
    assert!(first < second);
}

#[tokio::test]
async fn test_subscriber_below_compaction_gets_error() {
    let (log, engine) = setup().await;
    put(&log, &engine, "/k", "1").await;
    let second = put(&log, &engine, "/k", "2").await;
    log.compact(second).await.unwrap();

    let mut stream = engine.subscribe(KeyRange::exact("/k"), 1);
    let item = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(item, Err(StorageError::Compacted { compact_revision }) if compact_revision == second));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_gap_does_not_lose_later_entries() {
    let (log, engine) = setup().await;
    let mut stream = engine.subscribe(KeyRange::from(""), 0);

    let before = put(&log, &engine, "/x", "1").await;
    log.skip_ids(1).await;
    let after = put(&log, &engine, "/y", "1").await;

    assert_eq!(collect(&mut stream, 2).await, [before, after]);
}

#[tokio::test]
async fn test_dropped_subscriber_does_not_block_others() {
    let (log, engine) = setup().await;
    let dropped = engine.subscribe(KeyRange::from(""), 0);
    let mut kept = engine.subscribe(KeyRange::from(""), 0);
    drop(dropped);

    let mut expected = Vec::new();
    for i in 0..10 {
        expected.push(put(&log, &engine, &format!("/k{i}"), "v").await);
    }
    assert_eq!(collect(&mut kept, 10).await, expected);
}

#[tokio::test]
async fn test_feed_resumes_after_compaction_past_poller() {
    let log = Arc::new(MockLog::new());
    log.migrate().await.unwrap();
    let config = WatchConfig {
        poll_interval_ms: 60_000,
        ..fast_config()
    };
    let engine = WatchEngine::start(log.clone(), &config).await.unwrap();
    // Let the immediate first tick pass so only wakes drive the poller.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut stream = engine.subscribe(KeyRange::prefix("/b/"), 0);
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Writes the poller is never woken for, then compacted away.
    log.append(NewEntry::create("/a", b"1".to_vec(), 0, 0))
        .await
        .unwrap();
    let (_, current) = log.current_entry("/a", false).await.unwrap();
    let head = log
        .append(NewEntry::update(&current.unwrap(), b"2".to_vec(), 0))
        .await
        .unwrap();
    log.compact(head).await.unwrap();

    let written = put(&log, &engine, "/b/1", "v").await;
    assert_eq!(collect(&mut stream, 1).await, [written]);
    assert!(engine.revision() >= written);
}

#[tokio::test]
async fn test_keys_named_like_fills_are_delivered() {
    let (log, engine) = setup().await;
    let mut stream = engine.subscribe(KeyRange::from(""), 0);

    let config = put(&log, &engine, "gap-config", "1").await;
    let numbered = put(&log, &engine, &crate::storage::fill_name(config + 1), "1").await;
    let other = put(&log, &engine, "/x", "1").await;

    assert_eq!(collect(&mut stream, 3).await, [config, numbered, other]);
}
