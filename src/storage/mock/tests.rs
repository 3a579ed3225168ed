use crate::storage::{KeyRange, NewEntry, RevisionLog, StorageError};

use super::*;

async fn migrated() -> MockLog {
    let log = MockLog::new();
    log.migrate().await.unwrap();
    log
}

#[tokio::test]
async fn test_mock_append_assigns_increasing_ids() {
    let log = migrated().await;
    let a = log.append(NewEntry::create("/a", b"1".to_vec(), 0, 0)).await.unwrap();
    let b = log.append(NewEntry::create("/b", b"1".to_vec(), 0, 0)).await.unwrap();
    assert!(b > a);
    assert_eq!(log.current_revision().await.unwrap(), b);
}

#[tokio::test]
async fn test_mock_rejects_duplicate_prev_revision() {
    let log = migrated().await;
    log.append(NewEntry::create("/a", b"1".to_vec(), 0, 0)).await.unwrap();
    let err = log
        .append(NewEntry::create("/a", b"2".to_vec(), 0, 0))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::KeyExists));
}

#[tokio::test]
async fn test_mock_failed_append_consumes_id() {
    let log = migrated().await;
    let first = log.append(NewEntry::create("/a", b"1".to_vec(), 0, 0)).await.unwrap();
    let _ = log.append(NewEntry::create("/a", b"1".to_vec(), 0, 0)).await;
    let next = log.append(NewEntry::create("/b", b"1".to_vec(), 0, 0)).await.unwrap();
    assert_eq!(next, first + 2);
}

#[tokio::test]
async fn test_mock_range_hides_tombstones_and_sentinel() {
    let log = migrated().await;
    let id = log.append(NewEntry::create("/a", b"1".to_vec(), 0, 0)).await.unwrap();
    log.append(NewEntry::create("/b", b"1".to_vec(), 0, 0)).await.unwrap();
    let (_, current) = log.current_entry("/a", false).await.unwrap();
    let current = current.unwrap();
    assert_eq!(current.id, id);
    log.append(NewEntry::tombstone(&current)).await.unwrap();

    let (_, live) = log.range(&KeyRange::from(""), 0, None, false).await.unwrap();
    assert_eq!(live.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(), ["/b"]);

    let (_, all) = log.range(&KeyRange::from(""), 0, None, true).await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn test_mock_compact_moves_watermark() {
    let log = migrated().await;
    let created = log.append(NewEntry::create("/a", b"1".to_vec(), 0, 0)).await.unwrap();
    let (_, current) = log.current_entry("/a", false).await.unwrap();
    let updated = log
        .append(NewEntry::update(&current.unwrap(), b"2".to_vec(), 0))
        .await
        .unwrap();

    assert_eq!(log.compact(updated).await.unwrap(), 1);
    assert_eq!(log.compact_revision().await.unwrap(), updated);
    assert!(log.rows().await.iter().all(|row| row.id != created));
    assert!(matches!(
        log.after(created - 1, 10).await,
        Err(StorageError::Compacted { .. })
    ));
}
