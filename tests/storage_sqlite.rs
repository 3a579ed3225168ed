//! SQLite revision log integration tests.
//!
//! Run with: cargo test --test storage_sqlite --features sqlite
//!
//! Uses a file database in a temporary directory, no external dependencies
//! required.

mod storage;

use revkv::config::StorageConfig;
use revkv::storage::{init_storage, RevisionLog};

async fn open_log(dir: &tempfile::TempDir) -> std::sync::Arc<dyn RevisionLog> {
    let config = StorageConfig {
        endpoint: format!("sqlite://{}", dir.path().join("state.db").display()),
        ..Default::default()
    };
    init_storage(&config)
        .await
        .expect("Failed to open SQLite revision log")
}

#[tokio::test]
async fn test_sqlite_revision_log() {
    println!("=== SQLite RevisionLog Tests ===");

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let log = open_log(&dir).await;

    run_revision_log_tests!(&*log);

    println!("=== All SQLite RevisionLog tests PASSED ===");
}

#[tokio::test]
async fn test_sqlite_reopen_keeps_history() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let revision = {
        let log = open_log(&dir).await;
        storage::revision_log_tests::put(&*log, "/reopen/k", "v").await
    };

    let log = open_log(&dir).await;
    assert_eq!(log.current_revision().await.unwrap(), revision);
    let (_, entry) = log.current_entry("/reopen/k", false).await.unwrap();
    assert_eq!(entry.unwrap().value, b"v");
}

#[tokio::test]
async fn test_sqlite_unknown_scheme_rejected() {
    let config = StorageConfig {
        endpoint: "mysql://localhost/kv".to_string(),
        ..Default::default()
    };
    assert!(init_storage(&config).await.is_err());
}
