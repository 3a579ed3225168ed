//! Logical KV backend.
//!
//! Turns key-level intent (create, update at revision R, delete at revision R)
//! into appends on the revision log. The only concurrency control is the log's
//! `(name, prev_revision)` uniqueness: a lost race surfaces as
//! `StorageError::KeyExists`, after which the current state is re-read once and
//! the caller's precondition re-checked before a conflict is reported.

use async_trait::async_trait;

use crate::storage::{KeyRange, LogEntry};
use crate::watch::WatchStream;

pub mod compactor;
mod error;
mod logical;

pub use compactor::{spawn_compactor, Compactor, CompactorHandle};
pub use error::{KvError, Result};
pub use logical::LogBackend;

/// Key created on start so health probes have something to read.
pub const HEALTH_KEY: &str = "/registry/health";
/// Value of [`HEALTH_KEY`].
pub const HEALTH_VALUE: &[u8] = br#"{"health":"true"}"#;

/// Durable key-value operations over the revision log.
///
/// Every call returns the revision the result reflects.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Prepare the backend: seed the health key and start background work.
    async fn start(&self) -> Result<()>;

    /// Current entry for `key` as of `revision` (0 = latest). Absent keys are
    /// not an error.
    async fn get(&self, key: &str, revision: i64) -> Result<(i64, Option<LogEntry>)>;

    /// Create `key`. Fails with `KeyExists` if it is live.
    async fn create(&self, key: &str, value: Vec<u8>, lease: i64) -> Result<i64>;

    /// Replace `key` if its current revision is `expected`. Returns the new
    /// revision and the entry it replaced.
    async fn update(
        &self,
        key: &str,
        value: Vec<u8>,
        expected: i64,
        lease: i64,
    ) -> Result<(i64, LogEntry)>;

    /// Tombstone `key` if its current revision is `expected` (0 = any).
    ///
    /// Returns the deleted entry, or `None` when the key was already absent.
    async fn delete(&self, key: &str, expected: i64) -> Result<(i64, Option<LogEntry>)>;

    /// Live keys in `range` as of `revision`, ordered by name.
    async fn list(
        &self,
        range: &KeyRange,
        limit: Option<u64>,
        revision: i64,
    ) -> Result<(i64, Vec<LogEntry>)>;

    /// Number of live keys in `range` as of `revision`.
    async fn count(&self, range: &KeyRange, revision: i64) -> Result<(i64, i64)>;

    /// Change feed for `range` starting at `start_revision` (0 = now).
    async fn watch(&self, range: KeyRange, start_revision: i64) -> WatchStream;

    /// Compact the log up to `revision`. Returns the current revision.
    async fn compact(&self, revision: i64) -> Result<i64>;

    /// Advisory storage size in bytes.
    async fn db_size(&self) -> Result<i64>;

    async fn current_revision(&self) -> Result<i64>;
}
