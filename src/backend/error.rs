//! Logical KV error types.

use crate::storage::{LogEntry, StorageError};

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, KvError>;

/// Errors surfaced by the logical KV backend.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    /// The caller's precondition does not hold against the key's current
    /// state, which is returned alongside.
    #[error("key exists")]
    KeyExists {
        revision: i64,
        current: Option<LogEntry>,
    },

    /// The key has no live entry.
    #[error("key not found")]
    NotFound { revision: i64 },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
