//! Storage error taxonomy.
//!
//! Vendor SQL errors never escape this module's callers untranslated: each
//! dialect maps them into `KeyExists` or `Unavailable` at the adapter boundary.

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during revision log operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A row with the same `(name, prev_revision)` already exists.
    #[error("key exists")]
    KeyExists,

    #[error("mvcc: required revision has been compacted (compact revision {compact_revision})")]
    Compacted { compact_revision: i64 },

    #[error("mvcc: required revision is a future revision (current revision {current_revision})")]
    FutureRevision { current_revision: i64 },

    /// Connection, transport or any other database failure, tagged with the
    /// vendor error code when one exists.
    #[error("storage unavailable [{code}]: {source}")]
    Unavailable {
        code: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("invalid log entry: {0}")]
    InvalidEntry(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl StorageError {
    /// True for the optimistic-concurrency conflict.
    pub fn is_key_exists(&self) -> bool {
        matches!(self, StorageError::KeyExists)
    }
}
