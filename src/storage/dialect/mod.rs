//! Dialect adapter.
//!
//! Everything that differs between SQL vendors sits behind [`SqlDialect`]:
//! placeholder syntax (via sea-query's per-vendor builders), DDL, the
//! compaction and size statements, and error classification. Code above this
//! module writes vendor-neutral sea-query statements and only ever sees
//! [`StorageError`] values.

use sea_query::QueryBuilder;
use sea_query_binder::{SqlxBinder, SqlxValues};

use super::StorageError;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub use postgres::Postgres;
#[cfg(feature = "sqlite")]
pub use sqlite::Sqlite;

/// Trait for SQL database backends.
///
/// Implemented by zero-sized marker types; the revision log is generic over it.
pub trait SqlDialect: Send + Sync + 'static {
    /// The connection pool type for this database.
    type Pool: Clone + Send + Sync;

    /// Query builder producing this vendor's placeholder syntax.
    type Builder: QueryBuilder + Default;

    /// Short vendor name for logging.
    const NAME: &'static str;

    /// Idempotent schema statements, executed in order.
    const SCHEMA: &'static [&'static str];

    /// Opens a write transaction on a raw connection.
    const BEGIN_WRITE: &'static str;

    /// Deletes superseded rows and tombstones with `id <= $1`.
    ///
    /// Takes a single bind parameter: the new watermark.
    const COMPACT_SQL: &'static str;

    /// Returns the storage footprint in bytes as a single BIGINT column.
    const SIZE_SQL: &'static str;

    /// Build a SQL string and its bind values from any sea-query statement.
    fn build<S: SqlxBinder>(stmt: &S) -> (String, SqlxValues) {
        stmt.build_sqlx(Self::Builder::default())
    }

    /// Vendor error code for logging and classification.
    fn error_code(err: &sqlx::Error) -> String {
        match err {
            sqlx::Error::Database(db) => db
                .code()
                .map(|code| code.into_owned())
                .unwrap_or_else(|| "database".to_string()),
            sqlx::Error::PoolTimedOut => "pool_timed_out".to_string(),
            sqlx::Error::PoolClosed => "pool_closed".to_string(),
            sqlx::Error::Io(_) => "io".to_string(),
            sqlx::Error::Tls(_) => "tls".to_string(),
            sqlx::Error::RowNotFound => "row_not_found".to_string(),
            _ => "other".to_string(),
        }
    }

    /// True if the error is a violation of a uniqueness constraint.
    fn is_unique_violation(err: &sqlx::Error) -> bool;

    /// True if the statement may succeed when simply re-run.
    fn is_transient(err: &sqlx::Error) -> bool;

    /// Translate a vendor error into the storage taxonomy.
    fn translate_error(err: sqlx::Error) -> StorageError {
        if Self::is_unique_violation(&err) {
            return StorageError::KeyExists;
        }
        StorageError::Unavailable {
            code: Self::error_code(&err),
            source: err,
        }
    }
}
