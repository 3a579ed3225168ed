//! Revision log storage.
//!
//! - `RevisionLog`: the append-only, revision-ordered log every other layer
//!   reads and writes
//! - `dialect`: per-vendor SQL differences behind `SqlDialect`
//! - `sql`: the one `RevisionLog` implementation, generic over the dialect
//!
//! Implementations:
//! - SQLite: `SqlLog<Sqlite>` (requires `sqlite` feature)
//! - PostgreSQL: `SqlLog<Postgres>` (requires `postgres` feature)

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::StorageConfig;
use crate::utils::bootstrap::redact_endpoint;

pub mod dialect;
pub mod entry;
pub mod error;
pub mod mock;
pub mod range;
pub mod schema;
pub mod sql;

pub use entry::{fill_name, LogEntry, NewEntry, COMPACT_REV_KEY};
pub use error::{Result, StorageError};
pub use range::KeyRange;
pub use sql::SqlLog;

/// Append-only revision log.
///
/// Entries are never updated; the only physical removal is `compact`.
#[async_trait]
pub trait RevisionLog: Send + Sync {
    /// Create the schema and the compaction sentinel row. Safe to re-run.
    async fn migrate(&self) -> Result<()>;

    /// Insert an entry and return its assigned revision.
    ///
    /// Fails with `KeyExists` when `(name, prev_revision)` is already taken.
    async fn append(&self, entry: NewEntry) -> Result<i64>;

    /// Latest entry of every key in `range` as of `revision` (0 = latest),
    /// ordered by name, together with the current revision.
    ///
    /// Tombstoned keys are skipped unless `include_deleted` is set.
    async fn range(
        &self,
        range: &KeyRange,
        revision: i64,
        limit: Option<u64>,
        include_deleted: bool,
    ) -> Result<(i64, Vec<LogEntry>)>;

    /// Number of live keys in `range` as of `revision`, with the current
    /// revision.
    async fn count(&self, range: &KeyRange, revision: i64) -> Result<(i64, i64)>;

    /// Change feed: entries with `id > revision` in ascending order.
    async fn after(&self, revision: i64, limit: u64) -> Result<Vec<LogEntry>>;

    async fn current_revision(&self) -> Result<i64>;

    /// The compaction watermark; 0 before the first compaction.
    async fn compact_revision(&self) -> Result<i64>;

    /// Insert a fill tombstone at exactly `revision` to close a sequence gap.
    async fn fill(&self, revision: i64) -> Result<()>;

    /// Remove superseded entries and tombstones up to `watermark` and record
    /// the new watermark. Returns the number of rows removed; 0 when the
    /// stored watermark is already at or past `watermark`.
    async fn compact(&self, watermark: i64) -> Result<u64>;

    /// Advisory storage footprint in bytes.
    async fn size(&self) -> Result<i64>;

    /// Latest entry for `name`, with the current revision.
    async fn current_entry(
        &self,
        name: &str,
        include_deleted: bool,
    ) -> Result<(i64, Option<LogEntry>)> {
        let (revision, mut entries) = self
            .range(&KeyRange::exact(name), 0, Some(1), include_deleted)
            .await?;
        Ok((revision, entries.pop()))
    }
}

/// Rejects reads below the compaction watermark or beyond the head.
pub(crate) fn check_revision(
    revision: i64,
    current: i64,
    compact: i64,
    allow_compacted: bool,
) -> Result<()> {
    if revision > current {
        return Err(StorageError::FutureRevision {
            current_revision: current,
        });
    }
    if !allow_compacted && revision > 0 && revision < compact {
        return Err(StorageError::Compacted {
            compact_revision: compact,
        });
    }
    Ok(())
}

/// Connect to the configured database, migrate it, and return the log.
///
/// The endpoint scheme selects the dialect: `sqlite:` or `postgres:`/`postgresql:`.
pub async fn init_storage(config: &StorageConfig) -> Result<Arc<dyn RevisionLog>> {
    let endpoint = config.endpoint.as_str();
    info!(
        endpoint = %redact_endpoint(endpoint),
        tls_mode = config.tls.mode().unwrap_or("disable"),
        "Storage: connecting"
    );

    let log: Arc<dyn RevisionLog> = match endpoint.split_once(':').map(|(scheme, _)| scheme) {
        #[cfg(feature = "sqlite")]
        Some("sqlite") => Arc::new(SqlLog::<dialect::Sqlite>::new(connect_sqlite(config).await?)),
        #[cfg(feature = "postgres")]
        Some("postgres") | Some("postgresql") => {
            Arc::new(SqlLog::<dialect::Postgres>::new(connect_postgres(config).await?))
        }
        _ => {
            return Err(StorageError::Config(format!(
                "unsupported storage endpoint '{}' (enabled dialects: {})",
                redact_endpoint(endpoint),
                enabled_dialects().join(", ")
            )))
        }
    };

    log.migrate().await?;
    Ok(log)
}

fn enabled_dialects() -> Vec<&'static str> {
    let mut names = Vec::new();
    #[cfg(feature = "sqlite")]
    names.push("sqlite");
    #[cfg(feature = "postgres")]
    names.push("postgres");
    names
}

#[cfg(feature = "sqlite")]
async fn connect_sqlite(config: &StorageConfig) -> Result<sqlx::SqlitePool> {
    use std::str::FromStr;
    use std::time::Duration;

    use dialect::SqlDialect;
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

    let options = SqliteConnectOptions::from_str(&config.endpoint)
        .map_err(|e| StorageError::Config(e.to_string()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(30));

    if let Some(parent) = options.get_filename().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Config(format!("creating {}: {e}", parent.display()))
            })?;
        }
    }

    let pool_options = pool_limits(SqlitePoolOptions::new(), config);
    crate::utils::bootstrap::connect_with_retry("sqlite", &config.endpoint, || {
        pool_options.clone().connect_with(options.clone())
    })
    .await
    .map_err(dialect::Sqlite::translate_error)
}

#[cfg(feature = "postgres")]
async fn connect_postgres(config: &StorageConfig) -> Result<sqlx::PgPool> {
    use std::str::FromStr;

    use dialect::SqlDialect;
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};

    let mut options = PgConnectOptions::from_str(&config.endpoint)
        .map_err(|e| StorageError::Config(e.to_string()))?;

    let tls = &config.tls;
    if tls.mode().is_some() {
        options = options.ssl_mode(PgSslMode::VerifyFull);
        if let Some(ca) = &tls.ca_file {
            options = options.ssl_root_cert(ca);
        }
        if let Some(cert) = &tls.cert_file {
            options = options.ssl_client_cert(cert);
        }
        if let Some(key) = &tls.key_file {
            options = options.ssl_client_key(key);
        }
    }

    let pool_options = pool_limits(PgPoolOptions::new(), config);
    let address = redact_endpoint(&config.endpoint);
    crate::utils::bootstrap::connect_with_retry("postgres", &address, || {
        pool_options.clone().connect_with(options.clone())
    })
    .await
    .map_err(dialect::Postgres::translate_error)
}

fn pool_limits<DB: sqlx::Database>(
    options: sqlx::pool::PoolOptions<DB>,
    config: &StorageConfig,
) -> sqlx::pool::PoolOptions<DB> {
    let pool = &config.pool;
    let options = options
        .max_connections(pool.max_open.max(1))
        .min_connections(pool.max_idle.min(pool.max_open));
    if pool.max_lifetime_secs > 0 {
        options.max_lifetime(std::time::Duration::from_secs(pool.max_lifetime_secs))
    } else {
        options.max_lifetime(None)
    }
}
