//! Unified SQL revision log.
//!
//! One implementation of [`RevisionLog`] shared by every SQL vendor. Statements
//! come from [`query`] and are rendered through the [`SqlDialect`]; a macro
//! generates the per-pool impls, since sqlx executors are not generic over the
//! database in a way async traits can name.
//!
//! [`RevisionLog`]: crate::storage::RevisionLog

use std::future::Future;
use std::marker::PhantomData;

use backon::BackoffBuilder;
use tracing::trace;

use super::dialect::SqlDialect;
use super::{check_revision, Result};
use crate::utils::retry::transient_backoff;

pub mod query;

/// SQL-based implementation of the revision log.
///
/// This generic implementation works with any SQL database that implements
/// the `SqlDialect` trait (PostgreSQL, SQLite).
pub struct SqlLog<D: SqlDialect> {
    pool: D::Pool,
    _marker: PhantomData<D>,
}

impl<D: SqlDialect> SqlLog<D> {
    /// Create a new SQL revision log with the given pool.
    pub fn new(pool: D::Pool) -> Self {
        Self {
            pool,
            _marker: PhantomData,
        }
    }
}

/// Run a statement, re-running it while the dialect reports a transient
/// failure, and translate the final error.
async fn with_retry<D, T, F, Fut>(op: &'static str, mut run: F) -> Result<T>
where
    D: SqlDialect,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut delays = transient_backoff().build();
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match run().await {
            Ok(value) => return Ok(value),
            Err(e) if D::is_transient(&e) => match delays.next() {
                Some(delay) => {
                    trace!(
                        dialect = D::NAME,
                        op,
                        attempt,
                        code = %D::error_code(&e),
                        "transient storage error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => return Err(D::translate_error(e)),
            },
            Err(e) => return Err(D::translate_error(e)),
        }
    }
}

/// Macro to implement `RevisionLog` for a specific SQL backend.
///
/// Arguments: dialect marker, sqlx database type, cargo feature.
macro_rules! impl_revision_log {
    ($dialect:ty, $db:ty, $feature:literal) => {
        #[cfg(feature = $feature)]
        impl SqlLog<$dialect> {
            fn decode_entry(
                row: &<$db as sqlx::Database>::Row,
            ) -> crate::storage::Result<crate::storage::LogEntry> {
                use sqlx::Row;

                let decode = |e: sqlx::Error| {
                    crate::storage::StorageError::InvalidEntry(e.to_string())
                };
                Ok(crate::storage::LogEntry {
                    id: row.try_get("id").map_err(decode)?,
                    name: row.try_get("name").map_err(decode)?,
                    created: row.try_get("created").map_err(decode)?,
                    deleted: row.try_get("deleted").map_err(decode)?,
                    create_revision: row.try_get("create_revision").map_err(decode)?,
                    prev_revision: row.try_get("prev_revision").map_err(decode)?,
                    lease: row.try_get("lease").map_err(decode)?,
                    value: row
                        .try_get::<Option<Vec<u8>>, _>("value")
                        .map_err(decode)?
                        .unwrap_or_default(),
                    old_value: row
                        .try_get::<Option<Vec<u8>>, _>("old_value")
                        .map_err(decode)?
                        .unwrap_or_default(),
                })
            }

            /// Reads the `(current, compact)` revision pair from any row
            /// carrying the scalar subquery columns.
            fn decode_revisions(
                row: &<$db as sqlx::Database>::Row,
            ) -> crate::storage::Result<(i64, i64)> {
                use sqlx::Row;

                let decode = |e: sqlx::Error| {
                    crate::storage::StorageError::InvalidEntry(e.to_string())
                };
                let current: Option<i64> = row.try_get(query::CURRENT_REVISION).map_err(decode)?;
                let compact: Option<i64> = row.try_get(query::COMPACT_REVISION).map_err(decode)?;
                Ok((current.unwrap_or(0), compact.unwrap_or(0)))
            }

            async fn fetch_all(
                &self,
                op: &'static str,
                stmt: &impl sea_query_binder::SqlxBinder,
            ) -> crate::storage::Result<Vec<<$db as sqlx::Database>::Row>> {
                let (sql, values) = <$dialect>::build(stmt);
                let (sql, pool) = (sql.as_str(), &self.pool);
                with_retry::<$dialect, _, _, _>(op, move || {
                    sqlx::query_with(sql, values.clone()).fetch_all(pool)
                })
                .await
            }

            async fn fetch_one(
                &self,
                op: &'static str,
                stmt: &impl sea_query_binder::SqlxBinder,
            ) -> crate::storage::Result<<$db as sqlx::Database>::Row> {
                let (sql, values) = <$dialect>::build(stmt);
                let (sql, pool) = (sql.as_str(), &self.pool);
                with_retry::<$dialect, _, _, _>(op, move || {
                    sqlx::query_with(sql, values.clone()).fetch_one(pool)
                })
                .await
            }

            async fn read_revisions(&self) -> crate::storage::Result<(i64, i64)> {
                let row = self.fetch_one("revisions", &query::revisions()).await?;
                Self::decode_revisions(&row)
            }

            async fn compact_in_tx(
                conn: &mut <$db as sqlx::Database>::Connection,
                watermark: i64,
            ) -> crate::storage::Result<u64> {
                let (sql, values) = <$dialect>::build(&query::revisions());
                let row = sqlx::query_with(&sql, values)
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(<$dialect>::translate_error)?;
                let (current, compact) = Self::decode_revisions(&row)?;
                if watermark <= compact {
                    return Ok(0);
                }
                if watermark > current {
                    return Err(crate::storage::StorageError::FutureRevision {
                        current_revision: current,
                    });
                }

                let deleted = sqlx::query(<$dialect>::COMPACT_SQL)
                    .bind(watermark)
                    .execute(&mut *conn)
                    .await
                    .map_err(<$dialect>::translate_error)?
                    .rows_affected();

                let (sql, values) = <$dialect>::build(&query::set_watermark(watermark));
                sqlx::query_with(&sql, values)
                    .execute(&mut *conn)
                    .await
                    .map_err(<$dialect>::translate_error)?;

                Ok(deleted)
            }
        }

        #[cfg(feature = $feature)]
        #[async_trait::async_trait]
        impl crate::storage::RevisionLog for SqlLog<$dialect> {
            async fn migrate(&self) -> crate::storage::Result<()> {
                use sqlx::Row;

                let dialect = <$dialect>::NAME;
                for ddl in <$dialect>::SCHEMA {
                    sqlx::query(*ddl)
                        .execute(&self.pool)
                        .await
                        .map_err(<$dialect>::translate_error)?;
                }

                let row = self.fetch_one("sentinel_count", &query::sentinel_count()).await?;
                let present: i64 = row
                    .try_get(query::COUNT)
                    .map_err(|e| crate::storage::StorageError::InvalidEntry(e.to_string()))?;
                if present == 0 {
                    match self.fetch_one("sentinel", &query::sentinel()).await {
                        Ok(_) | Err(crate::storage::StorageError::KeyExists) => {}
                        Err(e) => return Err(e),
                    }
                }

                tracing::info!(dialect, "revision log schema ready");
                Ok(())
            }

            async fn append(&self, entry: crate::storage::NewEntry) -> crate::storage::Result<i64> {
                use sqlx::Row;

                let row = self.fetch_one("append", &query::insert(&entry)).await?;
                let id: i64 = row
                    .try_get(0)
                    .map_err(|e| crate::storage::StorageError::InvalidEntry(e.to_string()))?;
                tracing::trace!(
                    key = %entry.name,
                    revision = id,
                    prev_revision = entry.prev_revision,
                    created = entry.created,
                    deleted = entry.deleted,
                    "appended"
                );
                Ok(id)
            }

            async fn range(
                &self,
                range: &crate::storage::KeyRange,
                revision: i64,
                limit: Option<u64>,
                include_deleted: bool,
            ) -> crate::storage::Result<(i64, Vec<crate::storage::LogEntry>)> {
                let rows = self
                    .fetch_all("range", &query::list(range, revision, limit, include_deleted))
                    .await?;
                let (current, compact) = match rows.first() {
                    Some(row) => Self::decode_revisions(row)?,
                    None => self.read_revisions().await?,
                };
                check_revision(revision, current, compact, range.is_exact())?;

                let entries = rows
                    .iter()
                    .map(Self::decode_entry)
                    .collect::<crate::storage::Result<Vec<_>>>()?;
                Ok((current, entries))
            }

            async fn count(
                &self,
                range: &crate::storage::KeyRange,
                revision: i64,
            ) -> crate::storage::Result<(i64, i64)> {
                use sqlx::Row;

                let row = self.fetch_one("count", &query::count(range, revision)).await?;
                let (current, compact) = Self::decode_revisions(&row)?;
                check_revision(revision, current, compact, false)?;
                let count: i64 = row
                    .try_get(query::COUNT)
                    .map_err(|e| crate::storage::StorageError::InvalidEntry(e.to_string()))?;
                Ok((current, count))
            }

            async fn after(
                &self,
                revision: i64,
                limit: u64,
            ) -> crate::storage::Result<Vec<crate::storage::LogEntry>> {
                let rows = self.fetch_all("after", &query::after(revision, limit)).await?;
                let compact = match rows.first() {
                    Some(row) => Self::decode_revisions(row)?.1,
                    None => self.read_revisions().await?.1,
                };
                if revision < compact {
                    return Err(crate::storage::StorageError::Compacted {
                        compact_revision: compact,
                    });
                }
                rows.iter().map(Self::decode_entry).collect()
            }

            async fn current_revision(&self) -> crate::storage::Result<i64> {
                Ok(self.read_revisions().await?.0)
            }

            async fn compact_revision(&self) -> crate::storage::Result<i64> {
                Ok(self.read_revisions().await?.1)
            }

            async fn fill(&self, revision: i64) -> crate::storage::Result<()> {
                let (sql, values) = <$dialect>::build(&query::fill(revision));
                let (sql, pool) = (sql.as_str(), &self.pool);
                with_retry::<$dialect, _, _, _>("fill", move || {
                    sqlx::query_with(sql, values.clone()).execute(pool)
                })
                .await?;
                tracing::debug!(revision, "filled revision gap");
                Ok(())
            }

            async fn compact(&self, watermark: i64) -> crate::storage::Result<u64> {
                let mut conn = self
                    .pool
                    .acquire()
                    .await
                    .map_err(<$dialect>::translate_error)?;
                sqlx::query(<$dialect>::BEGIN_WRITE)
                    .execute(&mut *conn)
                    .await
                    .map_err(<$dialect>::translate_error)?;

                match Self::compact_in_tx(&mut conn, watermark).await {
                    Ok(deleted) => {
                        sqlx::query("COMMIT")
                            .execute(&mut *conn)
                            .await
                            .map_err(<$dialect>::translate_error)?;
                        Ok(deleted)
                    }
                    Err(e) => {
                        let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                        Err(e)
                    }
                }
            }

            async fn size(&self) -> crate::storage::Result<i64> {
                use sqlx::Row;

                let row = sqlx::query(<$dialect>::SIZE_SQL)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(<$dialect>::translate_error)?;
                row.try_get(0)
                    .map_err(|e| crate::storage::StorageError::InvalidEntry(e.to_string()))
            }
        }
    };
}

// Generate implementations for each SQL backend
impl_revision_log!(super::dialect::Postgres, sqlx::Postgres, "postgres");
impl_revision_log!(super::dialect::Sqlite, sqlx::Sqlite, "sqlite");
