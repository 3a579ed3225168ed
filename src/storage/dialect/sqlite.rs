//! SQLite dialect.

use sea_query::SqliteQueryBuilder;
use sqlx::SqlitePool;

use super::SqlDialect;
use crate::storage::schema::{CREATE_INDEXES, CREATE_REVLOG_TABLE_SQLITE};

/// SQLite database marker type.
pub struct Sqlite;

/// SQLITE_CONSTRAINT_UNIQUE, SQLITE_CONSTRAINT_PRIMARYKEY
const UNIQUE_CODES: [i32; 2] = [2067, 1555];

/// SQLITE_BUSY, SQLITE_LOCKED
const TRANSIENT_PRIMARY_CODES: [i32; 2] = [5, 6];

fn extended_code(err: &sqlx::Error) -> Option<i32> {
    match err {
        sqlx::Error::Database(db) => db.code().and_then(|code| code.parse().ok()),
        _ => None,
    }
}

impl SqlDialect for Sqlite {
    type Pool = SqlitePool;
    type Builder = SqliteQueryBuilder;

    const NAME: &'static str = "sqlite";

    const SCHEMA: &'static [&'static str] = &[
        CREATE_REVLOG_TABLE_SQLITE,
        CREATE_INDEXES[0],
        CREATE_INDEXES[1],
        CREATE_INDEXES[2],
        CREATE_INDEXES[3],
        CREATE_INDEXES[4],
    ];

    // Takes the write lock upfront so concurrent writers queue on busy_timeout
    // instead of failing to upgrade a shared lock.
    const BEGIN_WRITE: &'static str = "BEGIN IMMEDIATE";

    const COMPACT_SQL: &'static str = r#"
DELETE FROM revlog
WHERE id IN (
    SELECT prev_revision
    FROM revlog
    WHERE name != 'compact_rev_key'
        AND prev_revision != 0
        AND id <= ?1
    UNION
    SELECT id
    FROM revlog
    WHERE deleted != 0
        AND id <= ?1
)
"#;

    const SIZE_SQL: &'static str =
        "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()";

    fn is_unique_violation(err: &sqlx::Error) -> bool {
        extended_code(err).is_some_and(|code| UNIQUE_CODES.contains(&code))
    }

    fn is_transient(err: &sqlx::Error) -> bool {
        extended_code(err).is_some_and(|code| TRANSIENT_PRIMARY_CODES.contains(&(code & 0xff)))
    }
}
