//! PostgreSQL dialect.

use sea_query::PostgresQueryBuilder;
use sqlx::PgPool;

use super::SqlDialect;
use crate::storage::schema::{CREATE_INDEXES, CREATE_REVLOG_TABLE_POSTGRES};

/// PostgreSQL database marker type.
pub struct Postgres;

/// unique_violation
const UNIQUE_VIOLATION: &str = "23505";

/// serialization_failure, deadlock_detected
const TRANSIENT_CODES: [&str; 2] = ["40001", "40P01"];

impl SqlDialect for Postgres {
    type Pool = PgPool;
    type Builder = PostgresQueryBuilder;

    const NAME: &'static str = "postgres";

    const SCHEMA: &'static [&'static str] = &[
        CREATE_REVLOG_TABLE_POSTGRES,
        CREATE_INDEXES[0],
        CREATE_INDEXES[1],
        CREATE_INDEXES[2],
        CREATE_INDEXES[3],
        CREATE_INDEXES[4],
    ];

    const BEGIN_WRITE: &'static str = "BEGIN";

    const COMPACT_SQL: &'static str = r#"
DELETE FROM revlog AS kv
USING (
    SELECT kp.prev_revision AS id
    FROM revlog AS kp
    WHERE kp.name != 'compact_rev_key'
        AND kp.prev_revision != 0
        AND kp.id <= $1
    UNION
    SELECT kd.id AS id
    FROM revlog AS kd
    WHERE kd.deleted
        AND kd.id <= $1
) AS ks
WHERE kv.id = ks.id
"#;

    const SIZE_SQL: &'static str = "SELECT pg_total_relation_size('revlog')::BIGINT";

    fn is_unique_violation(err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::Database(db) => db.code().as_deref() == Some(UNIQUE_VIOLATION),
            _ => false,
        }
    }

    fn is_transient(err: &sqlx::Error) -> bool {
        match err {
            sqlx::Error::Database(db) => db
                .code()
                .is_some_and(|code| TRANSIENT_CODES.contains(&&*code)),
            _ => false,
        }
    }
}
