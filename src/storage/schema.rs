//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.
//! DDL is per vendor and lives next to each dialect.

use sea_query::Iden;

/// Revision log table schema.
#[derive(Iden)]
pub enum Revlog {
    #[iden = "revlog"]
    Table,
    #[iden = "id"]
    Id,
    #[iden = "name"]
    Name,
    #[iden = "created"]
    Created,
    #[iden = "deleted"]
    Deleted,
    #[iden = "create_revision"]
    CreateRevision,
    #[iden = "prev_revision"]
    PrevRevision,
    #[iden = "lease"]
    Lease,
    #[iden = "value"]
    Value,
    #[iden = "old_value"]
    OldValue,
}

/// Columns selected for a full log entry, in decode order.
pub const ENTRY_COLUMNS: [Revlog; 9] = [
    Revlog::Id,
    Revlog::Name,
    Revlog::Created,
    Revlog::Deleted,
    Revlog::CreateRevision,
    Revlog::PrevRevision,
    Revlog::Lease,
    Revlog::Value,
    Revlog::OldValue,
];

/// Index statements shared by every vendor.
pub const CREATE_INDEXES: [&str; 5] = [
    "CREATE INDEX IF NOT EXISTS revlog_name_index ON revlog (name)",
    "CREATE INDEX IF NOT EXISTS revlog_name_id_index ON revlog (name, id)",
    "CREATE INDEX IF NOT EXISTS revlog_id_deleted_index ON revlog (id, deleted)",
    "CREATE INDEX IF NOT EXISTS revlog_prev_revision_index ON revlog (prev_revision)",
    "CREATE UNIQUE INDEX IF NOT EXISTS revlog_name_prev_revision_uindex ON revlog (name, prev_revision)",
];

/// PostgreSQL table. `COLLATE "C"` keeps name ordering bytewise like etcd's.
pub const CREATE_REVLOG_TABLE_POSTGRES: &str = r#"
CREATE TABLE IF NOT EXISTS revlog (
    id BIGSERIAL PRIMARY KEY,
    name TEXT COLLATE "C" NOT NULL,
    created BOOLEAN NOT NULL DEFAULT FALSE,
    deleted BOOLEAN NOT NULL DEFAULT FALSE,
    create_revision BIGINT NOT NULL DEFAULT 0,
    prev_revision BIGINT NOT NULL DEFAULT 0,
    lease BIGINT NOT NULL DEFAULT 0,
    value BYTEA,
    old_value BYTEA
)
"#;

/// SQLite table. AUTOINCREMENT prevents id reuse after compaction.
pub const CREATE_REVLOG_TABLE_SQLITE: &str = r#"
CREATE TABLE IF NOT EXISTS revlog (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    created INTEGER NOT NULL DEFAULT 0,
    deleted INTEGER NOT NULL DEFAULT 0,
    create_revision INTEGER NOT NULL DEFAULT 0,
    prev_revision INTEGER NOT NULL DEFAULT 0,
    lease INTEGER NOT NULL DEFAULT 0,
    value BLOB,
    old_value BLOB
)
"#;
