//! Vendor-neutral statement templates for the revision log.
//!
//! Every statement is a sea-query value; [`SqlDialect::build`] renders it with
//! the vendor's placeholder syntax. Nothing here is vendor specific.
//!
//! [`SqlDialect::build`]: crate::storage::dialect::SqlDialect::build

use sea_query::{
    Alias, Cond, Expr, InsertStatement, JoinType, Order, Query, SelectStatement, SimpleExpr,
    UpdateStatement,
};

use crate::storage::entry::{NewEntry, COMPACT_REV_KEY};
use crate::storage::range::KeyRange;
use crate::storage::schema::{Revlog, ENTRY_COLUMNS};

/// Column alias of the latest revision in the log.
pub const CURRENT_REVISION: &str = "current_revision";
/// Column alias of the compaction watermark.
pub const COMPACT_REVISION: &str = "compact_revision";
/// Column alias of a count result.
pub const COUNT: &str = "count";

const CURRENT_REVISION_SQL: &str = "(SELECT MAX(id) FROM revlog)";
const COMPACT_REVISION_SQL: &str =
    "(SELECT MAX(prev_revision) FROM revlog WHERE name = 'compact_rev_key')";

fn kv() -> Alias {
    Alias::new("kv")
}

fn mkv() -> Alias {
    Alias::new("mkv")
}

fn maxkv() -> Alias {
    Alias::new("maxkv")
}

/// Adds the current and compact revision scalar subqueries to a select.
///
/// Reading both in the same statement as the rows keeps them consistent with
/// what the rows reflect.
fn with_revisions(stmt: &mut SelectStatement) -> &mut SelectStatement {
    stmt.expr_as(Expr::cust(CURRENT_REVISION_SQL), Alias::new(CURRENT_REVISION))
        .expr_as(Expr::cust(COMPACT_REVISION_SQL), Alias::new(COMPACT_REVISION))
}

fn name_filter(range: &KeyRange) -> Cond {
    match range {
        KeyRange::Exact(key) => Cond::all().add(Expr::col((mkv(), Revlog::Name)).eq(key.as_str())),
        KeyRange::Span { start, end } => {
            let mut cond = Cond::all().add(Expr::col((mkv(), Revlog::Name)).gte(start.as_str()));
            if let Some(end) = end {
                cond = cond.add(Expr::col((mkv(), Revlog::Name)).lt(end.as_str()));
            }
            cond
        }
    }
}

/// Latest id per key name in `range`, as of `revision` (0 = latest).
fn latest_ids(range: &KeyRange, revision: i64) -> SelectStatement {
    let mut cond = name_filter(range);
    if revision > 0 {
        cond = cond.add(Expr::col((mkv(), Revlog::Id)).lte(revision));
    }
    Query::select()
        .expr_as(Expr::col((mkv(), Revlog::Id)).max(), Revlog::Id)
        .from_as(Revlog::Table, mkv())
        .cond_where(cond)
        .group_by_col((mkv(), Revlog::Name))
        .to_owned()
}

/// Filters shared by list and count over the `kv` alias.
fn visible(include_deleted: bool) -> Cond {
    let mut cond = Cond::all().add(Expr::col((kv(), Revlog::Name)).ne(COMPACT_REV_KEY));
    if !include_deleted {
        cond = cond.add(Expr::col((kv(), Revlog::Deleted)).eq(false));
    }
    cond
}

/// The latest entry of every key in `range` as of `revision`, ordered by name.
pub fn list(
    range: &KeyRange,
    revision: i64,
    limit: Option<u64>,
    include_deleted: bool,
) -> SelectStatement {
    let mut stmt = Query::select();
    with_revisions(&mut stmt)
        .columns(ENTRY_COLUMNS.map(|col| (kv(), col)))
        .from_as(Revlog::Table, kv())
        .join_subquery(
            JoinType::InnerJoin,
            latest_ids(range, revision),
            maxkv(),
            Expr::col((maxkv(), Revlog::Id)).equals((kv(), Revlog::Id)),
        )
        .cond_where(visible(include_deleted))
        .order_by((kv(), Revlog::Name), Order::Asc);
    if let Some(limit) = limit {
        stmt.limit(limit);
    }
    stmt
}

/// Number of keys `list` would return without a limit.
pub fn count(range: &KeyRange, revision: i64) -> SelectStatement {
    let mut keys = Query::select();
    keys.column((kv(), Revlog::Id))
        .from_as(Revlog::Table, kv())
        .join_subquery(
            JoinType::InnerJoin,
            latest_ids(range, revision),
            maxkv(),
            Expr::col((maxkv(), Revlog::Id)).equals((kv(), Revlog::Id)),
        )
        .cond_where(visible(false));

    let mut stmt = Query::select();
    with_revisions(&mut stmt)
        .expr_as(Expr::cust("COUNT(*)"), Alias::new(COUNT))
        .from_subquery(keys, Alias::new("keys"));
    stmt
}

/// Change feed: every entry with `id > revision`, ascending.
pub fn after(revision: i64, limit: u64) -> SelectStatement {
    let mut stmt = Query::select();
    with_revisions(&mut stmt)
        .columns(ENTRY_COLUMNS.map(|col| (kv(), col)))
        .from_as(Revlog::Table, kv())
        .and_where(Expr::col((kv(), Revlog::Id)).gt(revision))
        .order_by((kv(), Revlog::Id), Order::Asc)
        .limit(limit);
    stmt
}

/// Current and compact revisions without any rows.
pub fn revisions() -> SelectStatement {
    let mut stmt = Query::select();
    with_revisions(&mut stmt);
    stmt
}

fn entry_values(entry: &NewEntry) -> [SimpleExpr; 8] {
    [
        entry.name.as_str().into(),
        entry.created.into(),
        entry.deleted.into(),
        entry.create_revision.into(),
        entry.prev_revision.into(),
        entry.lease.into(),
        entry.value.clone().into(),
        entry.old_value.clone().into(),
    ]
}

const INSERT_COLUMNS: [Revlog; 8] = [
    Revlog::Name,
    Revlog::Created,
    Revlog::Deleted,
    Revlog::CreateRevision,
    Revlog::PrevRevision,
    Revlog::Lease,
    Revlog::Value,
    Revlog::OldValue,
];

/// Appends an entry, returning the assigned id.
pub fn insert(entry: &NewEntry) -> InsertStatement {
    Query::insert()
        .into_table(Revlog::Table)
        .columns(INSERT_COLUMNS)
        .values_panic(entry_values(entry))
        .returning_col(Revlog::Id)
        .to_owned()
}

/// Plugs a hole in the id sequence with a tombstone at exactly `revision`.
pub fn fill(revision: i64) -> InsertStatement {
    let mut values = vec![SimpleExpr::from(revision)];
    values.extend(entry_values(&NewEntry::fill(revision)));

    let mut columns = vec![Revlog::Id];
    columns.extend(INSERT_COLUMNS);

    Query::insert()
        .into_table(Revlog::Table)
        .columns(columns)
        .values_panic(values)
        .to_owned()
}

/// Whether the compaction sentinel row exists.
pub fn sentinel_count() -> SelectStatement {
    Query::select()
        .expr_as(Expr::cust("COUNT(*)"), Alias::new(COUNT))
        .from(Revlog::Table)
        .and_where(Expr::col(Revlog::Name).eq(COMPACT_REV_KEY))
        .to_owned()
}

/// Creates the compaction sentinel with a zero watermark.
pub fn sentinel() -> InsertStatement {
    insert(&NewEntry {
        name: COMPACT_REV_KEY.to_string(),
        ..Default::default()
    })
}

/// Moves the compaction watermark stored in the sentinel row.
pub fn set_watermark(watermark: i64) -> UpdateStatement {
    Query::update()
        .table(Revlog::Table)
        .value(Revlog::PrevRevision, watermark)
        .and_where(Expr::col(Revlog::Name).eq(COMPACT_REV_KEY))
        .to_owned()
}
