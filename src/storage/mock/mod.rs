//! Mock revision log for testing.
//!
//! Keeps the log in a `BTreeMap` keyed by id and mirrors the SQL
//! implementation's semantics, including the `(name, prev_revision)`
//! uniqueness rule and the compaction sentinel. Ids can be skipped on demand to
//! simulate rolled-back inserts.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    check_revision, KeyRange, LogEntry, NewEntry, Result, RevisionLog, StorageError,
    COMPACT_REV_KEY,
};

#[derive(Default)]
struct MockState {
    rows: BTreeMap<i64, LogEntry>,
    last_id: i64,
}

impl MockState {
    fn current(&self) -> i64 {
        self.rows.keys().next_back().copied().unwrap_or(0)
    }

    fn compact(&self) -> i64 {
        self.rows
            .values()
            .find(|row| row.name == COMPACT_REV_KEY)
            .map(|row| row.prev_revision)
            .unwrap_or(0)
    }

    fn insert(&mut self, id: i64, entry: NewEntry) -> Result<i64> {
        let taken = self.rows.contains_key(&id)
            || self
                .rows
                .values()
                .any(|row| row.name == entry.name && row.prev_revision == entry.prev_revision);
        if taken {
            return Err(StorageError::KeyExists);
        }
        self.rows.insert(id, entry.stored_at(id));
        self.last_id = self.last_id.max(id);
        Ok(id)
    }

    /// Latest entry per name in `range` with `id <= revision`.
    fn latest(&self, range: &KeyRange, revision: i64) -> Vec<LogEntry> {
        let mut latest: HashMap<&str, &LogEntry> = HashMap::new();
        for row in self.rows.values() {
            if revision > 0 && row.id > revision {
                break;
            }
            if range.matches(&row.name) {
                latest.insert(row.name.as_str(), row);
            }
        }
        let mut entries: Vec<LogEntry> = latest
            .into_values()
            .filter(|row| row.name != COMPACT_REV_KEY)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }
}

/// Mock revision log that stores entries in memory.
#[derive(Default)]
pub struct MockLog {
    state: RwLock<MockState>,
    fail_on_append: RwLock<bool>,
}

impl MockLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume `count` ids without writing rows, as aborted inserts do.
    pub async fn skip_ids(&self, count: i64) {
        self.state.write().await.last_id += count;
    }

    pub async fn set_fail_on_append(&self, fail: bool) {
        *self.fail_on_append.write().await = fail;
    }

    /// Every row currently stored, in id order.
    pub async fn rows(&self) -> Vec<LogEntry> {
        self.state.read().await.rows.values().cloned().collect()
    }
}

#[async_trait]
impl RevisionLog for MockLog {
    async fn migrate(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if state.rows.values().any(|row| row.name == COMPACT_REV_KEY) {
            return Ok(());
        }
        let id = state.last_id + 1;
        state.insert(
            id,
            NewEntry {
                name: COMPACT_REV_KEY.to_string(),
                ..Default::default()
            },
        )?;
        Ok(())
    }

    async fn append(&self, entry: NewEntry) -> Result<i64> {
        if *self.fail_on_append.read().await {
            return Err(StorageError::InvalidEntry("mock append failure".to_string()));
        }
        let mut state = self.state.write().await;
        let id = state.last_id + 1;
        match state.insert(id, entry) {
            Ok(id) => Ok(id),
            Err(e) => {
                // Aborted inserts still consume their id.
                state.last_id = id;
                Err(e)
            }
        }
    }

    async fn range(
        &self,
        range: &KeyRange,
        revision: i64,
        limit: Option<u64>,
        include_deleted: bool,
    ) -> Result<(i64, Vec<LogEntry>)> {
        let state = self.state.read().await;
        let current = state.current();
        check_revision(revision, current, state.compact(), range.is_exact())?;

        let mut entries: Vec<LogEntry> = state
            .latest(range, revision)
            .into_iter()
            .filter(|row| include_deleted || !row.deleted)
            .collect();
        if let Some(limit) = limit {
            entries.truncate(limit as usize);
        }
        Ok((current, entries))
    }

    async fn count(&self, range: &KeyRange, revision: i64) -> Result<(i64, i64)> {
        let state = self.state.read().await;
        let current = state.current();
        check_revision(revision, current, state.compact(), false)?;
        let count = state
            .latest(range, revision)
            .iter()
            .filter(|row| !row.deleted)
            .count();
        Ok((current, count as i64))
    }

    async fn after(&self, revision: i64, limit: u64) -> Result<Vec<LogEntry>> {
        let state = self.state.read().await;
        let compact = state.compact();
        if revision < compact {
            return Err(StorageError::Compacted {
                compact_revision: compact,
            });
        }
        Ok(state
            .rows
            .range(revision + 1..)
            .take(limit as usize)
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn current_revision(&self) -> Result<i64> {
        Ok(self.state.read().await.current())
    }

    async fn compact_revision(&self) -> Result<i64> {
        Ok(self.state.read().await.compact())
    }

    async fn fill(&self, revision: i64) -> Result<()> {
        let mut state = self.state.write().await;
        state.insert(revision, NewEntry::fill(revision))?;
        Ok(())
    }

    async fn compact(&self, watermark: i64) -> Result<u64> {
        let mut state = self.state.write().await;
        if watermark <= state.compact() {
            return Ok(0);
        }
        let current = state.current();
        if watermark > current {
            return Err(StorageError::FutureRevision {
                current_revision: current,
            });
        }

        let mut doomed: Vec<i64> = Vec::new();
        for row in state.rows.values().filter(|row| row.id <= watermark) {
            if row.name != COMPACT_REV_KEY && row.prev_revision != 0 {
                doomed.push(row.prev_revision);
            }
            if row.deleted {
                doomed.push(row.id);
            }
        }
        let mut removed = 0;
        for id in doomed {
            if state.rows.remove(&id).is_some() {
                removed += 1;
            }
        }
        for row in state.rows.values_mut() {
            if row.name == COMPACT_REV_KEY {
                row.prev_revision = watermark;
            }
        }
        Ok(removed)
    }

    async fn size(&self) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state
            .rows
            .values()
            .map(|row| (row.name.len() + row.value.len() + row.old_value.len() + 48) as i64)
            .sum())
    }
}

#[cfg(test)]
mod tests;
