//! Revision-log backed implementation of [`Backend`].

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info};

use super::compactor::{spawn_compactor, CompactorHandle};
use super::{Backend, KvError, Result, HEALTH_KEY, HEALTH_VALUE};
use crate::config::{CompactionConfig, WatchConfig};
use crate::storage::{KeyRange, LogEntry, NewEntry, RevisionLog, StorageError};
use crate::watch::{WatchEngine, WatchStream};

/// Logical KV backend over a [`RevisionLog`].
pub struct LogBackend {
    log: Arc<dyn RevisionLog>,
    watch: Arc<WatchEngine>,
    compaction: CompactionConfig,
    compactor: Mutex<Option<CompactorHandle>>,
}

/// What to do after an append attempt lost the `(name, prev_revision)` race.
enum Race {
    Retry,
    Conflict,
}

impl LogBackend {
    pub fn new(
        log: Arc<dyn RevisionLog>,
        watch: Arc<WatchEngine>,
        compaction: CompactionConfig,
    ) -> Self {
        Self {
            log,
            watch,
            compaction,
            compactor: Mutex::new(None),
        }
    }

    /// Start a watch engine over `log` and build the backend on top of it.
    pub async fn open(
        log: Arc<dyn RevisionLog>,
        watch: &WatchConfig,
        compaction: CompactionConfig,
    ) -> Result<Arc<Self>> {
        let engine = WatchEngine::start(log.clone(), watch).await?;
        Ok(Arc::new(Self::new(log, engine, compaction)))
    }

    /// Stop the compactor and the watch poller.
    pub fn shutdown(&self) {
        if let Ok(mut compactor) = self.compactor.lock() {
            if let Some(handle) = compactor.take() {
                handle.stop();
            }
        }
        self.watch.shutdown();
    }

    /// Append and wake the poller so watchers see the write promptly.
    async fn append(&self, entry: NewEntry) -> std::result::Result<i64, StorageError> {
        let revision = self.log.append(entry).await?;
        self.watch.notify(revision);
        Ok(revision)
    }

    /// Any read that observed a newer head than the poller wakes it.
    fn observed(&self, revision: i64) {
        self.watch.notify(revision);
    }

    fn on_race(key: &str, retried: &mut bool) -> Race {
        if *retried {
            return Race::Conflict;
        }
        *retried = true;
        debug!(key, "lost append race, re-validating");
        Race::Retry
    }

    /// Conflict carrying the key's state after a second lost race.
    async fn conflict(&self, key: &str) -> KvError {
        match self.log.current_entry(key, false).await {
            Ok((revision, current)) => KvError::KeyExists { revision, current },
            Err(e) => e.into(),
        }
    }
}

#[async_trait]
impl Backend for LogBackend {
    async fn start(&self) -> Result<()> {
        let (_, health) = self.get(HEALTH_KEY, 0).await?;
        if health.is_none() {
            match self.create(HEALTH_KEY, HEALTH_VALUE.to_vec(), 0).await {
                Ok(_) | Err(KvError::KeyExists { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        if self.compaction.interval_secs > 0 {
            let handle = spawn_compactor(self.log.clone(), &self.compaction);
            if let Ok(mut compactor) = self.compactor.lock() {
                if let Some(previous) = compactor.replace(handle) {
                    previous.stop();
                }
            }
        }
        info!("backend started");
        Ok(())
    }

    async fn get(&self, key: &str, revision: i64) -> Result<(i64, Option<LogEntry>)> {
        let (current, entry) = if revision == 0 {
            self.log.current_entry(key, false).await?
        } else {
            let (current, mut entries) = self
                .log
                .range(&KeyRange::exact(key), revision, Some(1), false)
                .await?;
            (current, entries.pop())
        };
        self.observed(current);
        Ok((current, entry))
    }

    async fn create(&self, key: &str, value: Vec<u8>, lease: i64) -> Result<i64> {
        let mut retried = false;
        loop {
            let (revision, current) = self.log.current_entry(key, true).await?;
            let prev_revision = match &current {
                Some(entry) if !entry.deleted => {
                    return Err(KvError::KeyExists { revision, current });
                }
                Some(tombstone) => tombstone.id,
                None => 0,
            };

            match self
                .append(NewEntry::create(key, value.clone(), lease, prev_revision))
                .await
            {
                Ok(revision) => {
                    debug!(key, revision, "created");
                    return Ok(revision);
                }
                Err(StorageError::KeyExists) => match Self::on_race(key, &mut retried) {
                    Race::Retry => continue,
                    Race::Conflict => return Err(self.conflict(key).await),
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn update(
        &self,
        key: &str,
        value: Vec<u8>,
        expected: i64,
        lease: i64,
    ) -> Result<(i64, LogEntry)> {
        let mut retried = false;
        loop {
            let (revision, current) = self.log.current_entry(key, false).await?;
            let current = match current {
                Some(current) => current,
                None => return Err(KvError::NotFound { revision }),
            };
            if current.id != expected {
                return Err(KvError::KeyExists {
                    revision,
                    current: Some(current),
                });
            }

            match self
                .append(NewEntry::update(&current, value.clone(), lease))
                .await
            {
                Ok(revision) => {
                    debug!(key, revision, prev_revision = current.id, "updated");
                    return Ok((revision, current));
                }
                Err(StorageError::KeyExists) => match Self::on_race(key, &mut retried) {
                    Race::Retry => continue,
                    Race::Conflict => return Err(self.conflict(key).await),
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn delete(&self, key: &str, expected: i64) -> Result<(i64, Option<LogEntry>)> {
        let mut retried = false;
        loop {
            let (revision, current) = self.log.current_entry(key, false).await?;
            let current = match current {
                Some(current) => current,
                None => return Ok((revision, None)),
            };
            if expected != 0 && current.id != expected {
                return Err(KvError::KeyExists {
                    revision,
                    current: Some(current),
                });
            }

            match self.append(NewEntry::tombstone(&current)).await {
                Ok(revision) => {
                    debug!(key, revision, prev_revision = current.id, "deleted");
                    return Ok((revision, Some(current)));
                }
                Err(StorageError::KeyExists) => match Self::on_race(key, &mut retried) {
                    Race::Retry => continue,
                    Race::Conflict => return Err(self.conflict(key).await),
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn list(
        &self,
        range: &KeyRange,
        limit: Option<u64>,
        revision: i64,
    ) -> Result<(i64, Vec<LogEntry>)> {
        let (current, entries) = self.log.range(range, revision, limit, false).await?;
        self.observed(current);
        Ok((current, entries))
    }

    async fn count(&self, range: &KeyRange, revision: i64) -> Result<(i64, i64)> {
        let (current, count) = self.log.count(range, revision).await?;
        self.observed(current);
        Ok((current, count))
    }

    async fn watch(&self, range: KeyRange, start_revision: i64) -> WatchStream {
        self.watch.subscribe(range, start_revision)
    }

    async fn compact(&self, revision: i64) -> Result<i64> {
        let removed = self.log.compact(revision).await?;
        let current = self.log.current_revision().await?;
        info!(revision, removed, current, "compaction requested");
        Ok(current)
    }

    async fn db_size(&self) -> Result<i64> {
        Ok(self.log.size().await?)
    }

    async fn current_revision(&self) -> Result<i64> {
        let current = self.log.current_revision().await?;
        self.observed(current);
        Ok(current)
    }
}

impl Drop for LogBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}
