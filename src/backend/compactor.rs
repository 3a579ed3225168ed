//! Background compaction.
//!
//! Each tick compacts towards the head revision observed on the previous tick,
//! so anything a watcher could still be replaying from the last interval
//! survives one more round. Work is split into transactions of at most
//! `batch_size` revisions, and the newest `min_retain` revisions are never
//! touched.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::config::CompactionConfig;
use crate::storage::{Result, RevisionLog};

/// Handle to a running compactor task.
pub struct CompactorHandle {
    cancel: tokio::sync::watch::Sender<bool>,
}

impl CompactorHandle {
    /// Signal the compactor to stop.
    pub fn stop(&self) {
        let _ = self.cancel.send(true);
    }
}

/// Per-task compaction state.
pub struct Compactor {
    log: Arc<dyn RevisionLog>,
    batch_size: i64,
    min_retain: i64,
    /// Head revision seen on the previous tick.
    target: i64,
}

impl Compactor {
    pub fn new(log: Arc<dyn RevisionLog>, config: &CompactionConfig) -> Self {
        Self {
            log,
            batch_size: config.batch_size.max(1),
            min_retain: config.min_retain.max(0),
            target: 0,
        }
    }

    /// Run one compaction round. Returns the watermark reached.
    pub async fn tick(&mut self) -> Result<i64> {
        let current = self.log.current_revision().await?;
        let mut compacted = self.log.compact_revision().await?;
        let target = self.target.min(current - self.min_retain);
        self.target = current;

        let start = compacted;
        let mut removed = 0u64;
        while compacted < target {
            let next = (compacted + self.batch_size).min(target);
            let deleted = self.log.compact(next).await?;
            if deleted == 0 {
                // Another process may have moved the watermark past us.
                let stored = self.log.compact_revision().await?;
                if stored > next {
                    debug!(stored, next, "compaction watermark advanced elsewhere");
                    compacted = stored;
                    continue;
                }
            }
            removed += deleted;
            compacted = next;
        }

        if compacted > start {
            info!(
                from = start,
                to = compacted,
                removed,
                current,
                "compacted revision log"
            );
        }
        Ok(compacted)
    }
}

/// Spawn a task that compacts every `interval_secs`.
///
/// Returns a handle that can be used to stop the task.
pub fn spawn_compactor(log: Arc<dyn RevisionLog>, config: &CompactionConfig) -> CompactorHandle {
    let (cancel_tx, mut cancel_rx) = tokio::sync::watch::channel(false);
    let interval = Duration::from_secs(config.interval_secs);
    let mut compactor = Compactor::new(log, config);

    tokio::spawn(async move {
        info!(
            interval_secs = interval.as_secs(),
            batch_size = compactor.batch_size,
            min_retain = compactor.min_retain,
            "Compactor started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = compactor.tick().await {
                        error!(error = %e, "Compaction failed");
                    }
                }
                changed = cancel_rx.changed() => {
                    if changed.is_err() || *cancel_rx.borrow() {
                        info!("Compactor stopped");
                        break;
                    }
                }
            }
        }
    });

    CompactorHandle { cancel: cancel_tx }
}
