//! Change feed poller.
//!
//! Reads the log past its watermark in id order and broadcasts each batch.
//! Ids are handed out before commit, so a hole in the sequence may be a
//! transaction still in flight: the poller stops at the hole and retries, and
//! only after the hole has persisted for `GAP_TIMEOUT` does it plug it with a
//! fill tombstone so the feed can move on.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::storage::{LogEntry, Result, RevisionLog, StorageError, COMPACT_REV_KEY};

/// How long a sequence hole may persist before it is filled.
pub const GAP_TIMEOUT: Duration = Duration::from_secs(1);

/// Batches delivered to subscribers.
pub type Batch = Arc<Vec<LogEntry>>;

/// Outcome of a single poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Caught up with the log.
    Idle,
    /// A full batch was read; more is likely waiting.
    More,
    /// Stopped at a hole in the id sequence.
    Gap,
}

pub(crate) struct Poller {
    log: Arc<dyn RevisionLog>,
    events: broadcast::Sender<Batch>,
    watermark: Arc<AtomicI64>,
    batch_size: u64,
    last: i64,
    skip: i64,
    skip_time: Instant,
}

impl Poller {
    pub(crate) fn new(
        log: Arc<dyn RevisionLog>,
        events: broadcast::Sender<Batch>,
        watermark: Arc<AtomicI64>,
        batch_size: u64,
    ) -> Self {
        let last = watermark.load(Ordering::SeqCst);
        Self {
            log,
            events,
            watermark,
            batch_size: batch_size.max(1),
            last,
            skip: 0,
            skip_time: Instant::now(),
        }
    }

    pub(crate) fn last(&self) -> i64 {
        self.last
    }

    /// Read one batch past the watermark and broadcast what is deliverable.
    pub(crate) async fn poll_once(&mut self) -> Result<Progress> {
        let rows = match self.log.after(self.last, self.batch_size).await {
            Ok(rows) => rows,
            Err(StorageError::Compacted { compact_revision }) => {
                // History up to the watermark is gone; resume right after it.
                warn!(
                    last = self.last,
                    compact_revision, "change feed compacted past poller, skipping ahead"
                );
                self.last = compact_revision;
                self.watermark.store(self.last, Ordering::SeqCst);
                return Ok(Progress::More);
            }
            Err(e) => return Err(e),
        };
        let full = rows.len() as u64 >= self.batch_size;

        let mut batch = Vec::with_capacity(rows.len());
        let mut progress = if full { Progress::More } else { Progress::Idle };
        for row in rows {
            let next = self.last + 1;
            if row.id != next {
                progress = self.on_gap(next).await?;
                break;
            }
            self.last = row.id;
            if row.is_fill() || row.name == COMPACT_REV_KEY {
                continue;
            }
            batch.push(row);
        }

        self.watermark.store(self.last, Ordering::SeqCst);
        if !batch.is_empty() {
            debug!(
                first = batch[0].id,
                last = self.last,
                count = batch.len(),
                "broadcasting change batch"
            );
            // No receivers is fine; subscribers replay from the log.
            let _ = self.events.send(Arc::new(batch));
        }
        Ok(progress)
    }

    async fn on_gap(&mut self, missing: i64) -> Result<Progress> {
        if self.skip != missing {
            self.skip = missing;
            self.skip_time = Instant::now();
            debug!(revision = missing, "revision gap detected, waiting");
            return Ok(Progress::Gap);
        }
        if self.skip_time.elapsed() < GAP_TIMEOUT {
            return Ok(Progress::Gap);
        }

        warn!(
            revision = missing,
            waited_ms = self.skip_time.elapsed().as_millis() as u64,
            "filling revision gap"
        );
        match self.log.fill(missing).await {
            // Lost to the late commit we were waiting for; either way the id exists now.
            Ok(()) | Err(StorageError::KeyExists) => Ok(Progress::More),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mock::MockLog;
    use crate::storage::NewEntry;

    async fn setup() -> (Arc<MockLog>, Poller, broadcast::Receiver<Batch>) {
        let log = Arc::new(MockLog::new());
        log.migrate().await.unwrap();
        let (events, rx) = broadcast::channel(16);
        let watermark = Arc::new(AtomicI64::new(log.current_revision().await.unwrap()));
        let poller = Poller::new(log.clone(), events, watermark, 100);
        (log, poller, rx)
    }

    async fn put(log: &MockLog, key: &str) -> i64 {
        log.append(NewEntry::create(key, b"v".to_vec(), 0, 0))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_poll_broadcasts_new_entries_in_order() {
        let (log, mut poller, mut rx) = setup().await;
        let a = put(&log, "/a").await;
        let b = put(&log, "/b").await;

        assert_eq!(poller.poll_once().await.unwrap(), Progress::Idle);
        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.iter().map(|e| e.id).collect::<Vec<_>>(), [a, b]);
        assert_eq!(poller.last(), b);
    }

    #[tokio::test]
    async fn test_full_batch_reports_more() {
        let (log, poller, _rx) = setup().await;
        let mut poller = Poller::new(log.clone(), poller.events.clone(), poller.watermark.clone(), 2);
        for key in ["/a", "/b", "/c"] {
            put(&log, key).await;
        }
        assert_eq!(poller.poll_once().await.unwrap(), Progress::More);
        assert_eq!(poller.poll_once().await.unwrap(), Progress::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gap_is_held_then_filled() {
        let (log, mut poller, mut rx) = setup().await;
        let a = put(&log, "/a").await;
        log.skip_ids(1).await;
        let c = put(&log, "/c").await;

        assert_eq!(poller.poll_once().await.unwrap(), Progress::Gap);
        assert_eq!(rx.recv().await.unwrap().iter().map(|e| e.id).collect::<Vec<_>>(), [a]);

        // Still inside the grace period: no fill yet.
        assert_eq!(poller.poll_once().await.unwrap(), Progress::Gap);
        assert!(log.rows().await.iter().all(|row| row.id != a + 1));

        tokio::time::advance(GAP_TIMEOUT + Duration::from_millis(10)).await;
        assert_eq!(poller.poll_once().await.unwrap(), Progress::More);
        assert!(log.rows().await.iter().any(|row| row.id == a + 1 && row.is_fill()));

        // The fill row is consumed but never delivered.
        assert_eq!(poller.poll_once().await.unwrap(), Progress::Idle);
        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.iter().map(|e| e.id).collect::<Vec<_>>(), [c]);
        assert_eq!(poller.last(), c);
    }

    #[tokio::test]
    async fn test_compaction_past_watermark_skips_ahead() {
        let (log, mut poller, mut rx) = setup().await;
        let first = put(&log, "/a").await;
        let (_, current) = log.current_entry("/a", false).await.unwrap();
        let second = log
            .append(NewEntry::update(&current.unwrap(), b"w".to_vec(), 0))
            .await
            .unwrap();
        log.compact(second).await.unwrap();
        assert!(poller.last() < first);

        assert_eq!(poller.poll_once().await.unwrap(), Progress::More);
        assert_eq!(poller.last(), second);
        assert_eq!(poller.watermark.load(Ordering::SeqCst), second);

        let third = put(&log, "/b").await;
        assert_eq!(poller.poll_once().await.unwrap(), Progress::Idle);
        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.iter().map(|e| e.id).collect::<Vec<_>>(), [third]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gap_fill_beside_user_key_of_same_name() {
        let (log, mut poller, mut rx) = setup().await;
        let a = put(&log, "/a").await;
        let hole = a + 2;
        // A live user key that carries the fill name of the coming hole.
        let user = put(&log, &crate::storage::fill_name(hole)).await;
        log.skip_ids(1).await;
        let c = put(&log, "/c").await;

        assert_eq!(poller.poll_once().await.unwrap(), Progress::Gap);
        tokio::time::advance(GAP_TIMEOUT + Duration::from_millis(10)).await;
        assert_eq!(poller.poll_once().await.unwrap(), Progress::More);
        assert!(log.rows().await.iter().any(|row| row.id == hole && row.is_fill()));

        assert_eq!(poller.poll_once().await.unwrap(), Progress::Idle);
        let mut delivered = Vec::new();
        while let Ok(batch) = rx.try_recv() {
            delivered.extend(batch.iter().map(|e| e.id));
        }
        assert_eq!(delivered, [a, user, c]);
        assert_eq!(poller.last(), c);
    }
}
