//! Watch/notify engine.
//!
//! A single background poller per process follows the revision log and fans
//! batches out over a broadcast channel. Subscribers first replay from the log
//! up to the poller's watermark, then follow the broadcast, deduplicating by
//! revision so each subscriber sees a gap-free, strictly increasing feed.
//!
//! Writers and readers nudge the poller through [`WatchEngine::notify`] so it
//! does not wait out the poll interval after a local change.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::config::WatchConfig;
use crate::storage::{KeyRange, LogEntry, Result, RevisionLog, COMPACT_REV_KEY};
use crate::utils::bootstrap::millis;

mod poller;

pub use poller::{Batch, Progress, GAP_TIMEOUT};
use poller::Poller;

/// Pause before re-reading the log after stopping at a sequence hole.
const GAP_RETRY: std::time::Duration = std::time::Duration::from_millis(20);

/// Buffered batches per subscriber before the subscriber task waits.
const SUBSCRIBER_BUFFER: usize = 100;

/// Stream of change batches for one subscriber. Ends after an error.
pub type WatchStream = ReceiverStream<Result<Vec<LogEntry>>>;

/// Shared handle to the poller and its broadcast channel.
pub struct WatchEngine {
    log: Arc<dyn RevisionLog>,
    events: broadcast::Sender<Batch>,
    wake: mpsc::Sender<i64>,
    watermark: Arc<AtomicI64>,
    shutdown: watch::Sender<bool>,
    batch_size: u64,
}

impl WatchEngine {
    /// Start polling from the log's current revision.
    pub async fn start(log: Arc<dyn RevisionLog>, config: &WatchConfig) -> Result<Arc<Self>> {
        let start = log.current_revision().await?;
        let (events, _) = broadcast::channel(config.channel_capacity.max(1));
        let (wake, wake_rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let watermark = Arc::new(AtomicI64::new(start));

        let poller = Poller::new(
            log.clone(),
            events.clone(),
            watermark.clone(),
            config.batch_size,
        );
        let interval = millis(config.poll_interval_ms);
        tokio::spawn(run_poller(poller, interval, wake_rx, shutdown_rx));
        info!(revision = start, ?interval, "watch engine started");

        Ok(Arc::new(Self {
            log,
            events,
            wake,
            watermark,
            shutdown,
            batch_size: config.batch_size.max(1),
        }))
    }

    /// Highest revision the poller has processed.
    pub fn revision(&self) -> i64 {
        self.watermark.load(Ordering::SeqCst)
    }

    /// Wake the poller if `revision` is past its watermark. Never blocks.
    pub fn notify(&self, revision: i64) {
        if revision > self.revision() {
            // A full queue already has a wake pending.
            let _ = self.wake.try_send(revision);
        }
    }

    /// Subscribe to entries in `range` with revision >= `start_revision`.
    ///
    /// `start_revision` 0 means "from now". The stream yields
    /// `Err(Compacted)` and ends if the start is below the compaction
    /// watermark. Dropping the stream cancels the subscription.
    pub fn subscribe(&self, range: KeyRange, start_revision: i64) -> WatchStream {
        let mut events = self.events.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let mut feed = Subscription {
            log: self.log.clone(),
            watermark: self.watermark.clone(),
            range,
            last: if start_revision > 0 {
                start_revision - 1
            } else {
                self.revision()
            },
            batch_size: self.batch_size,
            tx,
        };

        tokio::spawn(async move {
            if let Err(e) = feed.replay().await {
                let _ = feed.tx.send(Err(e)).await;
                return;
            }
            loop {
                tokio::select! {
                    _ = feed.tx.closed() => return,
                    received = events.recv() => match received {
                        Ok(batch) => {
                            if !feed.forward(&batch).await {
                                return;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, last = feed.last, "watch subscriber lagged, replaying from log");
                            if let Err(e) = feed.replay().await {
                                let _ = feed.tx.send(Err(e)).await;
                                return;
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    },
                }
            }
        });

        ReceiverStream::new(rx)
    }

    /// Stop the poller. Existing subscriptions end once the engine is dropped.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

async fn run_poller(
    mut poller: Poller,
    interval: std::time::Duration,
    mut wake: mpsc::Receiver<i64>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("watch poller stopping");
                return;
            }
            Some(revision) = wake.recv() => {
                if revision <= poller.last() {
                    continue;
                }
            }
            _ = ticker.tick() => {}
        }

        loop {
            match poller.poll_once().await {
                Ok(Progress::Idle) => break,
                Ok(Progress::More) => continue,
                Ok(Progress::Gap) => tokio::time::sleep(GAP_RETRY).await,
                Err(e) => {
                    error!(error = %e, last = poller.last(), "change feed poll failed");
                    break;
                }
            }
        }
    }
}

/// Per-subscriber delivery state.
struct Subscription {
    log: Arc<dyn RevisionLog>,
    watermark: Arc<AtomicI64>,
    range: KeyRange,
    /// Highest revision already considered for this subscriber.
    last: i64,
    batch_size: u64,
    tx: mpsc::Sender<Result<Vec<LogEntry>>>,
}

impl Subscription {
    fn wants(&self, entry: &LogEntry) -> bool {
        entry.id > self.last
            && !entry.is_fill()
            && entry.name != COMPACT_REV_KEY
            && self.range.matches(&entry.name)
    }

    /// Read the log from `last` up to the poller's watermark.
    async fn replay(&mut self) -> Result<()> {
        let target = self.watermark.load(Ordering::SeqCst);
        while self.last < target {
            let rows = self.log.after(self.last, self.batch_size).await?;
            let mut reached = (rows.len() as u64) < self.batch_size;

            let mut matched = Vec::new();
            for row in rows {
                if row.id > target {
                    reached = true;
                    break;
                }
                let id = row.id;
                if self.wants(&row) {
                    matched.push(row);
                }
                self.last = id;
            }
            if !matched.is_empty() && self.tx.send(Ok(matched)).await.is_err() {
                return Ok(());
            }
            if reached {
                break;
            }
        }
        self.last = self.last.max(target);
        debug!(last = self.last, "watch replay complete");
        Ok(())
    }

    /// Forward the matching part of a broadcast batch. False once the
    /// subscriber has gone away.
    async fn forward(&mut self, batch: &[LogEntry]) -> bool {
        let matched: Vec<LogEntry> = batch.iter().filter(|e| self.wants(e)).cloned().collect();
        if let Some(tail) = batch.last() {
            self.last = self.last.max(tail.id);
        }
        matched.is_empty() || self.tx.send(Ok(matched)).await.is_ok()
    }
}

#[cfg(test)]
mod tests;
