//! Watch service.
//!
//! One session per client stream. Each create request spawns a forwarder that
//! turns backend change batches into watch responses on the shared outbound
//! channel; cancel aborts the forwarder.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info, warn};

use super::convert::{event, header, key_range};
use super::errors::ERR_COMPACTED;
use super::KvBridge;
use crate::backend::Backend;
use crate::proto::etcdserverpb::watch_create_request::FilterType;
use crate::proto::etcdserverpb::watch_request::RequestUnion;
use crate::proto::etcdserverpb::watch_server::Watch;
use crate::proto::etcdserverpb::{WatchCreateRequest, WatchRequest, WatchResponse};
use crate::proto::mvccpb::event::EventType;
use crate::storage::StorageError;
use crate::watch::WatchStream;

/// Outbound responses buffered per client stream.
const WATCH_BUFFER: usize = 100;

/// Watch id of responses that answer a progress request.
const PROGRESS_WATCH_ID: i64 = -1;

type Outbound = mpsc::Sender<Result<WatchResponse, Status>>;

#[tonic::async_trait]
impl Watch for KvBridge {
    type WatchStream = ReceiverStream<Result<WatchResponse, Status>>;

    async fn watch(
        &self,
        request: Request<Streaming<WatchRequest>>,
    ) -> Result<Response<Self::WatchStream>, Status> {
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let session = WatchSession {
            backend: self.backend.clone(),
            notify_interval: self.notify_interval,
            tx,
            watches: HashMap::new(),
            next_id: 1,
        };
        tokio::spawn(session.run(request.into_inner()));
        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

struct WatchSession {
    backend: Arc<dyn Backend>,
    notify_interval: Duration,
    tx: Outbound,
    watches: HashMap<i64, JoinHandle<()>>,
    next_id: i64,
}

impl WatchSession {
    async fn run(mut self, mut inbound: Streaming<WatchRequest>) {
        loop {
            tokio::select! {
                _ = self.tx.closed() => break,
                message = inbound.next() => match message {
                    Some(Ok(request)) => {
                        if !self.handle(request).await {
                            break;
                        }
                    }
                    Some(Err(status)) => {
                        debug!(error = %status, "watch stream receive failed");
                        break;
                    }
                    None => break,
                },
            }
        }
        for (_, task) in self.watches.drain() {
            task.abort();
        }
        debug!("watch session closed");
    }

    /// Returns false once the client is gone.
    async fn handle(&mut self, request: WatchRequest) -> bool {
        match request.request_union {
            Some(RequestUnion::CreateRequest(create)) => self.create(create).await,
            Some(RequestUnion::CancelRequest(cancel)) => self.cancel(cancel.watch_id).await,
            Some(RequestUnion::ProgressRequest(_)) => {
                let revision = self.backend.current_revision().await.unwrap_or_default();
                self.send(WatchResponse {
                    header: header(revision),
                    watch_id: PROGRESS_WATCH_ID,
                    ..Default::default()
                })
                .await
            }
            None => true,
        }
    }

    fn allocate_id(&mut self, requested: i64) -> Option<i64> {
        if requested > 0 {
            return (!self.watches.contains_key(&requested)).then_some(requested);
        }
        while self.watches.contains_key(&self.next_id) {
            self.next_id += 1;
        }
        let id = self.next_id;
        self.next_id += 1;
        Some(id)
    }

    async fn create(&mut self, create: WatchCreateRequest) -> bool {
        let Some(watch_id) = self.allocate_id(create.watch_id) else {
            return self
                .reject(create.watch_id, "etcdserver: duplicate watch id")
                .await;
        };
        let range = match key_range(create.key.clone(), create.range_end.clone()) {
            Ok(range) => range,
            Err(status) => return self.reject(watch_id, status.message()).await,
        };
        let revision = match self.backend.current_revision().await {
            Ok(revision) => revision,
            Err(e) => return self.reject(watch_id, &e.to_string()).await,
        };

        let filter = EventFilter {
            no_put: create.filters().any(|f| f == FilterType::Noput),
            no_delete: create.filters().any(|f| f == FilterType::Nodelete),
            prev_kv: create.prev_kv,
        };
        info!(watch_id, ?range, start_revision = create.start_revision, "watch created");

        // Subscribe before acknowledging so nothing committed after the
        // acknowledgement is missed.
        let stream = self
            .backend
            .watch(range, create.start_revision)
            .await;
        if !self
            .send(WatchResponse {
                header: header(revision),
                watch_id,
                created: true,
                ..Default::default()
            })
            .await
        {
            return false;
        }

        let progress = create.progress_notify.then_some(self.notify_interval);
        let task = tokio::spawn(forward(
            self.backend.clone(),
            watch_id,
            stream,
            filter,
            progress,
            self.tx.clone(),
        ));
        self.watches.insert(watch_id, task);
        true
    }

    async fn cancel(&mut self, watch_id: i64) -> bool {
        if let Some(task) = self.watches.remove(&watch_id) {
            task.abort();
            info!(watch_id, "watch canceled");
        }
        let revision = self.backend.current_revision().await.unwrap_or_default();
        self.send(WatchResponse {
            header: header(revision),
            watch_id,
            canceled: true,
            ..Default::default()
        })
        .await
    }

    /// Answer a create that could not be honoured.
    async fn reject(&self, watch_id: i64, reason: &str) -> bool {
        warn!(watch_id, reason, "watch rejected");
        self.send(WatchResponse {
            header: header(0),
            watch_id,
            created: true,
            canceled: true,
            cancel_reason: reason.to_string(),
            ..Default::default()
        })
        .await
    }

    async fn send(&self, response: WatchResponse) -> bool {
        self.tx.send(Ok(response)).await.is_ok()
    }
}

#[derive(Debug, Clone, Copy)]
struct EventFilter {
    no_put: bool,
    no_delete: bool,
    prev_kv: bool,
}

impl EventFilter {
    fn keeps(&self, kind: EventType) -> bool {
        match kind {
            EventType::Put => !self.no_put,
            EventType::Delete => !self.no_delete,
        }
    }
}

/// Relay one subscription to the client until it ends or is aborted.
async fn forward(
    backend: Arc<dyn Backend>,
    watch_id: i64,
    mut stream: WatchStream,
    filter: EventFilter,
    progress: Option<Duration>,
    tx: Outbound,
) {
    let mut ticker = tokio::time::interval(progress.unwrap_or(Duration::from_secs(3600)));
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = tx.closed() => return,
            item = stream.next() => match item {
                Some(Ok(batch)) => {
                    let Some(last) = batch.last() else { continue };
                    let revision = last.id;
                    let events: Vec<_> = batch
                        .iter()
                        .map(|entry| event(entry, filter.prev_kv))
                        .filter(|e| filter.keeps(e.r#type()))
                        .collect();
                    if events.is_empty() {
                        continue;
                    }
                    debug!(watch_id, revision, events = events.len(), "watch events");
                    let response = WatchResponse {
                        header: header(revision),
                        watch_id,
                        events,
                        ..Default::default()
                    };
                    if tx.send(Ok(response)).await.is_err() {
                        return;
                    }
                }
                Some(Err(e)) => {
                    let compact_revision = match e {
                        StorageError::Compacted { compact_revision } => compact_revision,
                        _ => 0,
                    };
                    let reason = if compact_revision > 0 {
                        ERR_COMPACTED.to_string()
                    } else {
                        e.to_string()
                    };
                    warn!(watch_id, compact_revision, reason = %reason, "watch canceled by server");
                    let revision = backend.current_revision().await.unwrap_or_default();
                    let _ = tx
                        .send(Ok(WatchResponse {
                            header: header(revision),
                            watch_id,
                            canceled: true,
                            compact_revision,
                            cancel_reason: reason,
                            ..Default::default()
                        }))
                        .await;
                    return;
                }
                None => return,
            },
            _ = ticker.tick(), if progress.is_some() => {
                let revision = backend.current_revision().await.unwrap_or_default();
                let response = WatchResponse {
                    header: header(revision),
                    watch_id,
                    ..Default::default()
                };
                if tx.send(Ok(response)).await.is_err() {
                    return;
                }
            }
        }
    }
}
