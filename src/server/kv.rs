//! KV service: Range, Put, DeleteRange, Txn, Compact.

use tonic::{Request, Response, Status};
use tracing::debug;

use super::convert::{header, key_range, key_string, key_value};
use super::errors::{unsupported, ERR_KEY_NOT_FOUND};
use super::txn::{classify, TxnOp};
use super::KvBridge;
use crate::backend::KvError;
use crate::proto::etcdserverpb::kv_server::Kv;
use crate::proto::etcdserverpb::response_op::Response as OpResponse;
use crate::proto::etcdserverpb::{
    CompactionRequest, CompactionResponse, DeleteRangeRequest, DeleteRangeResponse, PutRequest,
    PutResponse, RangeRequest, RangeResponse, ResponseOp, TxnRequest, TxnResponse,
};
use crate::proto::mvccpb::KeyValue;
use crate::storage::{KeyRange, LogEntry};

/// Attempts an unconditional Put makes when concurrent writers keep moving
/// the key under it.
const PUT_ATTEMPTS: usize = 3;

impl KvBridge {
    pub(super) async fn read_range(&self, req: RangeRequest) -> Result<RangeResponse, Status> {
        let range = key_range(req.key, req.range_end)?;
        debug!(?range, revision = req.revision, limit = req.limit, "range");

        if req.count_only {
            let (revision, count) = self.backend.count(&range, req.revision).await?;
            return Ok(RangeResponse {
                header: header(revision),
                count,
                ..Default::default()
            });
        }

        let (revision, entries, more, count) = match range {
            KeyRange::Exact(ref key) => {
                let (revision, entry) = self.backend.get(key, req.revision).await?;
                let entries: Vec<LogEntry> = entry.into_iter().collect();
                let count = entries.len() as i64;
                (revision, entries, false, count)
            }
            KeyRange::Span { .. } => {
                let limit = (req.limit > 0).then(|| req.limit as u64);
                let (revision, mut entries) = self
                    .backend
                    .list(&range, limit.map(|l| l + 1), req.revision)
                    .await?;
                match limit {
                    Some(limit) if entries.len() as u64 > limit => {
                        entries.truncate(limit as usize);
                        let at = if req.revision > 0 {
                            req.revision
                        } else {
                            revision
                        };
                        let (_, count) = self.backend.count(&range, at).await?;
                        (revision, entries, true, count)
                    }
                    _ => {
                        let count = entries.len() as i64;
                        (revision, entries, false, count)
                    }
                }
            }
        };

        Ok(RangeResponse {
            header: header(revision),
            kvs: entries
                .iter()
                .map(|entry| key_value(entry, req.keys_only))
                .collect(),
            more,
            count,
        })
    }

    /// Unconditional write: update whatever is current, or create.
    pub(super) async fn put_key(&self, req: PutRequest) -> Result<PutResponse, Status> {
        let key = key_string(req.key)?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let (_, current) = self.backend.get(&key, 0).await?;
            let value = match (&current, req.ignore_value) {
                (Some(current), true) => current.value.clone(),
                (None, true) => return Err(Status::not_found(ERR_KEY_NOT_FOUND)),
                (_, false) => req.value.clone(),
            };
            let lease = match (&current, req.ignore_lease) {
                (Some(current), true) => current.lease,
                (None, true) => return Err(Status::not_found(ERR_KEY_NOT_FOUND)),
                (_, false) => req.lease,
            };

            let written = match &current {
                Some(current) => self
                    .backend
                    .update(&key, value, current.id, lease)
                    .await
                    .map(|(revision, _)| revision),
                None => self.backend.create(&key, value, lease).await,
            };
            match written {
                Ok(revision) => {
                    return Ok(PutResponse {
                        header: header(revision),
                        prev_kv: current
                            .filter(|_| req.prev_kv)
                            .map(|prev| key_value(&prev, false)),
                    });
                }
                Err(KvError::KeyExists { .. } | KvError::NotFound { .. })
                    if attempt < PUT_ATTEMPTS =>
                {
                    debug!(key = %key, attempt, "put raced with another writer");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Lists the range, then deletes each key on its own. Not atomic: a
    /// failure part way leaves the keys before it deleted.
    pub(super) async fn delete_keys(
        &self,
        req: DeleteRangeRequest,
    ) -> Result<DeleteRangeResponse, Status> {
        let range = key_range(req.key, req.range_end)?;
        let (mut revision, entries) = match range {
            KeyRange::Exact(ref key) => {
                let (revision, entry) = self.backend.get(key, 0).await?;
                (revision, entry.into_iter().collect())
            }
            KeyRange::Span { .. } => self.backend.list(&range, None, 0).await?,
        };

        let mut deleted = 0;
        let mut prev_kvs = Vec::new();
        for entry in entries {
            let (at, prev) = self.backend.delete(&entry.name, 0).await?;
            revision = revision.max(at);
            if let Some(prev) = prev {
                deleted += 1;
                if req.prev_kv {
                    prev_kvs.push(key_value(&prev, false));
                }
            }
        }
        debug!(?range, deleted, revision, "delete range");

        Ok(DeleteRangeResponse {
            header: header(revision),
            deleted,
            prev_kvs,
        })
    }

    pub(super) async fn apply_txn(&self, req: TxnRequest) -> Result<TxnResponse, Status> {
        match classify(req) {
            TxnOp::Create(put) => {
                let key = key_string(put.key)?;
                match self.backend.create(&key, put.value, put.lease).await {
                    Ok(revision) => Ok(succeeded(revision, put_response(revision, None))),
                    Err(KvError::KeyExists { revision, .. }) => Ok(TxnResponse {
                        header: header(revision),
                        succeeded: false,
                        responses: Vec::new(),
                    }),
                    Err(e) => Err(e.into()),
                }
            }
            TxnOp::Update { expected, put } => {
                let key = key_string(put.key)?;
                match self
                    .backend
                    .update(&key, put.value, expected, put.lease)
                    .await
                {
                    Ok((revision, prev)) => {
                        let prev = put.prev_kv.then(|| key_value(&prev, false));
                        Ok(succeeded(revision, put_response(revision, prev)))
                    }
                    Err(KvError::KeyExists { revision, current }) => Ok(failed(revision, current)),
                    Err(KvError::NotFound { revision }) => Ok(failed(revision, None)),
                    Err(e) => Err(e.into()),
                }
            }
            TxnOp::Delete { key, expected } => {
                let key = key_string(key)?;
                match self.backend.delete(&key, expected).await {
                    Ok((revision, Some(prev))) => Ok(succeeded(
                        revision,
                        OpResponse::ResponseDeleteRange(DeleteRangeResponse {
                            header: header(revision),
                            deleted: 1,
                            prev_kvs: vec![key_value(&prev, false)],
                        }),
                    )),
                    Ok((revision, None)) => Ok(failed(revision, None)),
                    Err(KvError::KeyExists { revision, current }) => Ok(failed(revision, current)),
                    Err(e) => Err(e.into()),
                }
            }
            TxnOp::Compact { revision } => {
                let current = self.backend.compact(revision).await?;
                Ok(succeeded(current, put_response(current, None)))
            }
            TxnOp::Unsupported => Err(unsupported()),
        }
    }
}

fn put_response(revision: i64, prev_kv: Option<KeyValue>) -> OpResponse {
    OpResponse::ResponsePut(PutResponse {
        header: header(revision),
        prev_kv,
    })
}

fn succeeded(revision: i64, response: OpResponse) -> TxnResponse {
    TxnResponse {
        header: header(revision),
        succeeded: true,
        responses: vec![ResponseOp {
            response: Some(response),
        }],
    }
}

/// Else branch: a read of the key's current state.
fn failed(revision: i64, current: Option<LogEntry>) -> TxnResponse {
    let kvs: Vec<KeyValue> = current.iter().map(|e| key_value(e, false)).collect();
    TxnResponse {
        header: header(revision),
        succeeded: false,
        responses: vec![ResponseOp {
            response: Some(OpResponse::ResponseRange(RangeResponse {
                header: header(revision),
                count: kvs.len() as i64,
                kvs,
                more: false,
            })),
        }],
    }
}

#[tonic::async_trait]
impl Kv for KvBridge {
    async fn range(&self, request: Request<RangeRequest>) -> Result<Response<RangeResponse>, Status> {
        self.read_range(request.into_inner()).await.map(Response::new)
    }

    async fn put(&self, request: Request<PutRequest>) -> Result<Response<PutResponse>, Status> {
        self.put_key(request.into_inner()).await.map(Response::new)
    }

    async fn delete_range(
        &self,
        request: Request<DeleteRangeRequest>,
    ) -> Result<Response<DeleteRangeResponse>, Status> {
        self.delete_keys(request.into_inner())
            .await
            .map(Response::new)
    }

    async fn txn(&self, request: Request<TxnRequest>) -> Result<Response<TxnResponse>, Status> {
        self.apply_txn(request.into_inner()).await.map(Response::new)
    }

    async fn compact(
        &self,
        request: Request<CompactionRequest>,
    ) -> Result<Response<CompactionResponse>, Status> {
        let revision = request.into_inner().revision;
        let current = self.backend.compact(revision).await?;
        Ok(Response::new(CompactionResponse {
            header: header(current),
        }))
    }
}
