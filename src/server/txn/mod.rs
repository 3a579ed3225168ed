//! Transaction pattern matcher.
//!
//! etcd transactions are arbitrary compare/then/else programs; the revision
//! log supports exactly the handful of shapes that consensus-store clients
//! issue in practice. [`classify`] maps a request onto one of those shapes or
//! reports it unsupported. It never guesses.

use crate::proto::etcdserverpb::compare::{CompareResult, CompareTarget, TargetUnion};
use crate::proto::etcdserverpb::request_op::Request;
use crate::proto::etcdserverpb::{Compare, PutRequest, RequestOp, TxnRequest};
use crate::storage::COMPACT_REV_KEY;

/// The operation a supported transaction stands for.
#[derive(Debug, Clone, PartialEq)]
pub enum TxnOp {
    /// `version(k) == 0` (or `mod(k) == 0`) then `put(k)`.
    Create(PutRequest),
    /// `mod(k) == R` then `put(k)`, else optionally `range(k)`.
    Update { expected: i64, put: PutRequest },
    /// `mod(k) == R` then `delete(k)`, or the unconditional
    /// `then range(k), delete(k)` form with `expected` 0.
    Delete { key: Vec<u8>, expected: i64 },
    /// Compaction bookkeeping on the reserved key: `version(compact_rev_key)
    /// == n` then `put(compact_rev_key, revision)` else `range`.
    Compact { revision: i64 },
    Unsupported,
}

pub fn classify(txn: TxnRequest) -> TxnOp {
    let TxnRequest {
        compare,
        success,
        failure,
    } = txn;
    let compare = match <[Compare; 1]>::try_from(compare) {
        Ok([compare]) => compare,
        Err(compare) if compare.is_empty() => return unconditional_delete(success, failure),
        Err(_) => return TxnOp::Unsupported,
    };
    if compare.result() != CompareResult::Equal || !compare.range_end.is_empty() {
        return TxnOp::Unsupported;
    }

    if compare.key == COMPACT_REV_KEY.as_bytes() {
        return compact(&compare, success, failure);
    }

    let Some(op) = single(success) else {
        return TxnOp::Unsupported;
    };
    if !failure_is_range(&failure, &compare.key) {
        return TxnOp::Unsupported;
    }
    let target = compare.target();
    let revision = compared_value(&compare);

    match op {
        Request::RequestPut(put) if put.key == compare.key && plain(&put) => match target {
            CompareTarget::Version if revision == 0 && failure.is_empty() => TxnOp::Create(put),
            CompareTarget::Mod if revision == 0 => TxnOp::Create(put),
            CompareTarget::Mod if revision > 0 => TxnOp::Update {
                expected: revision,
                put,
            },
            _ => TxnOp::Unsupported,
        },
        Request::RequestDeleteRange(delete)
            if delete.key == compare.key
                && delete.range_end.is_empty()
                && target == CompareTarget::Mod
                && revision > 0 =>
        {
            TxnOp::Delete {
                key: delete.key,
                expected: revision,
            }
        }
        _ => TxnOp::Unsupported,
    }
}

/// `then range(k), delete(k)` with no compare and no else branch.
fn unconditional_delete(success: Vec<RequestOp>, failure: Vec<RequestOp>) -> TxnOp {
    if !failure.is_empty() {
        return TxnOp::Unsupported;
    }
    let mut ops = success.into_iter().filter_map(|op| op.request);
    match (ops.next(), ops.next(), ops.next()) {
        (Some(Request::RequestRange(range)), Some(Request::RequestDeleteRange(delete)), None)
            if range.key == delete.key && delete.range_end.is_empty() =>
        {
            TxnOp::Delete {
                key: delete.key,
                expected: 0,
            }
        }
        _ => TxnOp::Unsupported,
    }
}

fn compact(compare: &Compare, success: Vec<RequestOp>, failure: Vec<RequestOp>) -> TxnOp {
    if compare.target() != CompareTarget::Version || failure.len() != 1 {
        return TxnOp::Unsupported;
    }
    match single(success) {
        Some(Request::RequestPut(put)) if put.key == compare.key => {
            match std::str::from_utf8(&put.value).ok().and_then(|v| v.parse().ok()) {
                Some(revision) => TxnOp::Compact { revision },
                None => TxnOp::Unsupported,
            }
        }
        _ => TxnOp::Unsupported,
    }
}

fn single(ops: Vec<RequestOp>) -> Option<Request> {
    match <[RequestOp; 1]>::try_from(ops) {
        Ok([op]) => op.request,
        Err(_) => None,
    }
}

/// Else branch is empty or a single read of the compared key.
fn failure_is_range(failure: &[RequestOp], key: &[u8]) -> bool {
    match failure {
        [] => true,
        [RequestOp {
            request: Some(Request::RequestRange(range)),
        }] => range.key == key,
        _ => false,
    }
}

/// Puts with `ignore_value`/`ignore_lease` need the current entry and are only
/// served by the plain Put RPC.
fn plain(put: &PutRequest) -> bool {
    !put.ignore_value && !put.ignore_lease
}

fn compared_value(compare: &Compare) -> i64 {
    match compare.target_union {
        Some(TargetUnion::Version(v)) => v,
        Some(TargetUnion::ModRevision(r)) => r,
        Some(TargetUnion::CreateRevision(r)) => r,
        Some(TargetUnion::Lease(l)) => l,
        Some(TargetUnion::Value(_)) | None => 0,
    }
}
