//! Conversions between etcd wire messages and log entries.

use tonic::Status;

use crate::proto::etcdserverpb::ResponseHeader;
use crate::proto::mvccpb::{event::EventType, Event, KeyValue};
use crate::storage::{KeyRange, LogEntry};

pub fn header(revision: i64) -> Option<ResponseHeader> {
    Some(ResponseHeader {
        revision,
        ..Default::default()
    })
}

/// Key bytes as a log name. Names are stored as text.
pub fn key_string(key: Vec<u8>) -> Result<String, Status> {
    String::from_utf8(key)
        .map_err(|_| Status::invalid_argument("etcdserver: key must be valid UTF-8"))
}

/// Interpret an etcd `(key, range_end)` pair.
///
/// * empty `range_end`: the single key
/// * `range_end` of `\0` or all `0xff`: every key from `key` on
/// * `range_end` equal to `key` with its last byte incremented: a prefix scan
/// * anything else: the half-open span `[key, range_end)`
///
/// A `key` of `\0` starts at the beginning of the keyspace.
pub fn key_range(key: Vec<u8>, range_end: Vec<u8>) -> Result<KeyRange, Status> {
    let key = if key == [0] { Vec::new() } else { key };
    if range_end.is_empty() {
        return Ok(KeyRange::Exact(key_string(key)?));
    }
    if range_end == [0] || range_end.iter().all(|b| *b == 0xff) {
        return Ok(KeyRange::from(key_string(key)?));
    }

    let is_prefix = decrement_last(&range_end).as_deref() == Some(key.as_slice());
    let start = key_string(key)?;
    if is_prefix {
        return Ok(KeyRange::prefix(&start));
    }
    Ok(KeyRange::span(start, key_string(range_end)?))
}

/// `range_end` with its last byte decremented, recovering the prefix a client
/// built the range from.
fn decrement_last(range_end: &[u8]) -> Option<Vec<u8>> {
    let (last, rest) = range_end.split_last()?;
    let last = last.checked_sub(1)?;
    let mut prefix = rest.to_vec();
    prefix.push(last);
    Some(prefix)
}

/// The key-value an entry represents.
pub fn key_value(entry: &LogEntry, keys_only: bool) -> KeyValue {
    KeyValue {
        key: entry.name.clone().into_bytes(),
        create_revision: entry.effective_create_revision(),
        mod_revision: entry.id,
        version: 0,
        value: if keys_only {
            Vec::new()
        } else {
            entry.value.clone()
        },
        lease: entry.lease,
    }
}

/// The key-value an entry replaced, rebuilt from its `prev_revision` and
/// `old_value` columns.
pub fn prev_key_value(entry: &LogEntry) -> Option<KeyValue> {
    if entry.created || entry.prev_revision == 0 {
        return None;
    }
    Some(KeyValue {
        key: entry.name.clone().into_bytes(),
        create_revision: entry.create_revision,
        mod_revision: entry.prev_revision,
        version: 0,
        value: entry.old_value.clone(),
        lease: entry.lease,
    })
}

pub fn event(entry: &LogEntry, with_prev: bool) -> Event {
    let kind = if entry.deleted {
        EventType::Delete
    } else {
        EventType::Put
    };
    Event {
        r#type: kind as i32,
        kv: Some(key_value(entry, false)),
        prev_kv: if with_prev {
            prev_key_value(entry)
        } else {
            None
        },
    }
}
