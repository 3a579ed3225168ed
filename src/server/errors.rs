//! Mapping of backend errors onto gRPC status codes.

use tonic::Status;
use tracing::error;

use crate::backend::KvError;
use crate::storage::StorageError;

pub const ERR_COMPACTED: &str = "etcdserver: mvcc: required revision has been compacted";
pub const ERR_FUTURE_REV: &str = "etcdserver: mvcc: required revision is a future revision";
pub const ERR_KEY_EXISTS: &str = "etcdserver: key already exists";
pub const ERR_KEY_NOT_FOUND: &str = "etcdserver: key not found";
pub const ERR_NOT_SUPPORTED: &str = "etcdserver: unsupported operations in txn request";

/// A transaction outside the supported shapes.
pub fn unsupported() -> Status {
    Status::invalid_argument(ERR_NOT_SUPPORTED)
}

impl From<StorageError> for Status {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::KeyExists => Status::already_exists(ERR_KEY_EXISTS),
            StorageError::Compacted { .. } => Status::out_of_range(ERR_COMPACTED),
            StorageError::FutureRevision { .. } => Status::out_of_range(ERR_FUTURE_REV),
            StorageError::Unavailable { ref code, .. } => {
                error!(code = %code, error = %e, "storage unavailable");
                Status::unavailable(e.to_string())
            }
            StorageError::InvalidEntry(msg) => Status::invalid_argument(msg),
            StorageError::Config(msg) => Status::internal(msg),
        }
    }
}

impl From<KvError> for Status {
    fn from(e: KvError) -> Self {
        match e {
            KvError::KeyExists { .. } => Status::already_exists(ERR_KEY_EXISTS),
            KvError::NotFound { .. } => Status::not_found(ERR_KEY_NOT_FOUND),
            KvError::Storage(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn test_revision_errors_are_out_of_range() {
        let status: Status = StorageError::Compacted {
            compact_revision: 4,
        }
        .into();
        assert_eq!(status.code(), Code::OutOfRange);
        assert_eq!(status.message(), ERR_COMPACTED);

        let status: Status = KvError::Storage(StorageError::FutureRevision {
            current_revision: 4,
        })
        .into();
        assert_eq!(status.code(), Code::OutOfRange);
        assert_eq!(status.message(), ERR_FUTURE_REV);
    }

    #[test]
    fn test_conflict_is_already_exists() {
        let status: Status = KvError::KeyExists {
            revision: 3,
            current: None,
        }
        .into();
        assert_eq!(status.code(), Code::AlreadyExists);
    }

    #[test]
    fn test_unsupported_txn() {
        let status = unsupported();
        assert_eq!(status.code(), Code::InvalidArgument);
        assert_eq!(status.message(), ERR_NOT_SUPPORTED);
    }
}
