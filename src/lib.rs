//! revkv - etcd v3 API over a SQL revision log
//!
//! Clients speak the etcd KV/Watch/Lease protocol; every mutation becomes an
//! appended row in a single revision-ordered table, and every read is a query
//! over that table as of some revision.

pub mod backend;
pub mod config;
pub mod server;
pub mod storage;
pub mod utils;
pub mod watch;

pub mod proto {
    pub mod mvccpb {
        tonic::include_proto!("mvccpb");
    }

    pub mod etcdserverpb {
        tonic::include_proto!("etcdserverpb");
    }
}
