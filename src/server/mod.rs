//! etcd v3 gRPC surface.
//!
//! [`KvBridge`] implements the KV, Watch, Lease and Maintenance services on
//! top of a [`Backend`]. Request shapes the revision log cannot express are
//! rejected rather than approximated.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tonic::transport::Server;
use tonic_health::server::health_reporter;
use tracing::info;

use crate::backend::Backend;
use crate::config::ServerConfig;
use crate::proto::etcdserverpb::kv_server::KvServer;
use crate::proto::etcdserverpb::lease_server::LeaseServer;
use crate::proto::etcdserverpb::maintenance_server::MaintenanceServer;
use crate::proto::etcdserverpb::watch_server::WatchServer;
use crate::utils::bootstrap::millis;

pub mod convert;
mod errors;
mod kv;
mod lease;
mod maintenance;
pub mod txn;
mod watch;

pub use errors::{ERR_COMPACTED, ERR_FUTURE_REV, ERR_NOT_SUPPORTED};

/// Version reported by Maintenance.Status.
pub const ETCD_VERSION: &str = "3.5.13";

/// Protocol bridge from etcd requests to backend calls.
#[derive(Clone)]
pub struct KvBridge {
    backend: Arc<dyn Backend>,
    notify_interval: Duration,
}

impl KvBridge {
    pub fn new(backend: Arc<dyn Backend>, config: &ServerConfig) -> Self {
        Self {
            backend,
            notify_interval: millis(config.notify_interval_ms),
        }
    }

    /// Serve all four services plus gRPC health on `addr` until `signal`
    /// resolves.
    pub async fn serve<F>(self, addr: SocketAddr, signal: F) -> Result<(), tonic::transport::Error>
    where
        F: Future<Output = ()> + Send,
    {
        let (mut health, health_service) = health_reporter();
        health.set_serving::<KvServer<KvBridge>>().await;
        health.set_serving::<WatchServer<KvBridge>>().await;

        info!(address = %addr, "Server listening");
        Server::builder()
            .add_service(health_service)
            .add_service(KvServer::new(self.clone()))
            .add_service(WatchServer::new(self.clone()))
            .add_service(LeaseServer::new(self.clone()))
            .add_service(MaintenanceServer::new(self))
            .serve_with_shutdown(addr, signal)
            .await
    }
}
