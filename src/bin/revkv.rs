//! revkv: etcd v3 server backed by a SQL revision log
//!
//! ## Architecture
//! ```text
//! [etcd client] --(KV/Watch/Lease gRPC)--> [revkv] --(sqlx)--> [SQLite | PostgreSQL]
//! ```
//!
//! ## Configuration
//! - `--config <path>` / REVKV_CONFIG: YAML config file (optional)
//! - REVKV__STORAGE__ENDPOINT: connection string (default: sqlite://./db/state.db)
//! - REVKV__SERVER__LISTEN_ADDRESS: gRPC listen address (default: 0.0.0.0:2379)
//! - REVKV_LOG: tracing filter (default: info)

use std::net::SocketAddr;

use tracing::{error, info};

use revkv::backend::{Backend, LogBackend};
use revkv::config::Config;
use revkv::server::KvBridge;
use revkv::storage::init_storage;
use revkv::utils::bootstrap::{init_tracing, parse_config_path, redact_endpoint};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        endpoint = %redact_endpoint(&config.storage.endpoint),
        "Starting revkv"
    );

    let log = init_storage(&config.storage).await?;
    info!("Storage initialized");

    let backend = LogBackend::open(log, &config.watch, config.compaction.clone()).await?;
    backend.start().await?;

    let addr: SocketAddr = config.server.listen_address.parse()?;
    let bridge = KvBridge::new(backend.clone(), &config.server);
    bridge
        .serve(addr, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
        })
        .await?;

    backend.shutdown();
    info!("revkv stopped");
    Ok(())
}
