//! Server and networking configuration types.

use serde::Deserialize;

/// gRPC server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the etcd-compatible gRPC endpoint binds to.
    pub listen_address: String,
    /// Period of watch progress notifications, in milliseconds.
    pub notify_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:2379".to_string(),
            notify_interval_ms: 5000,
        }
    }
}

/// Watch engine tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Maximum time between change feed polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum entries read per poll.
    pub batch_size: u64,
    /// Broadcast buffer, in batches, before a slow subscriber lags.
    pub channel_capacity: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            batch_size: 500,
            channel_capacity: 1024,
        }
    }
}

/// Background compaction tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Seconds between compaction runs; 0 disables the compactor.
    pub interval_secs: u64,
    /// Revisions removed per compaction transaction.
    pub batch_size: i64,
    /// Newest revisions never compacted.
    pub min_retain: i64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            batch_size: 1000,
            min_retain: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_address, "0.0.0.0:2379");
        assert_eq!(config.notify_interval_ms, 5000);
    }

    #[test]
    fn test_compaction_config_default() {
        let config = CompactionConfig::default();
        assert_eq!(config.interval_secs, 300);
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.min_retain, 1000);
    }
}
