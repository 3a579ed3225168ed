//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod server;
mod storage;

pub use server::{CompactionConfig, ServerConfig, WatchConfig};
pub use storage::{PoolConfig, StorageConfig, TlsConfig, TLS_MODE_VERIFY_FULL};

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "revkv.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "REVKV_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "REVKV";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "REVKV_LOG";

use serde::Deserialize;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// gRPC server configuration.
    pub server: ServerConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Watch engine configuration.
    pub watch: WatchConfig,
    /// Background compaction configuration.
    pub compaction: CompactionConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `revkv.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ::config::ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.listen_address, "0.0.0.0:2379");
        assert_eq!(config.watch.poll_interval_ms, 500);
        assert_eq!(config.watch.batch_size, 500);
        assert_eq!(config.compaction.interval_secs, 300);
    }

    #[test]
    fn test_config_from_yaml_file() {
        use std::io::Write;

        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .expect("temp file");
        writeln!(
            file,
            "storage:\n  endpoint: postgres://kv@db/kv\n  tls:\n    ca_file: /ca.pem\nwatch:\n  batch_size: 50"
        )
        .expect("write config");

        let path = file.path().to_str().expect("utf-8 path");
        let config = Config::load(Some(path)).expect("load config");
        assert_eq!(config.storage.endpoint, "postgres://kv@db/kv");
        assert_eq!(config.storage.tls.mode(), Some(TLS_MODE_VERIFY_FULL));
        assert_eq!(config.watch.batch_size, 50);
        assert_eq!(config.watch.poll_interval_ms, 500);
    }
}
