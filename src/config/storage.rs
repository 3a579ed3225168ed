//! Storage configuration types.

use serde::Deserialize;

/// TLS mode reported when any certificate material is configured.
pub const TLS_MODE_VERIFY_FULL: &str = "verify-full";

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Connection string; the scheme selects the dialect.
    pub endpoint: String,
    /// TLS material for the database connection.
    pub tls: TlsConfig,
    /// Connection pool limits.
    pub pool: PoolConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "sqlite://./db/state.db".to_string(),
            tls: TlsConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

/// Database TLS certificate paths.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub cert_file: Option<String>,
    pub key_file: Option<String>,
    pub ca_file: Option<String>,
}

impl TlsConfig {
    /// TLS mode string, present only when certificate material is configured.
    pub fn mode(&self) -> Option<&'static str> {
        if self.cert_file.is_some() || self.key_file.is_some() || self.ca_file.is_some() {
            Some(TLS_MODE_VERIFY_FULL)
        } else {
            None
        }
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum open connections.
    pub max_open: u32,
    /// Connections kept open while idle.
    pub max_idle: u32,
    /// Maximum connection lifetime in seconds; 0 means unlimited.
    pub max_lifetime_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_open: 10,
            max_idle: 2,
            max_lifetime_secs: 0,
        }
    }
}
