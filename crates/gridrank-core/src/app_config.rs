use std::net::SocketAddr;
use std::path::PathBuf;

use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Device class the ranking provider should emulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Desktop,
    Mobile,
}

impl Device {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Device::Desktop => "desktop",
            Device::Mobile => "mobile",
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub businesses_path: PathBuf,
    pub api_key_hash_salt: Option<String>,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub provider_base_url: String,
    pub provider_api_key: Option<String>,
    pub provider_timeout_secs: u64,
    pub provider_language: String,
    pub provider_device: Device,
    pub provider_max_retries: u32,
    pub provider_retry_backoff_base_ms: u64,
    pub scan_batch_size: usize,
    pub scan_batch_delay_ms: u64,
    pub match_overlap_threshold: f64,
    pub cost_per_query: Decimal,
    pub max_concurrent_scans: usize,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("businesses_path", &self.businesses_path)
            .field("database_url", &"[redacted]")
            .field(
                "api_key_hash_salt",
                &self.api_key_hash_salt.as_ref().map(|_| "[redacted]"),
            )
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("provider_base_url", &self.provider_base_url)
            .field(
                "provider_api_key",
                &self.provider_api_key.as_ref().map(|_| "[redacted]"),
            )
            .field("provider_timeout_secs", &self.provider_timeout_secs)
            .field("provider_language", &self.provider_language)
            .field("provider_device", &self.provider_device)
            .field("provider_max_retries", &self.provider_max_retries)
            .field(
                "provider_retry_backoff_base_ms",
                &self.provider_retry_backoff_base_ms,
            )
            .field("scan_batch_size", &self.scan_batch_size)
            .field("scan_batch_delay_ms", &self.scan_batch_delay_ms)
            .field("match_overlap_threshold", &self.match_overlap_threshold)
            .field("cost_per_query", &self.cost_per_query)
            .field("max_concurrent_scans", &self.max_concurrent_scans)
            .finish()
    }
}
