use std::time::Duration;

use gridrank_core::{AppConfig, Device, DEFAULT_COST_PER_QUERY};
use rust_decimal::Decimal;

use crate::matcher::DEFAULT_OVERLAP_THRESHOLD;

/// Tunables for scan execution, usually taken from [`AppConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSettings {
    /// Provider calls issued together before pacing.
    pub batch_size: usize,
    /// Pause between consecutive batches.
    pub batch_delay: Duration,
    pub language: String,
    pub device: Device,
    pub overlap_threshold: f64,
    pub cost_per_query: Decimal,
    pub max_concurrent_scans: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            batch_size: 5,
            batch_delay: Duration::from_millis(500),
            language: "en".to_string(),
            device: Device::Desktop,
            overlap_threshold: DEFAULT_OVERLAP_THRESHOLD,
            cost_per_query: DEFAULT_COST_PER_QUERY,
            max_concurrent_scans: 2,
        }
    }
}

impl ScanSettings {
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            batch_size: config.scan_batch_size.max(1),
            batch_delay: Duration::from_millis(config.scan_batch_delay_ms),
            language: config.provider_language.clone(),
            device: config.provider_device,
            overlap_threshold: config.match_overlap_threshold,
            cost_per_query: config.cost_per_query,
            max_concurrent_scans: config.max_concurrent_scans.max(1),
        }
    }
}
