//! Grid scan engine: lattice generation, batched provider queries, entity
//! matching, heatmap aggregation, and the scan job lifecycle.

pub mod cache;
pub mod error;
pub mod events;
pub mod grid;
pub mod heatmap;
pub mod job;
pub mod matcher;
pub mod orchestrator;
pub mod service;
pub mod settings;
pub mod store;
pub mod usage;

pub use cache::{CacheKey, CacheStats, ResultCache};
pub use error::ScanError;
pub use events::{ScanEvent, ScanEvents};
pub use grid::{generate_grid, haversine_km};
pub use heatmap::{aggregate, intensity};
pub use job::{Lifecycle, ScanJob, ScanSummary};
pub use matcher::{top_competitors, EntityMatcher, MatchOutcome};
pub use orchestrator::ScanOrchestrator;
pub use service::{Recovery, ScanRequest, ScanService, INTERRUPTED_REASON};
pub use settings::ScanSettings;
pub use store::{observation_from_point, MemoryScanStore, ScanStore};
pub use usage::{MemoryUsageLedger, UsageLedger};
