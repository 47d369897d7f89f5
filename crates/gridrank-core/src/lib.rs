pub mod app_config;
pub mod business;
pub mod businesses;
pub mod config;
pub mod cost;
pub mod geo;
pub mod scan;

pub use app_config::{AppConfig, Device, Environment};
pub use business::{Address, BusinessIdentity, Keyword};
pub use businesses::{load_businesses, parse_businesses, BusinessConfig, BusinessesFile};
pub use config::{load_app_config, load_app_config_from_env};
pub use cost::{estimate_cost, DEFAULT_COST_PER_QUERY};
pub use geo::Coordinate;
pub use scan::{
    Competitor, GridPoint, GridSize, HeatmapData, HeatmapPoint, KeywordGrid, MatchTier,
    RankObservation, ScanConfig, ScanProgress, ScanStatus, MAX_RADIUS_KM,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read businesses file {path}: {source}")]
    BusinessesFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse businesses file: {0}")]
    BusinessesFileParse(#[source] serde_yaml::Error),

    #[error("businesses validation failed: {0}")]
    Validation(String),
}
