use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::business::{Address, BusinessIdentity, Keyword};
use crate::geo::Coordinate;
use crate::scan::{GridSize, ScanConfig, MAX_RADIUS_KM};
use crate::ConfigError;

/// A tracked business as declared in `businesses.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessConfig {
    pub name: String,
    pub domain: Option<String>,
    #[serde(default)]
    pub address: Address,
    pub latitude: f64,
    pub longitude: f64,
    pub cid: Option<u64>,
    pub place_id: Option<String>,
    #[serde(default)]
    pub keywords: Vec<Keyword>,
    #[serde(default = "default_grid_size")]
    pub grid_size: GridSize,
    #[serde(default = "default_radius_km")]
    pub radius_km: f64,
    /// Six-field cron expression for scheduled re-scans.
    pub rescan_cron: Option<String>,
}

fn default_grid_size() -> GridSize {
    GridSize::Five
}

fn default_radius_km() -> f64 {
    2.0
}

impl BusinessConfig {
    /// Generate a URL-safe slug from the business name.
    #[must_use]
    pub fn slug(&self) -> String {
        self.name
            .to_lowercase()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' {
                    c
                } else if c == ' ' {
                    '-'
                } else {
                    '\0'
                }
            })
            .filter(|&c| c != '\0')
            .collect::<String>()
            .split('-')
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("-")
    }

    #[must_use]
    pub fn identity(&self) -> BusinessIdentity {
        BusinessIdentity {
            name: self.name.trim().to_string(),
            domain: self.domain.clone(),
            address: self.address.clone(),
            coordinate: Coordinate::new(self.latitude, self.longitude),
            cid: self.cid,
            place_id: self.place_id.clone(),
        }
    }

    /// Scan configuration from the currently active keywords.
    #[must_use]
    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            grid_size: self.grid_size,
            radius_km: self.radius_km,
            keywords: Keyword::active_texts(&self.keywords),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BusinessesFile {
    pub businesses: Vec<BusinessConfig>,
}

impl BusinessesFile {
    #[must_use]
    pub fn find_by_slug(&self, slug: &str) -> Option<&BusinessConfig> {
        self.businesses.iter().find(|b| b.slug() == slug)
    }
}

/// Load and validate the businesses configuration from a YAML file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_businesses(path: &Path) -> Result<BusinessesFile, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::BusinessesFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    parse_businesses(&content)
}

/// Parse and validate businesses YAML already held in memory.
///
/// # Errors
///
/// Returns `ConfigError` if the YAML is malformed or fails validation.
pub fn parse_businesses(content: &str) -> Result<BusinessesFile, ConfigError> {
    let file: BusinessesFile =
        serde_yaml::from_str(content).map_err(ConfigError::BusinessesFileParse)?;
    validate_businesses(&file)?;
    Ok(file)
}

fn validate_businesses(file: &BusinessesFile) -> Result<(), ConfigError> {
    let mut seen_names = HashSet::new();
    let mut seen_slugs = HashSet::new();

    for business in &file.businesses {
        if business.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "business name must be non-empty".to_string(),
            ));
        }

        if !Coordinate::new(business.latitude, business.longitude).is_valid() {
            return Err(ConfigError::Validation(format!(
                "business '{}' has out-of-range coordinates ({}, {})",
                business.name, business.latitude, business.longitude
            )));
        }

        if !business.radius_km.is_finite()
            || business.radius_km <= 0.0
            || business.radius_km > MAX_RADIUS_KM
        {
            return Err(ConfigError::Validation(format!(
                "business '{}' has invalid radius {}; must be in (0, {MAX_RADIUS_KM}]",
                business.name, business.radius_km
            )));
        }

        if business.rescan_cron.is_some() && Keyword::active_texts(&business.keywords).is_empty()
        {
            return Err(ConfigError::Validation(format!(
                "business '{}' schedules re-scans but has no active keywords",
                business.name
            )));
        }

        let lower_name = business.name.to_lowercase();
        if !seen_names.insert(lower_name) {
            return Err(ConfigError::Validation(format!(
                "duplicate business name: '{}'",
                business.name
            )));
        }

        let slug = business.slug();
        if !seen_slugs.insert(slug.clone()) {
            return Err(ConfigError::Validation(format!(
                "duplicate business slug: '{}' (from business '{}')",
                slug, business.name
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
#[path = "businesses_test.rs"]
mod tests;
