//! Value types shared by the scan engine, persistence, and API layers.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::geo::Coordinate;
use crate::ConfigError;

/// Largest scan radius accepted at scan start. Larger areas distort the
/// small-area degree conversion used by the grid generator.
pub const MAX_RADIUS_KM: f64 = 50.0;

/// Supported lattice sizes. The grid holds `size²` points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum GridSize {
    Three,
    Five,
    Seven,
    Nine,
}

impl GridSize {
    pub const ALL: [GridSize; 4] = [
        GridSize::Three,
        GridSize::Five,
        GridSize::Seven,
        GridSize::Nine,
    ];

    #[must_use]
    pub const fn side(self) -> u32 {
        match self {
            GridSize::Three => 3,
            GridSize::Five => 5,
            GridSize::Seven => 7,
            GridSize::Nine => 9,
        }
    }

    #[must_use]
    pub const fn point_count(self) -> u32 {
        self.side() * self.side()
    }
}

impl TryFrom<u8> for GridSize {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            3 => Ok(GridSize::Three),
            5 => Ok(GridSize::Five),
            7 => Ok(GridSize::Seven),
            9 => Ok(GridSize::Nine),
            other => Err(format!("grid size {other} is not one of 3, 5, 7, 9")),
        }
    }
}

impl From<GridSize> for u8 {
    fn from(value: GridSize) -> Self {
        // side() is at most 9
        #[allow(clippy::cast_possible_truncation)]
        let side = value.side() as u8;
        side
    }
}

impl std::fmt::Display for GridSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{0}x{0}", self.side())
    }
}

/// Immutable configuration of one scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    pub grid_size: GridSize,
    pub radius_km: f64,
    /// Active keyword texts, in processing order.
    pub keywords: Vec<String>,
}

impl ScanConfig {
    /// Checks the invariants a scan needs before any work is scheduled.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the keyword set is empty or
    /// contains a blank entry, or if the radius is not a finite value in
    /// `(0, MAX_RADIUS_KM]`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keywords.is_empty() {
            return Err(ConfigError::Validation(
                "scan requires at least one active keyword".to_string(),
            ));
        }
        if self.keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "keywords must be non-empty".to_string(),
            ));
        }
        if !self.radius_km.is_finite() || self.radius_km <= 0.0 {
            return Err(ConfigError::Validation(format!(
                "radius must be a positive distance, got {}",
                self.radius_km
            )));
        }
        if self.radius_km > MAX_RADIUS_KM {
            return Err(ConfigError::Validation(format!(
                "radius {} km exceeds the {MAX_RADIUS_KM} km maximum",
                self.radius_km
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn point_count(&self) -> u32 {
        self.grid_size.point_count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Scanning,
    Complete,
    Failed,
    Cancelled,
}

impl ScanStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Scanning => "scanning",
            ScanStatus::Complete => "complete",
            ScanStatus::Failed => "failed",
            ScanStatus::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            ScanStatus::Complete | ScanStatus::Failed | ScanStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ScanStatus::Pending),
            "scanning" => Ok(ScanStatus::Scanning),
            "complete" => Ok(ScanStatus::Complete),
            "failed" => Ok(ScanStatus::Failed),
            "cancelled" => Ok(ScanStatus::Cancelled),
            other => Err(format!("unknown scan status '{other}'")),
        }
    }
}

/// Identity-matching strategies, declared in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    NumericId,
    PlaceId,
    ExactName,
    WordOverlap,
    Domain,
}

impl MatchTier {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            MatchTier::NumericId => "numeric_id",
            MatchTier::PlaceId => "place_id",
            MatchTier::ExactName => "exact_name",
            MatchTier::WordOverlap => "word_overlap",
            MatchTier::Domain => "domain",
        }
    }
}

impl std::fmt::Display for MatchTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "numeric_id" => Ok(MatchTier::NumericId),
            "place_id" => Ok(MatchTier::PlaceId),
            "exact_name" => Ok(MatchTier::ExactName),
            "word_overlap" => Ok(MatchTier::WordOverlap),
            "domain" => Ok(MatchTier::Domain),
            other => Err(format!("unknown match tier '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Competitor {
    pub name: String,
    pub rank: u32,
}

/// One lattice cell of a scan, plus the result observed there for the
/// owning keyword.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    /// 1-based, row-major.
    pub position: u32,
    pub coordinate: Coordinate,
    pub distance_km: f64,
    pub rank: Option<u32>,
    pub matched_url: Option<String>,
    pub match_tier: Option<MatchTier>,
    #[serde(default)]
    pub competitors: Vec<Competitor>,
}

impl GridPoint {
    #[must_use]
    pub fn unscanned(position: u32, coordinate: Coordinate, distance_km: f64) -> Self {
        Self {
            position,
            coordinate,
            distance_km,
            rank: None,
            matched_url: None,
            match_tier: None,
            competitors: Vec::new(),
        }
    }
}

/// The grid owned by a single keyword of a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordGrid {
    pub keyword: String,
    pub points: Vec<GridPoint>,
}

/// Result of querying one (keyword, point) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankObservation {
    pub keyword: String,
    pub position: u32,
    pub rank: Option<u32>,
    pub matched_url: Option<String>,
    pub match_tier: Option<MatchTier>,
    pub competitors: Vec<Competitor>,
}

impl RankObservation {
    /// Observation recorded when a point produced no usable data.
    #[must_use]
    pub fn no_data(keyword: &str, position: u32) -> Self {
        Self {
            keyword: keyword.to_string(),
            position,
            rank: None,
            matched_url: None,
            match_tier: None,
            competitors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapPoint {
    pub position: u32,
    pub coordinate: Coordinate,
    pub rank: Option<u32>,
    pub intensity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapData {
    pub keyword: String,
    pub points: Vec<HeatmapPoint>,
    pub total_points: u32,
    pub average_rank: f64,
    pub points_ranking: u32,
    pub not_ranking: u32,
    pub top3_count: u32,
    pub visibility_score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanProgress {
    /// 0-based index of the keyword being processed.
    pub current_keyword_index: u32,
    pub total_keywords: u32,
    pub current_keyword: Option<String>,
    /// Points finished within the current keyword.
    pub points_completed: u32,
}
