//! The scan job aggregate and its lifecycle.
//!
//! ```text
//! Pending -> Scanning -> Complete
//!    |          |-----> Failed
//!    |          `-----> Cancelled
//!    `----------------> Failed | Cancelled
//! ```
//!
//! Lifecycle fields are private: every status change goes through
//! [`ScanJob::start`], [`ScanJob::complete`], [`ScanJob::fail`] or
//! [`ScanJob::cancel`].

use chrono::{DateTime, Utc};
use gridrank_core::{
    BusinessIdentity, HeatmapData, KeywordGrid, RankObservation, ScanConfig, ScanProgress,
    ScanStatus,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ScanError;
use crate::grid::generate_grid;

/// Status and timestamps of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lifecycle {
    pub status: ScanStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: Uuid,
    /// Account whose usage allowance pays for the scan.
    pub account_id: String,
    pub business: BusinessIdentity,
    pub config: ScanConfig,
    pub grids: Vec<KeywordGrid>,
    pub progress: ScanProgress,
    pub estimated_cost: Decimal,
    pub observations: Vec<RankObservation>,
    pub heatmaps: Vec<HeatmapData>,
    #[serde(flatten)]
    lifecycle: Lifecycle,
}

impl ScanJob {
    /// Creates a `Pending` job with one fresh grid per keyword.
    #[must_use]
    pub fn create(
        account_id: impl Into<String>,
        business: BusinessIdentity,
        config: ScanConfig,
        estimated_cost: Decimal,
    ) -> Self {
        Self::restore(
            Uuid::new_v4(),
            account_id.into(),
            business,
            config,
            estimated_cost,
            Lifecycle {
                status: ScanStatus::Pending,
                error_message: None,
                created_at: Utc::now(),
                started_at: None,
                completed_at: None,
            },
        )
    }

    /// Rebuilds a job from persisted state. Grids are regenerated from the
    /// config; callers replay stored observations with
    /// [`ScanJob::record_observation`].
    #[must_use]
    pub fn restore(
        id: Uuid,
        account_id: String,
        business: BusinessIdentity,
        config: ScanConfig,
        estimated_cost: Decimal,
        lifecycle: Lifecycle,
    ) -> Self {
        let grids = config
            .keywords
            .iter()
            .map(|keyword| KeywordGrid {
                keyword: keyword.clone(),
                points: generate_grid(business.coordinate, config.grid_size, config.radius_km),
            })
            .collect();
        let progress = ScanProgress {
            total_keywords: u32::try_from(config.keywords.len()).unwrap_or(u32::MAX),
            ..ScanProgress::default()
        };

        Self {
            id,
            account_id,
            business,
            config,
            grids,
            progress,
            estimated_cost,
            observations: Vec::new(),
            heatmaps: Vec::new(),
            lifecycle,
        }
    }

    #[must_use]
    pub fn status(&self) -> ScanStatus {
        self.lifecycle.status
    }

    #[must_use]
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.lifecycle.error_message.as_deref()
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.lifecycle.created_at
    }

    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.lifecycle.started_at
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.lifecycle.completed_at
    }

    /// `Pending -> Scanning`.
    ///
    /// # Errors
    ///
    /// [`ScanError::InvalidTransition`] from any other state.
    pub fn start(&mut self) -> Result<(), ScanError> {
        self.transition(ScanStatus::Scanning, &[ScanStatus::Pending])?;
        self.lifecycle.started_at = Some(Utc::now());
        Ok(())
    }

    /// `Scanning -> Complete`, only once every keyword has a heatmap.
    ///
    /// # Errors
    ///
    /// [`ScanError::InvalidTransition`] if the job is not scanning or a
    /// keyword is still missing its heatmap.
    pub fn complete(&mut self) -> Result<(), ScanError> {
        if self.config.keywords.iter().any(|k| self.heatmap(k).is_none()) {
            return Err(ScanError::InvalidTransition {
                from: self.status(),
                to: ScanStatus::Complete,
            });
        }
        self.transition(ScanStatus::Complete, &[ScanStatus::Scanning])?;
        self.lifecycle.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Any non-terminal state `-> Failed`.
    ///
    /// # Errors
    ///
    /// [`ScanError::InvalidTransition`] if the job already finished.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), ScanError> {
        self.transition(
            ScanStatus::Failed,
            &[ScanStatus::Pending, ScanStatus::Scanning],
        )?;
        self.lifecycle.error_message = Some(reason.into());
        self.lifecycle.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Any non-terminal state `-> Cancelled`.
    ///
    /// # Errors
    ///
    /// [`ScanError::InvalidTransition`] if the job already finished.
    pub fn cancel(&mut self) -> Result<(), ScanError> {
        self.transition(
            ScanStatus::Cancelled,
            &[ScanStatus::Pending, ScanStatus::Scanning],
        )?;
        self.lifecycle.completed_at = Some(Utc::now());
        Ok(())
    }

    fn transition(&mut self, to: ScanStatus, allowed_from: &[ScanStatus]) -> Result<(), ScanError> {
        let from = self.lifecycle.status;
        if !allowed_from.contains(&from) {
            return Err(ScanError::InvalidTransition { from, to });
        }
        tracing::debug!(job_id = %self.id, %from, %to, "scan transition");
        self.lifecycle.status = to;
        Ok(())
    }

    #[must_use]
    pub fn grid(&self, keyword: &str) -> Option<&KeywordGrid> {
        self.grids.iter().find(|g| g.keyword == keyword)
    }

    #[must_use]
    pub fn heatmap(&self, keyword: &str) -> Option<&HeatmapData> {
        self.heatmaps.iter().find(|h| h.keyword == keyword)
    }

    #[must_use]
    pub fn has_keyword(&self, keyword: &str) -> bool {
        self.config.keywords.iter().any(|k| k == keyword)
    }

    /// Appends `observation` to the ledger and writes its result into the
    /// keyword's grid point. Observations for unknown keywords or positions
    /// are still kept in the ledger.
    pub fn record_observation(&mut self, observation: RankObservation) {
        if let Some(point) = self
            .grids
            .iter_mut()
            .find(|g| g.keyword == observation.keyword)
            .and_then(|g| {
                g.points
                    .iter_mut()
                    .find(|p| p.position == observation.position)
            })
        {
            point.rank = observation.rank;
            point.matched_url.clone_from(&observation.matched_url);
            point.match_tier = observation.match_tier;
            point.competitors.clone_from(&observation.competitors);
        }
        self.observations.push(observation);
    }

    pub fn keyword_observations<'a>(
        &'a self,
        keyword: &'a str,
    ) -> impl Iterator<Item = &'a RankObservation> + 'a {
        self.observations.iter().filter(move |o| o.keyword == keyword)
    }

    /// Stores `heatmap`, replacing any earlier one for the same keyword.
    pub fn set_heatmap(&mut self, heatmap: HeatmapData) {
        match self
            .heatmaps
            .iter_mut()
            .find(|h| h.keyword == heatmap.keyword)
        {
            Some(existing) => *existing = heatmap,
            None => self.heatmaps.push(heatmap),
        }
    }
}

/// Listing row for a job, without grids or ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub id: Uuid,
    pub account_id: String,
    pub business_name: String,
    pub status: ScanStatus,
    pub progress: ScanProgress,
    pub estimated_cost: Decimal,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&ScanJob> for ScanSummary {
    fn from(job: &ScanJob) -> Self {
        Self {
            id: job.id,
            account_id: job.account_id.clone(),
            business_name: job.business.name.clone(),
            status: job.status(),
            progress: job.progress.clone(),
            estimated_cost: job.estimated_cost,
            created_at: job.created_at(),
            completed_at: job.completed_at(),
        }
    }
}
