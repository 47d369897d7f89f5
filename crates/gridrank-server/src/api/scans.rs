use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use gridrank_core::{BusinessIdentity, HeatmapData, ScanConfig, ScanProgress, ScanStatus};
use gridrank_scan::{ScanJob, ScanRequest, ScanSummary};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::middleware::RequestId;

use super::{map_scan_error, normalize_limit, ApiError, ApiResponse, AppState, ResponseMeta};

#[derive(Debug, Deserialize)]
pub(super) struct ScansQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(super) struct EstimateQuery {
    pub points: u32,
    pub keywords: u32,
}

#[derive(Debug, Serialize)]
pub(super) struct ScanAccepted {
    scan_id: Uuid,
    status: ScanStatus,
}

#[derive(Debug, Serialize)]
pub(super) struct CostEstimate {
    points: u32,
    keywords: u32,
    estimated_cost: Decimal,
}

#[derive(Debug, Serialize)]
pub(super) struct KeywordResult {
    keyword: String,
    ready: bool,
    visibility_score: Option<f64>,
    average_rank: Option<f64>,
}

#[derive(Debug, Serialize)]
pub(super) struct ScanDetail {
    scan_id: Uuid,
    account_id: String,
    business: BusinessIdentity,
    config: ScanConfig,
    status: ScanStatus,
    progress: ScanProgress,
    estimated_cost: Decimal,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    keywords: Vec<KeywordResult>,
}

impl From<ScanJob> for ScanDetail {
    fn from(job: ScanJob) -> Self {
        let keywords = job
            .config
            .keywords
            .iter()
            .map(|keyword| {
                let heatmap = job.heatmap(keyword);
                KeywordResult {
                    keyword: keyword.clone(),
                    ready: heatmap.is_some(),
                    visibility_score: heatmap.map(|h| h.visibility_score),
                    average_rank: heatmap.map(|h| h.average_rank),
                }
            })
            .collect();

        Self {
            scan_id: job.id,
            status: job.status(),
            error_message: job.error_message().map(ToOwned::to_owned),
            created_at: job.created_at(),
            started_at: job.started_at(),
            completed_at: job.completed_at(),
            keywords,
            account_id: job.account_id,
            business: job.business,
            config: job.config,
            progress: job.progress,
            estimated_cost: job.estimated_cost,
        }
    }
}

pub(super) async fn create_scan(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(body): Json<ScanRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ScanAccepted>>), ApiError> {
    let scan_id = state
        .scans
        .start_scan(body)
        .await
        .map_err(|e| map_scan_error(req_id.0.clone(), &e))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse {
            data: ScanAccepted {
                scan_id,
                status: ScanStatus::Pending,
            },
            meta: ResponseMeta::new(req_id.0),
        }),
    ))
}

pub(super) async fn list_scans(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<ScansQuery>,
) -> Result<Json<ApiResponse<Vec<ScanSummary>>>, ApiError> {
    let data = state
        .scans
        .list_scans(normalize_limit(query.limit))
        .await
        .map_err(|e| map_scan_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data,
        meta: ResponseMeta::new(req_id.0),
    }))
}

pub(super) async fn estimate_scan(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<EstimateQuery>,
) -> Json<ApiResponse<CostEstimate>> {
    Json(ApiResponse {
        data: CostEstimate {
            points: query.points,
            keywords: query.keywords,
            estimated_cost: state.scans.estimate_cost(query.points, query.keywords),
        },
        meta: ResponseMeta::new(req_id.0),
    })
}

pub(super) async fn get_scan(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(scan_id): Path<Uuid>,
) -> Result<Json<ApiResponse<ScanDetail>>, ApiError> {
    let job = state
        .scans
        .get_scan_status(scan_id)
        .await
        .map_err(|e| map_scan_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: ScanDetail::from(job),
        meta: ResponseMeta::new(req_id.0),
    }))
}

pub(super) async fn get_heatmap(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path((scan_id, keyword)): Path<(Uuid, String)>,
) -> Result<Json<ApiResponse<HeatmapData>>, ApiError> {
    let data = state
        .scans
        .get_heatmap(scan_id, &keyword)
        .await
        .map_err(|e| map_scan_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data,
        meta: ResponseMeta::new(req_id.0),
    }))
}

pub(super) async fn cancel_scan(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(scan_id): Path<Uuid>,
) -> Result<(StatusCode, Json<ApiResponse<ScanAccepted>>), ApiError> {
    state
        .scans
        .cancel_scan(scan_id)
        .await
        .map_err(|e| map_scan_error(req_id.0.clone(), &e))?;

    // A running scan stops at its next batch boundary, so report what the
    // store holds now.
    let status = state
        .scans
        .get_scan_status(scan_id)
        .await
        .map_err(|e| map_scan_error(req_id.0.clone(), &e))?
        .status();

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse {
            data: ScanAccepted { scan_id, status },
            meta: ResponseMeta::new(req_id.0),
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridrank_core::{Coordinate, GridSize};

    #[test]
    fn scan_detail_lists_keyword_readiness() {
        let job = ScanJob::create(
            "acct-1".to_string(),
            BusinessIdentity::new("Joe's Pizza", Coordinate::new(40.7306, -74.0027)),
            ScanConfig {
                grid_size: GridSize::Three,
                radius_km: 1.0,
                keywords: vec!["pizza".to_string(), "slice".to_string()],
            },
            Decimal::new(36, 3),
        );

        let detail = ScanDetail::from(job);
        let json = serde_json::to_value(&detail).expect("serialize detail");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["keywords"].as_array().map(Vec::len), Some(2));
        assert_eq!(json["keywords"][0]["ready"], false);
        assert!(json["keywords"][0]["visibility_score"].is_null());
        assert_eq!(json["config"]["grid_size"], 3);
    }
}
