//! Live integration tests for gridrank-db using `#[sqlx::test]`.
//!
//! Each test gets a fresh, fully-migrated Postgres database spun up by the
//! sqlx test harness. The `migrations` path is relative to the crate root
//! (`crates/gridrank-db/`), so `"../../migrations"` resolves to the workspace
//! migration directory.

use chrono::Utc;
use gridrank_db::{
    cancel_scan_job, complete_scan_job, deduct_allowance, fail_scan_job, get_remaining_allowance,
    get_scan_job, get_scan_job_status, grant_allowance, insert_scan_job, list_scan_heatmaps,
    list_scan_jobs, list_scan_points, list_unfinished_scan_jobs, mark_scan_job_scanning, upsert_scan_heatmap,
    upsert_scan_points, DbError, NewScanJob, NewScanPoint,
};
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn insert_test_job(pool: &sqlx::PgPool) -> Uuid {
    let keywords = vec!["pizza".to_string(), "slice".to_string()];
    let job = NewScanJob {
        id: Uuid::new_v4(),
        account_id: "acct-1",
        business: json!({"name": "Joe's Pizza", "coordinate": {"lat": 40.7306, "lng": -74.0027}}),
        grid_size: 3,
        radius_km: 2.0,
        keywords: &keywords,
        progress: json!({"current_keyword_index": 0, "total_keywords": 2}),
        estimated_cost: Decimal::new(36, 3),
        created_at: Utc::now(),
    };
    insert_scan_job(pool, &job)
        .await
        .unwrap_or_else(|e| panic!("insert_scan_job failed: {e}"))
        .id
}

fn point(position: i32, rank: Option<i32>) -> NewScanPoint {
    NewScanPoint {
        position,
        latitude: 40.73,
        longitude: -74.0,
        distance_km: 1.0,
        rank,
        matched_url: rank.map(|_| "https://joespizza.com/".to_string()),
        match_tier: rank.map(|_| "domain".to_string()),
        competitors: json!([]),
    }
}

// ---------------------------------------------------------------------------
// Section 1: Scan job lifecycle
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn scan_job_lifecycle_pending_to_complete(pool: sqlx::PgPool) {
    let id = insert_test_job(&pool).await;
    let row = get_scan_job(&pool, id).await.expect("get_scan_job failed");
    assert_eq!(row.status, "pending");
    assert_eq!(row.keywords, vec!["pizza", "slice"]);
    assert_eq!(row.estimated_cost, Decimal::new(36, 3));

    let started = Utc::now();
    let progress = json!({"points_completed": 5});
    mark_scan_job_scanning(&pool, id, started, &progress)
        .await
        .expect("mark scanning failed");
    // A second progress write keeps the original start time.
    mark_scan_job_scanning(&pool, id, Utc::now(), &json!({"points_completed": 9}))
        .await
        .expect("progress update failed");

    complete_scan_job(&pool, id, Utc::now(), &json!({"points_completed": 9}))
        .await
        .expect("complete failed");

    let row = get_scan_job(&pool, id).await.expect("get_scan_job failed");
    assert_eq!(row.status, "complete");
    assert_eq!(
        row.started_at.map(|t| t.timestamp_micros()),
        Some(started.timestamp_micros())
    );
    assert!(row.completed_at.is_some());
    assert_eq!(row.progress["points_completed"], 9);
}

#[sqlx::test(migrations = "../../migrations")]
async fn terminal_jobs_reject_further_transitions(pool: sqlx::PgPool) {
    let id = insert_test_job(&pool).await;
    cancel_scan_job(&pool, id, Utc::now(), &json!({}))
        .await
        .expect("cancel failed");

    let err = mark_scan_job_scanning(&pool, id, Utc::now(), &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidScanTransition { .. }));

    let err = fail_scan_job(&pool, id, "late failure", Utc::now(), &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::InvalidScanTransition { .. }));

    assert_eq!(
        get_scan_job_status(&pool, id).await.unwrap().as_deref(),
        Some("cancelled")
    );
}

#[sqlx::test(migrations = "../../migrations")]
async fn complete_requires_a_running_job(pool: sqlx::PgPool) {
    let id = insert_test_job(&pool).await;
    let err = complete_scan_job(&pool, id, Utc::now(), &json!({}))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DbError::InvalidScanTransition {
            expected_status: "scanning",
            ..
        }
    ));
}

#[sqlx::test(migrations = "../../migrations")]
async fn failed_job_keeps_its_reason(pool: sqlx::PgPool) {
    let id = insert_test_job(&pool).await;
    mark_scan_job_scanning(&pool, id, Utc::now(), &json!({}))
        .await
        .unwrap();
    fail_scan_job(&pool, id, "connection reset", Utc::now(), &json!({}))
        .await
        .unwrap();

    let row = get_scan_job(&pool, id).await.unwrap();
    assert_eq!(row.status, "failed");
    assert_eq!(row.error_message.as_deref(), Some("connection reset"));
}

#[sqlx::test(migrations = "../../migrations")]
async fn unknown_job_is_not_found(pool: sqlx::PgPool) {
    let id = Uuid::new_v4();
    assert!(matches!(
        get_scan_job(&pool, id).await,
        Err(DbError::NotFound)
    ));
    assert!(get_scan_job_status(&pool, id).await.unwrap().is_none());
}

#[sqlx::test(migrations = "../../migrations")]
async fn list_scan_jobs_is_newest_first(pool: sqlx::PgPool) {
    let first = insert_test_job(&pool).await;
    let second = insert_test_job(&pool).await;

    let rows = list_scan_jobs(&pool, 10).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].id, second);
    assert_eq!(rows[1].id, first);

    assert_eq!(list_scan_jobs(&pool, 1).await.unwrap().len(), 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn unfinished_jobs_exclude_terminal_ones(pool: sqlx::PgPool) {
    let queued = insert_test_job(&pool).await;
    let running = insert_test_job(&pool).await;
    let done = insert_test_job(&pool).await;
    mark_scan_job_scanning(&pool, running, Utc::now(), &json!({}))
        .await
        .unwrap();
    cancel_scan_job(&pool, done, Utc::now(), &json!({}))
        .await
        .unwrap();

    let rows = list_unfinished_scan_jobs(&pool).await.unwrap();
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![queued, running]);
    assert_eq!(rows[1].status, "scanning");
}

// ---------------------------------------------------------------------------
// Section 2: Points and heatmaps
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn point_upsert_overwrites_by_position(pool: sqlx::PgPool) {
    let id = insert_test_job(&pool).await;

    let written = upsert_scan_points(&pool, id, "pizza", &[point(1, None), point(2, Some(4))])
        .await
        .unwrap();
    assert_eq!(written, 2);

    upsert_scan_points(&pool, id, "pizza", &[point(1, Some(2))])
        .await
        .unwrap();
    upsert_scan_points(&pool, id, "slice", &[point(1, None)])
        .await
        .unwrap();
    assert_eq!(upsert_scan_points(&pool, id, "pizza", &[]).await.unwrap(), 0);

    let rows = list_scan_points(&pool, id).await.unwrap();
    assert_eq!(rows.len(), 3);
    let pizza: Vec<_> = rows.iter().filter(|r| r.keyword == "pizza").collect();
    assert_eq!(pizza[0].position, 1);
    assert_eq!(pizza[0].rank, Some(2));
    assert_eq!(pizza[0].match_tier.as_deref(), Some("domain"));
    assert_eq!(pizza[1].rank, Some(4));
}

#[sqlx::test(migrations = "../../migrations")]
async fn heatmap_upsert_replaces_payload(pool: sqlx::PgPool) {
    let id = insert_test_job(&pool).await;

    upsert_scan_heatmap(&pool, id, "pizza", 10.0, 3.0, &json!({"keyword": "pizza", "v": 1}))
        .await
        .unwrap();
    upsert_scan_heatmap(&pool, id, "pizza", 55.5, 2.0, &json!({"keyword": "pizza", "v": 2}))
        .await
        .unwrap();

    let rows = list_scan_heatmaps(&pool, id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!((rows[0].visibility_score - 55.5).abs() < f64::EPSILON);
    assert_eq!(rows[0].payload["v"], 2);
}

// ---------------------------------------------------------------------------
// Section 3: Usage allowances
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn deduct_is_refused_when_short(pool: sqlx::PgPool) {
    assert_eq!(get_remaining_allowance(&pool, "acct-1").await.unwrap(), 0);

    assert_eq!(grant_allowance(&pool, "acct-1", 2).await.unwrap(), 2);
    assert_eq!(grant_allowance(&pool, "acct-1", 1).await.unwrap(), 3);

    assert_eq!(deduct_allowance(&pool, "acct-1", 2).await.unwrap(), 1);
    let err = deduct_allowance(&pool, "acct-1", 2).await.unwrap_err();
    assert!(matches!(
        err,
        DbError::InsufficientAllowance { remaining: 1, .. }
    ));
    assert_eq!(get_remaining_allowance(&pool, "acct-1").await.unwrap(), 1);

    let err = deduct_allowance(&pool, "nobody", 1).await.unwrap_err();
    assert!(matches!(
        err,
        DbError::InsufficientAllowance { remaining: 0, .. }
    ));
}
