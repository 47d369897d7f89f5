//! Scan command handlers.
//!
//! `scan run` drives the engine in-process against the configured provider
//! with an in-memory store, so it needs no database. `status` and `list`
//! read jobs persisted by the server.

use std::sync::Arc;

use clap::Subcommand;
use gridrank_core::{
    AppConfig, BusinessConfig, GridSize, HeatmapData, ScanConfig, ScanProgress, ScanStatus,
};
use gridrank_provider::MapsClient;
use gridrank_scan::{
    generate_grid, MemoryScanStore, MemoryUsageLedger, ScanEvent, ScanRequest, ScanService,
    ScanSettings,
};
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

/// Account charged for in-process scans. Its ledger lives only for the run.
const CLI_ACCOUNT: &str = "cli";

#[derive(Debug, Subcommand)]
pub enum ScanCommands {
    /// Scan one tracked business now and print its heatmaps
    Run {
        /// Business slug from the businesses file
        #[arg(long)]
        business: String,

        /// Keyword to scan instead of the configured ones (repeatable)
        #[arg(long)]
        keyword: Vec<String>,

        /// Grid side length (3, 5, 7 or 9)
        #[arg(long, value_parser = parse_grid_size)]
        grid_size: Option<GridSize>,

        /// Grid radius in kilometres
        #[arg(long)]
        radius_km: Option<f64>,

        /// Print the sample points and cost without querying the provider
        #[arg(long)]
        dry_run: bool,

        /// Print heatmaps as JSON
        #[arg(long)]
        json: bool,
    },
    /// Estimate the provider cost of a scan
    Estimate {
        /// Take grid size and keyword count from a tracked business
        #[arg(long, conflicts_with_all = ["grid_size", "keywords"])]
        business: Option<String>,

        #[arg(long, value_parser = parse_grid_size, default_value = "5")]
        grid_size: GridSize,

        #[arg(long, default_value_t = 1)]
        keywords: u32,
    },
    /// Show a persisted scan job
    Status { scan_id: Uuid },
    /// List recent persisted scan jobs
    List {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

pub(crate) fn parse_grid_size(value: &str) -> Result<GridSize, String> {
    let side: u8 = value
        .trim()
        .parse()
        .map_err(|_| format!("'{value}' is not a number"))?;
    GridSize::try_from(side)
}

/// Command-line replacements for a business's configured scan settings.
#[derive(Debug, Default)]
pub(crate) struct ScanOverrides {
    pub keywords: Vec<String>,
    pub grid_size: Option<GridSize>,
    pub radius_km: Option<f64>,
}

impl ScanOverrides {
    pub(crate) fn apply(&self, business: &BusinessConfig) -> ScanConfig {
        let mut config = business.scan_config();
        if !self.keywords.is_empty() {
            config.keywords.clone_from(&self.keywords);
        }
        if let Some(grid_size) = self.grid_size {
            config.grid_size = grid_size;
        }
        if let Some(radius_km) = self.radius_km {
            config.radius_km = radius_km;
        }
        config
    }
}

fn find_business(config: &AppConfig, slug: &str) -> anyhow::Result<BusinessConfig> {
    let file = gridrank_core::load_businesses(&config.businesses_path)?;
    file.find_by_slug(slug).cloned().ok_or_else(|| {
        anyhow::anyhow!(
            "business '{slug}' not found in {}",
            config.businesses_path.display()
        )
    })
}

/// Scan a tracked business and print one heatmap per keyword.
///
/// # Errors
///
/// Returns an error if the business is unknown, the scan configuration is
/// invalid, the provider client cannot be built, or the scan fails.
/// Individual point failures are recorded as unranked points, not errors.
pub(crate) async fn run_scan(
    config: &AppConfig,
    slug: &str,
    overrides: ScanOverrides,
    dry_run: bool,
    json: bool,
) -> anyhow::Result<()> {
    let business = find_business(config, slug)?;
    let scan_config = overrides.apply(&business);
    scan_config.validate()?;
    let settings = ScanSettings::from_config(config);

    if dry_run {
        print_dry_run(&business, &scan_config, &settings);
        return Ok(());
    }

    let provider = MapsClient::from_config(config)
        .map_err(|e| anyhow::anyhow!("failed to build provider client: {e}"))?;
    let service = ScanService::new(
        Arc::new(provider),
        Arc::new(MemoryScanStore::new()),
        Arc::new(MemoryUsageLedger::with_allowance(CLI_ACCOUNT, 1)),
        settings,
    );
    let workers = service.spawn_workers();
    let mut events = service.subscribe();

    let job_id = service
        .start_scan(ScanRequest {
            account_id: CLI_ACCOUNT.to_string(),
            business: business.identity(),
            config: scan_config.clone(),
        })
        .await?;
    println!(
        "scanning {} ({} grid, {} km, {} keywords) as job {job_id}",
        business.name,
        scan_config.grid_size,
        scan_config.radius_km,
        scan_config.keywords.len()
    );

    let point_count = scan_config.point_count();
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let mut interrupted = false;

    loop {
        tokio::select! {
            result = &mut interrupt, if !interrupted => {
                interrupted = true;
                result?;
                eprintln!("interrupt received, cancelling scan");
                if let Err(e) = service.cancel_scan(job_id).await {
                    tracing::warn!(%job_id, error = %e, "cancel request rejected");
                }
            }
            received = events.recv() => match received {
                Ok(event) if event.job_id() == job_id => {
                    print_event(&event, point_count);
                    if event.is_terminal() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "progress output fell behind");
                }
                Err(RecvError::Closed) => anyhow::bail!("scan event stream closed"),
            },
        }
    }

    let job = service.get_scan_status(job_id).await?;
    service.shutdown().await;
    for worker in workers {
        worker.await?;
    }

    match job.status() {
        ScanStatus::Complete => {}
        ScanStatus::Failed => anyhow::bail!(
            "scan {job_id} failed: {}",
            job.error_message().unwrap_or("unknown error")
        ),
        status => {
            println!("scan {job_id} ended as {status}");
            return Ok(());
        }
    }

    let heatmaps: Vec<&HeatmapData> = job
        .config
        .keywords
        .iter()
        .filter_map(|keyword| job.heatmap(keyword))
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&heatmaps)?);
        return Ok(());
    }

    for heatmap in heatmaps {
        println!();
        println!(
            "{}: visibility {:.1}, average rank {:.1}, {}/{} ranking, {} in top 3",
            heatmap.keyword,
            heatmap.visibility_score,
            heatmap.average_rank,
            heatmap.points_ranking,
            heatmap.total_points,
            heatmap.top3_count
        );
        println!("{}", render_grid(heatmap, job.config.grid_size));
    }
    Ok(())
}

fn print_event(event: &ScanEvent, point_count: u32) {
    match event {
        ScanEvent::Started { total_keywords, .. } => {
            println!("started: {total_keywords} keywords x {point_count} points");
        }
        ScanEvent::Progress { progress, .. } => print_progress(progress, point_count),
        ScanEvent::KeywordCompleted {
            keyword,
            visibility_score,
            ..
        } => println!("  {keyword}: done, visibility {visibility_score:.1}"),
        ScanEvent::Failed { error, .. } => eprintln!("scan failed: {error}"),
        ScanEvent::Queued { .. } | ScanEvent::Completed { .. } | ScanEvent::Cancelled { .. } => {
            tracing::debug!(event = event.name(), "scan event");
        }
    }
}

fn print_progress(progress: &ScanProgress, point_count: u32) {
    if let Some(keyword) = &progress.current_keyword {
        println!(
            "  [{}/{}] {keyword}: {}/{point_count} points",
            progress.current_keyword_index + 1,
            progress.total_keywords,
            progress.points_completed
        );
    }
}

fn print_dry_run(business: &BusinessConfig, config: &ScanConfig, settings: &ScanSettings) {
    let keyword_count = u32::try_from(config.keywords.len()).unwrap_or(u32::MAX);
    let cost = gridrank_core::estimate_cost(
        config.point_count(),
        keyword_count,
        settings.cost_per_query,
    );
    println!(
        "dry-run: would scan {} with a {} grid over {} km for [{}]",
        business.name,
        config.grid_size,
        config.radius_km,
        config.keywords.join(", ")
    );
    println!(
        "{} queries, estimated cost {cost}",
        config.point_count() * keyword_count
    );
    println!();
    println!("{:<5}{:<24}DISTANCE", "POS", "COORDINATE");
    for point in generate_grid(
        business.identity().coordinate,
        config.grid_size,
        config.radius_km,
    ) {
        println!(
            "{:<5}{:<24}{:.2} km",
            point.position,
            format!("{:.6},{:.6}", point.coordinate.lat, point.coordinate.lng),
            point.distance_km
        );
    }
}

/// Lays ranks out as the lattice, north row first. Unranked points print as `-`.
pub(crate) fn render_grid(heatmap: &HeatmapData, grid_size: GridSize) -> String {
    let mut points: Vec<_> = heatmap.points.iter().collect();
    points.sort_by_key(|p| p.position);
    points
        .chunks(grid_size.side() as usize)
        .map(|row| {
            row.iter()
                .map(|p| match p.rank {
                    Some(rank) => format!("{rank:>4}"),
                    None => format!("{:>4}", "-"),
                })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Print the provider cost of a scan.
///
/// # Errors
///
/// Returns an error if `business` is given and cannot be found.
pub(crate) fn run_estimate(
    config: &AppConfig,
    business: Option<&str>,
    grid_size: GridSize,
    keywords: u32,
) -> anyhow::Result<()> {
    let (grid_size, keywords) = match business {
        Some(slug) => {
            let scan_config = find_business(config, slug)?.scan_config();
            let count = u32::try_from(scan_config.keywords.len()).unwrap_or(u32::MAX);
            (scan_config.grid_size, count)
        }
        None => (grid_size, keywords),
    };
    let points = grid_size.point_count();
    let cost = gridrank_core::estimate_cost(points, keywords, config.cost_per_query);
    println!(
        "{grid_size} grid x {keywords} keywords = {} queries, estimated cost {cost}",
        points * keywords
    );
    Ok(())
}

/// Print one persisted scan job and its stored heatmap summaries.
///
/// # Errors
///
/// Returns an error if the job does not exist or the query fails.
pub(crate) async fn run_status(pool: &sqlx::PgPool, scan_id: Uuid) -> anyhow::Result<()> {
    let job = gridrank_db::get_scan_job(pool, scan_id).await?;
    let heatmaps = gridrank_db::list_scan_heatmaps(pool, scan_id).await?;
    let progress: ScanProgress = serde_json::from_value(job.progress.clone()).unwrap_or_default();

    println!("Scan: {}", job.id);
    println!("Business: {}", business_name(&job.business));
    println!("Account: {}", job.account_id);
    println!(
        "Grid: {0}x{0}, {1} km, keywords [{2}]",
        job.grid_size,
        job.radius_km,
        job.keywords.join(", ")
    );
    println!("Status: {}", job.status);
    println!(
        "Progress: keyword {}/{}, {} points done",
        (progress.current_keyword_index + 1).min(progress.total_keywords.max(1)),
        progress.total_keywords,
        progress.points_completed
    );
    println!("Estimated cost: {}", job.estimated_cost);
    if let Some(error) = &job.error_message {
        println!("Error: {error}");
    }

    if !heatmaps.is_empty() {
        println!();
        println!("{:<32}{:>12}{:>10}", "KEYWORD", "VISIBILITY", "AVG RANK");
        for heatmap in heatmaps {
            println!(
                "{:<32}{:>12.1}{:>10.1}",
                heatmap.keyword, heatmap.visibility_score, heatmap.average_rank
            );
        }
    }
    Ok(())
}

/// Print the most recent persisted scan jobs, newest first.
///
/// # Errors
///
/// Returns an error if the query fails.
pub(crate) async fn run_list(pool: &sqlx::PgPool, limit: i64) -> anyhow::Result<()> {
    let jobs = gridrank_db::list_scan_jobs(pool, limit.clamp(1, 200)).await?;
    if jobs.is_empty() {
        println!("no scans recorded");
        return Ok(());
    }

    println!(
        "{:<38}{:<11}{:<28}{:<6}CREATED",
        "ID", "STATUS", "BUSINESS", "GRID"
    );
    for job in jobs {
        let mut name = business_name(&job.business).to_string();
        if name.chars().count() > 26 {
            name = format!("{}...", name.chars().take(23).collect::<String>());
        }
        println!(
            "{:<38}{:<11}{:<28}{:<6}{}",
            job.id,
            job.status,
            name,
            format!("{0}x{0}", job.grid_size),
            job.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

fn business_name(business: &serde_json::Value) -> &str {
    business
        .get("name")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("(unnamed)")
}
