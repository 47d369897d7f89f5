mod businesses;
mod scan;
mod usage;

use clap::{Parser, Subcommand};

use crate::businesses::BusinessesCommands;
use crate::scan::ScanCommands;
use crate::usage::UsageCommands;

#[derive(Debug, Parser)]
#[command(name = "gridrank-cli")]
#[command(about = "Local rank grid scanner command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Database operations
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// Run, price, and inspect grid scans
    Scan {
        #[command(subcommand)]
        command: ScanCommands,
    },
    /// Inspect the tracked businesses file
    Businesses {
        #[command(subcommand)]
        command: BusinessesCommands,
    },
    /// Manage per-account scan allowances
    Usage {
        #[command(subcommand)]
        command: UsageCommands,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    /// Check database connectivity
    Ping,
    /// Apply pending migrations
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("gridrank-cli: use --help to list commands");
        return Ok(());
    };

    let config = gridrank_core::load_app_config()?;

    match command {
        Commands::Db { command } => {
            let pool = connect(&config).await?;
            match command {
                DbCommands::Ping => {
                    gridrank_db::ping(&pool).await?;
                    println!("database ok");
                }
                DbCommands::Migrate => {
                    let applied = gridrank_db::run_migrations(&pool).await?;
                    println!("applied {applied} migrations");
                }
            }
        }
        Commands::Scan { command } => match command {
            ScanCommands::Run {
                business,
                keyword,
                grid_size,
                radius_km,
                dry_run,
                json,
            } => {
                scan::run_scan(
                    &config,
                    &business,
                    scan::ScanOverrides {
                        keywords: keyword,
                        grid_size,
                        radius_km,
                    },
                    dry_run,
                    json,
                )
                .await?;
            }
            ScanCommands::Estimate {
                business,
                grid_size,
                keywords,
            } => {
                scan::run_estimate(&config, business.as_deref(), grid_size, keywords)?;
            }
            ScanCommands::Status { scan_id } => {
                let pool = connect(&config).await?;
                scan::run_status(&pool, scan_id).await?;
            }
            ScanCommands::List { limit } => {
                let pool = connect(&config).await?;
                scan::run_list(&pool, limit).await?;
            }
        },
        Commands::Businesses { command } => match command {
            BusinessesCommands::Validate { path } => {
                businesses::run_validate(path.as_deref().unwrap_or(&config.businesses_path))?;
            }
            BusinessesCommands::List => {
                businesses::run_list(&config.businesses_path)?;
            }
        },
        Commands::Usage { command } => {
            let pool = connect(&config).await?;
            match command {
                UsageCommands::Show { account } => usage::run_show(&pool, &account).await?,
                UsageCommands::Grant { account, units } => {
                    usage::run_grant(&pool, &account, units).await?;
                }
            }
        }
    }

    Ok(())
}

async fn connect(config: &gridrank_core::AppConfig) -> anyhow::Result<sqlx::PgPool> {
    let pool = gridrank_db::connect_pool(
        &config.database_url,
        gridrank_db::PoolConfig::from_app_config(config),
    )
    .await?;
    Ok(pool)
}
