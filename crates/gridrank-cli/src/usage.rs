use clap::Subcommand;

#[derive(Debug, Subcommand)]
pub enum UsageCommands {
    /// Show the scans an account has left
    Show {
        #[arg(long)]
        account: String,
    },
    /// Add scans to an account's allowance
    Grant {
        #[arg(long)]
        account: String,

        #[arg(long, value_parser = clap::value_parser!(i64).range(1..))]
        units: i64,
    },
}

pub(crate) async fn run_show(pool: &sqlx::PgPool, account: &str) -> anyhow::Result<()> {
    let remaining = gridrank_db::get_remaining_allowance(pool, account).await?;
    println!("{account}: {remaining} scans remaining");
    Ok(())
}

pub(crate) async fn run_grant(pool: &sqlx::PgPool, account: &str, units: i64) -> anyhow::Result<()> {
    let remaining = gridrank_db::grant_allowance(pool, account, units).await?;
    tracing::info!(account, units, remaining, "allowance granted");
    println!("{account}: granted {units}, {remaining} scans remaining");
    Ok(())
}
