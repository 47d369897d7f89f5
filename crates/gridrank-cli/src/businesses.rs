use std::path::{Path, PathBuf};

use clap::Subcommand;
use gridrank_core::Keyword;

#[derive(Debug, Subcommand)]
pub enum BusinessesCommands {
    /// Parse and validate the businesses file
    Validate {
        /// Path to check instead of GRIDRANK_BUSINESSES_PATH
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// List tracked businesses with their slugs and schedules
    List,
}

pub(crate) fn run_validate(path: &Path) -> anyhow::Result<()> {
    let file = gridrank_core::load_businesses(path)?;
    let scheduled = file
        .businesses
        .iter()
        .filter(|b| b.rescan_cron.is_some())
        .count();
    println!(
        "{}: {} businesses ok ({scheduled} with scheduled re-scans)",
        path.display(),
        file.businesses.len()
    );
    Ok(())
}

pub(crate) fn run_list(path: &Path) -> anyhow::Result<()> {
    let file = gridrank_core::load_businesses(path)?;
    if file.businesses.is_empty() {
        println!("no businesses configured in {}", path.display());
        return Ok(());
    }

    println!("{:<28}{:<6}{:<9}{:<10}RESCAN", "SLUG", "GRID", "RADIUS", "KEYWORDS");
    for business in &file.businesses {
        println!(
            "{:<28}{:<6}{:<9}{:<10}{}",
            business.slug(),
            business.grid_size.to_string(),
            format!("{} km", business.radius_km),
            Keyword::active_texts(&business.keywords).len(),
            business.rescan_cron.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
