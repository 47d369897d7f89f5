mod api;
mod middleware;
mod scheduler;
mod store;

use std::sync::Arc;

use gridrank_provider::MapsClient;
use gridrank_scan::{ScanService, ScanSettings};
use tracing_subscriber::EnvFilter;

use crate::{
    api::{build_app, default_rate_limit_state, AppState},
    middleware::AuthState,
    store::{PgScanStore, PgUsageLedger},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = gridrank_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool_config = gridrank_db::PoolConfig::from_app_config(&config);
    let pool = gridrank_db::connect_pool(&config.database_url, pool_config).await?;
    let applied = gridrank_db::run_migrations(&pool).await?;
    tracing::info!(applied, "migrations up to date");

    let scans = ScanService::new(
        Arc::new(MapsClient::from_config(&config)?),
        Arc::new(PgScanStore::new(pool.clone())),
        Arc::new(PgUsageLedger::new(pool.clone())),
        ScanSettings::from_config(&config),
    );
    let workers = scans.spawn_workers();
    // Single instance: scans still marked running were orphaned by the last process.
    scans.recover().await?;

    let businesses = match gridrank_core::load_businesses(&config.businesses_path) {
        Ok(file) => file.businesses,
        Err(e) => {
            tracing::warn!(error = %e, "no businesses loaded; scheduled re-scans disabled");
            Vec::new()
        }
    };
    let mut scheduler = scheduler::build_scheduler(scans.clone(), &businesses).await?;

    let auth = AuthState::from_env(
        matches!(config.env, gridrank_core::Environment::Development),
        config.api_key_hash_salt.as_deref(),
    )?;
    let app = build_app(
        AppState {
            pool,
            scans: scans.clone(),
        },
        auth,
        default_rate_limit_state(),
    );

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "gridrank server listening");
    let draining = scans.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Cancelling scans ends open event streams so the server can drain.
            draining.shutdown().await;
        })
        .await?;

    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!(error = %e, "scheduler did not shut down cleanly");
    }
    for worker in workers {
        if let Err(e) = worker.await {
            tracing::error!(error = %e, "scan worker panicked");
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
