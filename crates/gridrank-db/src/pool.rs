//! Pool setup, migrations, and liveness checks.

use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use gridrank_core::AppConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::DbError;

// Resolved from crates/gridrank-db/Cargo.toml to <workspace-root>/migrations/.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

/// Tables the scan engine cannot run without.
const REQUIRED_TABLES: [&str; 4] = [
    "scan_jobs",
    "scan_points",
    "scan_heatmaps",
    "usage_allowances",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_secs: 10,
        }
    }
}

impl PoolConfig {
    /// Reads `GRIDRANK_DB_*` overrides; unset or unparseable values keep the
    /// defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_connections: env_or("GRIDRANK_DB_MAX_CONNECTIONS", defaults.max_connections),
            min_connections: env_or("GRIDRANK_DB_MIN_CONNECTIONS", defaults.min_connections),
            acquire_timeout_secs: env_or(
                "GRIDRANK_DB_ACQUIRE_TIMEOUT_SECS",
                defaults.acquire_timeout_secs,
            ),
        }
    }

    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_connections: config.db_max_connections,
            min_connections: config.db_min_connections,
            acquire_timeout_secs: config.db_acquire_timeout_secs,
        }
    }

    fn options(self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections.min(self.max_connections))
            .acquire_timeout(Duration::from_secs(self.acquire_timeout_secs))
    }
}

fn env_or<T: FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

/// # Errors
///
/// Returns [`sqlx::Error`] if the connection cannot be established.
pub async fn connect_pool(database_url: &str, config: PoolConfig) -> Result<PgPool, sqlx::Error> {
    config.options().connect(database_url).await
}

/// Connects with `DATABASE_URL` and [`PoolConfig::from_env`].
///
/// # Errors
///
/// [`DbError::MissingDatabaseUrl`] if `DATABASE_URL` is unset, otherwise
/// [`DbError::Sqlx`] on connection failure.
pub async fn connect_pool_from_env() -> Result<PgPool, DbError> {
    let database_url =
        std::env::var("DATABASE_URL").map_err(|_| DbError::MissingDatabaseUrl)?;
    Ok(connect_pool(&database_url, PoolConfig::from_env()).await?)
}

/// Applies pending migrations and returns how many ran.
///
/// # Errors
///
/// Returns [`sqlx::migrate::MigrateError`] if any migration fails.
pub async fn run_migrations(pool: &PgPool) -> Result<usize, sqlx::migrate::MigrateError> {
    let applied = applied_versions(pool).await;
    let pending = MIGRATOR
        .iter()
        .filter(|m| !m.migration_type.is_down_migration() && !applied.contains(&m.version))
        .count();
    MIGRATOR.run(pool).await?;
    Ok(pending)
}

/// Versions recorded as applied. Empty on a fresh database, where
/// `_sqlx_migrations` does not exist yet.
async fn applied_versions(pool: &PgPool) -> HashSet<i64> {
    sqlx::query_scalar::<_, i64>("SELECT version FROM _sqlx_migrations WHERE success")
        .fetch_all(pool)
        .await
        .map(|versions| versions.into_iter().collect())
        .unwrap_or_default()
}

/// # Errors
///
/// Returns [`sqlx::Error`] if the round trip fails.
pub async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Pings the pool and checks that the scan tables exist.
///
/// # Errors
///
/// [`DbError::Sqlx`] if the database is unreachable, or
/// [`DbError::SchemaMissing`] naming the first absent table.
pub async fn health_check(pool: &PgPool) -> Result<(), DbError> {
    ping(pool).await?;
    for table in REQUIRED_TABLES {
        let present: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(table)
            .fetch_one(pool)
            .await?;
        if !present {
            return Err(DbError::SchemaMissing(table));
        }
    }
    Ok(())
}
