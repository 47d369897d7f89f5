use crate::app_config::{AppConfig, Device, Environment};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Parsing and validation are decoupled from the process environment so tests
/// can drive them with a plain `HashMap`.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var).map_err(|_| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    macro_rules! parse_num {
        ($var:expr, $default:expr, $ty:ty) => {{
            let raw = or_default($var, $default);
            raw.trim()
                .parse::<$ty>()
                .map_err(|e| ConfigError::InvalidEnvVar {
                    var: $var.to_string(),
                    reason: e.to_string(),
                })
        }};
    }

    let database_url = require("DATABASE_URL")?;
    let env = parse_environment(&or_default("GRIDRANK_ENV", "development"))?;

    let bind_addr = {
        let raw = or_default("GRIDRANK_BIND_ADDR", "0.0.0.0:3000");
        raw.parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar {
                var: "GRIDRANK_BIND_ADDR".to_string(),
                reason: e.to_string(),
            })?
    };
    let log_level = or_default("GRIDRANK_LOG_LEVEL", "info");
    let businesses_path = PathBuf::from(or_default(
        "GRIDRANK_BUSINESSES_PATH",
        "./config/businesses.yaml",
    ));
    let api_key_hash_salt = lookup("GRIDRANK_API_KEY_HASH_SALT").ok();

    let db_max_connections = parse_num!("GRIDRANK_DB_MAX_CONNECTIONS", "10", u32)?;
    let db_min_connections = parse_num!("GRIDRANK_DB_MIN_CONNECTIONS", "1", u32)?;
    let db_acquire_timeout_secs = parse_num!("GRIDRANK_DB_ACQUIRE_TIMEOUT_SECS", "10", u64)?;

    let provider_base_url = or_default(
        "GRIDRANK_PROVIDER_BASE_URL",
        "https://api.mapsrank.example/",
    );
    let provider_api_key = lookup("GRIDRANK_PROVIDER_API_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty());
    let provider_timeout_secs = parse_num!("GRIDRANK_PROVIDER_TIMEOUT_SECS", "30", u64)?;
    let provider_language = or_default("GRIDRANK_PROVIDER_LANGUAGE", "en");
    let provider_device = parse_device(&or_default("GRIDRANK_PROVIDER_DEVICE", "desktop"))?;
    let provider_max_retries = parse_num!("GRIDRANK_PROVIDER_MAX_RETRIES", "2", u32)?;
    let provider_retry_backoff_base_ms =
        parse_num!("GRIDRANK_PROVIDER_RETRY_BACKOFF_BASE_MS", "500", u64)?;

    let scan_batch_size = parse_num!("GRIDRANK_SCAN_BATCH_SIZE", "5", usize)?;
    if scan_batch_size == 0 {
        return Err(ConfigError::InvalidEnvVar {
            var: "GRIDRANK_SCAN_BATCH_SIZE".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    let scan_batch_delay_ms = parse_num!("GRIDRANK_SCAN_BATCH_DELAY_MS", "500", u64)?;

    let match_overlap_threshold = parse_num!("GRIDRANK_MATCH_OVERLAP_THRESHOLD", "0.6", f64)?;
    if !(match_overlap_threshold > 0.0 && match_overlap_threshold <= 1.0) {
        return Err(ConfigError::InvalidEnvVar {
            var: "GRIDRANK_MATCH_OVERLAP_THRESHOLD".to_string(),
            reason: format!("{match_overlap_threshold} is outside (0, 1]"),
        });
    }

    let cost_per_query = parse_num!("GRIDRANK_COST_PER_QUERY", "0.002", rust_decimal::Decimal)?;
    if cost_per_query.is_sign_negative() {
        return Err(ConfigError::InvalidEnvVar {
            var: "GRIDRANK_COST_PER_QUERY".to_string(),
            reason: "must not be negative".to_string(),
        });
    }

    let max_concurrent_scans = parse_num!("GRIDRANK_MAX_CONCURRENT_SCANS", "2", usize)?.max(1);

    Ok(AppConfig {
        database_url,
        env,
        bind_addr,
        log_level,
        businesses_path,
        api_key_hash_salt,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        provider_base_url,
        provider_api_key,
        provider_timeout_secs,
        provider_language,
        provider_device,
        provider_max_retries,
        provider_retry_backoff_base_ms,
        scan_batch_size,
        scan_batch_delay_ms,
        match_overlap_threshold,
        cost_per_query,
        max_concurrent_scans,
    })
}

fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "GRIDRANK_ENV".to_string(),
            reason: format!("unknown environment '{other}'"),
        }),
    }
}

fn parse_device(s: &str) -> Result<Device, ConfigError> {
    match s.trim().to_ascii_lowercase().as_str() {
        "desktop" => Ok(Device::Desktop),
        "mobile" => Ok(Device::Mobile),
        other => Err(ConfigError::InvalidEnvVar {
            var: "GRIDRANK_PROVIDER_DEVICE".to_string(),
            reason: format!("unknown device '{other}'"),
        }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
