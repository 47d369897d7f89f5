//! Per-account scan allowances in `usage_allowances`.

use sqlx::PgPool;

use crate::DbError;

/// Scans left for `account_id`. Accounts without a row have none.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_remaining_allowance(pool: &PgPool, account_id: &str) -> Result<i64, DbError> {
    let remaining = sqlx::query_scalar::<_, i64>(
        "SELECT remaining FROM usage_allowances WHERE account_id = $1",
    )
    .bind(account_id)
    .fetch_optional(pool)
    .await?;

    Ok(remaining.unwrap_or(0))
}

/// Atomically subtracts `units` and returns the new balance.
///
/// # Errors
///
/// Returns [`DbError::InsufficientAllowance`] when the balance is below
/// `units` (nothing is deducted), or [`DbError::Sqlx`] if a query fails.
pub async fn deduct_allowance(pool: &PgPool, account_id: &str, units: i64) -> Result<i64, DbError> {
    let remaining = sqlx::query_scalar::<_, i64>(
        "UPDATE usage_allowances \
         SET remaining = remaining - $2, updated_at = NOW() \
         WHERE account_id = $1 AND remaining >= $2 \
         RETURNING remaining",
    )
    .bind(account_id)
    .bind(units)
    .fetch_optional(pool)
    .await?;

    match remaining {
        Some(remaining) => Ok(remaining),
        None => Err(DbError::InsufficientAllowance {
            account_id: account_id.to_string(),
            remaining: get_remaining_allowance(pool, account_id).await?,
        }),
    }
}

/// Adds `units` to an account, creating it if needed. Returns the new
/// balance.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn grant_allowance(pool: &PgPool, account_id: &str, units: i64) -> Result<i64, DbError> {
    let remaining = sqlx::query_scalar::<_, i64>(
        "INSERT INTO usage_allowances (account_id, remaining) \
         VALUES ($1, $2) \
         ON CONFLICT (account_id) DO UPDATE SET \
             remaining  = usage_allowances.remaining + EXCLUDED.remaining, \
             updated_at = NOW() \
         RETURNING remaining",
    )
    .bind(account_id)
    .bind(units)
    .fetch_one(pool)
    .await?;

    Ok(remaining)
}
