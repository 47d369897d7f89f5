//! Retry with exponential back-off and jitter for provider calls.
//!
//! [`retry_with_backoff`] wraps one provider request and retries transient
//! failures (network errors, 429, 5xx). Permanent failures are returned
//! immediately so a bad keyword or malformed payload costs a single call.

use std::future::Future;
use std::time::Duration;

use crate::error::ProviderError;

/// Returns `true` for errors that are worth retrying after a back-off delay.
///
/// **Retriable:**
/// - Network-level failures: timeout, connection reset, 5xx via `reqwest`.
/// - [`ProviderError::RateLimited`]: HTTP 429.
/// - [`ProviderError::UnexpectedStatus`] with a 5xx status.
///
/// **Not retriable:**
/// - [`ProviderError::ApiError`]: the provider rejected the request itself.
/// - [`ProviderError::Deserialize`]: malformed response; retrying won't fix it.
/// - [`ProviderError::InvalidBaseUrl`]: configuration error.
/// - [`ProviderError::UnexpectedStatus`] with a 4xx status.
pub(crate) fn is_retriable(err: &ProviderError) -> bool {
    match err {
        ProviderError::Http(e) => {
            e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
        }
        ProviderError::RateLimited { .. } => true,
        ProviderError::UnexpectedStatus { status, .. } => *status >= 500,
        ProviderError::ApiError { .. }
        | ProviderError::Deserialize { .. }
        | ProviderError::InvalidBaseUrl { .. } => false,
    }
}

/// Runs `operation` with up to `max_retries` additional attempts on transient errors.
///
/// Back-off schedule with `backoff_base_ms = 500`:
///
/// | Attempt | Sleep before next attempt     |
/// |---------|-------------------------------|
/// | 1       | 500 ms × 2⁰ ± 25 % jitter     |
/// | 2       | 500 ms × 2¹ ± 25 % jitter     |
/// | 3       | 500 ms × 2² ± 25 % jitter     |
///
/// A 429 with a `Retry-After` hint waits at least that long. Delay is capped
/// at 30 s. Non-retriable errors are returned immediately.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    max_retries: u32,
    backoff_base_ms: u64,
    mut operation: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    const MAX_DELAY_MS: u64 = 30_000;
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retriable(&err) || attempt >= max_retries {
                    return Err(err);
                }
                attempt += 1;
                let computed = backoff_base_ms.saturating_mul(1u64 << (attempt - 1).min(10));
                let hinted = match &err {
                    ProviderError::RateLimited { retry_after_secs } => {
                        retry_after_secs.saturating_mul(1_000)
                    }
                    _ => 0,
                };
                let capped = computed.max(hinted).min(MAX_DELAY_MS);
                #[allow(
                    clippy::cast_possible_truncation,
                    clippy::cast_sign_loss,
                    clippy::cast_precision_loss
                )]
                let delay_ms = (capped as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64;
                tracing::warn!(
                    attempt,
                    max_retries,
                    delay_ms,
                    error = %err,
                    "provider transient error, retrying after back-off"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    fn server_error() -> ProviderError {
        ProviderError::UnexpectedStatus {
            status: 503,
            url: "http://provider.test/v1/maps/search".to_owned(),
        }
    }

    #[test]
    fn classifies_statuses() {
        assert!(is_retriable(&server_error()));
        assert!(is_retriable(&ProviderError::RateLimited {
            retry_after_secs: 0
        }));
        assert!(!is_retriable(&ProviderError::UnexpectedStatus {
            status: 400,
            url: "x".to_owned()
        }));
        assert!(!is_retriable(&ProviderError::ApiError {
            code: 40501,
            message: "invalid keyword".to_owned()
        }));
    }

    #[test]
    fn deserialize_error_is_not_retriable() {
        let source = serde_json::from_str::<()>("invalid").unwrap_err();
        assert!(!is_retriable(&ProviderError::Deserialize {
            context: "test".to_owned(),
            source,
        }));
    }

    #[tokio::test]
    async fn succeeds_immediately_on_first_try() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(3, 0, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<u32, ProviderError>(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(3, 0, || {
            let c = Arc::clone(&c);
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(server_error())
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(2, 0, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(server_error())
            }
        })
        .await;
        // max_retries=2 → 3 total attempts
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            result,
            Err(ProviderError::UnexpectedStatus { status: 503, .. })
        ));
    }

    #[tokio::test]
    async fn does_not_retry_api_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(3, 0, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(ProviderError::ApiError {
                    code: 40501,
                    message: "invalid keyword".to_owned(),
                })
            }
        })
        .await;
        assert_eq!(
            calls.load(Ordering::SeqCst),
            1,
            "ApiError must not be retried"
        );
        assert!(matches!(result, Err(ProviderError::ApiError { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_hint_extends_the_delay() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let started = tokio::time::Instant::now();
        let result = retry_with_backoff(1, 10, || {
            let c = Arc::clone(&c);
            async move {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ProviderError::RateLimited {
                        retry_after_secs: 4,
                    })
                } else {
                    Ok(1)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
        // 4 s hint with -25 % jitter floor
        assert!(started.elapsed() >= Duration::from_secs(3));
    }
}
