//! Exponential backoff for transient fetch failures.
//!
//! Only errors for which [`EngineError::is_retryable`] holds are retried;
//! parse failures, 404s and configuration problems are returned on the first
//! attempt.

use std::future::Future;
use std::time::Duration;

use crate::error::EngineError;

/// Runs `operation`, retrying transient failures up to `max_retries` extra
/// times. The wait before retry `n` (1-based) is `backoff_base * 2^(n-1)`.
///
/// | Attempt | Sleep before it (`backoff_base` = 1s) |
/// |---------|---------------------------------------|
/// | 0 | none |
/// | 1 | 1 s |
/// | 2 | 2 s |
/// | 3 | 4 s |
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    max_retries: u32,
    backoff_base: Duration,
    mut operation: F,
) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let mut attempt = 0u32;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !err.is_retryable() || attempt >= max_retries {
            return Err(err);
        }

        let delay = backoff_base.saturating_mul(1u32 << attempt.min(20));
        tracing::warn!(
            attempt,
            max_retries,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "transient fetch error, retrying after backoff"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
