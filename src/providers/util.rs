use anyhow::Error;
use reqwest::{Response, StatusCode};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Statuses worth another attempt: rate limiting, timeouts and server errors.
pub fn is_transient(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

/// Delay before retry number `attempt` (1-based): `base_delay_ms * 2^attempt`.
pub fn backoff_delay(base_delay_ms: u64, attempt: usize) -> Duration {
    let factor = 1u64 << attempt.min(16);
    Duration::from_millis(base_delay_ms.saturating_mul(factor))
}

/// Retries an HTTP request with exponential backoff
///
/// # Parameters
/// - `operation`: Closure returning a request future
/// - `retries`: Number of retry attempts (total runs = 1 initial + retries)
/// - `base_delay_ms`: Base delay, doubled for every attempt
///
/// # Returns
/// The first non-transient response, the last response once retries run out, or the
/// last transport error
pub async fn with_retry<F, Fut>(
    mut operation: F,
    retries: usize,
    base_delay_ms: u64,
) -> Result<Response, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Response, reqwest::Error>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(response) if !is_transient(response.status()) || attempt > retries => {
                return Ok(response);
            }
            Ok(response) => {
                debug!(
                    "Attempt {}/{} returned {}. Retrying...",
                    attempt,
                    retries,
                    response.status()
                );
            }
            Err(err) if attempt > retries => return Err(err.into()),
            Err(err) => {
                debug!(
                    "Attempt {}/{} failed: {}. Retrying...",
                    attempt, retries, err
                );
            }
        }
        tokio::time::sleep(backoff_delay(base_delay_ms, attempt)).await;
        attempt += 1;
    }
}
