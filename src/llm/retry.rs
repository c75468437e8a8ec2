//! Exponential backoff retry for a single provider attempt.

use std::future::Future;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;

const INITIAL_INTERVAL_SECS: u64 = 1;
const MAX_INTERVAL_SECS: u64 = 30;

/// Retry an async operation with exponential backoff.
///
/// `attempt` is called up to `max_attempts` times (at least once). On each
/// failure the task sleeps for an exponentially increasing duration before
/// the next attempt.
///
/// `wrap_exhausted` converts the last error into the caller's
/// `RetriesExhausted` variant. It is only applied when more than one attempt
/// was made, so a single-attempt policy surfaces the original error.
pub async fn retry_with_backoff<T, E, Fut, F, W>(
    max_attempts: u32,
    mut attempt: F,
    wrap_exhausted: W,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    W: FnOnce(E) -> E,
{
    let max_attempts = max_attempts.max(1);
    let mut backoff = ExponentialBackoff {
        initial_interval: Duration::from_secs(INITIAL_INTERVAL_SECS),
        max_interval: Duration::from_secs(MAX_INTERVAL_SECS),
        max_elapsed_time: None,
        ..Default::default()
    };

    let mut attempts = 0;
    loop {
        attempts += 1;

        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if attempts >= max_attempts => {
                return Err(if max_attempts > 1 { wrap_exhausted(e) } else { e });
            }
            Err(_) => {
                if let Some(wait_duration) = backoff.next_backoff() {
                    tokio::time::sleep(wait_duration).await;
                }
            }
        }
    }
}
