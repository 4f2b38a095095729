//! Startup connection retry policy
//!
//! Both pools (database and redis) come up through the same doubling-delay
//! loop, so the policy lives here once instead of being restated per
//! backend.

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// Keep calling `connect` until it succeeds or the retry budget runs out.
///
/// `max_retries` counts the tries *after* the first, so the total attempt
/// count is `max_retries + 1`. The sleep between failures starts at
/// `initial_delay` and doubles each time.
pub(crate) async fn connect_with_backoff<T, F, Fut>(
    target: &str,
    max_retries: u32,
    initial_delay: Duration,
    mut connect: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut failures = 0u32;
    let mut delay = initial_delay;

    loop {
        match connect().await {
            Ok(value) => {
                if failures > 0 {
                    tracing::info!(tries = failures + 1, "{} came up after retrying", target);
                }
                return Ok(value);
            }
            Err(e) => {
                failures += 1;
                if failures > max_retries {
                    tracing::error!(tries = failures, error = %e, "giving up on {}", target);
                    return Err(e);
                }
                tracing::warn!(
                    tries = failures,
                    error = %e,
                    "{} not reachable yet, next try in {:?}",
                    target,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn first_try_success_needs_no_sleep() {
        let calls = AtomicU32::new(0);
        let result = connect_with_backoff("thing", 3, Duration::from_secs(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(7u32) }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_within_the_retry_budget() {
        let calls = AtomicU32::new(0);
        let result = connect_with_backoff("thing", 3, Duration::from_secs(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::ServiceUnavailable("still booting".to_string()))
                } else {
                    Ok("up")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "up");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_returns_the_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<u32> = connect_with_backoff("thing", 2, Duration::from_secs(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::ServiceUnavailable("down".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(Error::ServiceUnavailable(_))));
        // One initial try plus two retries.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
