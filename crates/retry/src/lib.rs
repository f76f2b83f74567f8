//! Generic exponential-backoff retry wrapper for fallible async operations.
//!
//! Used around outbound gateway calls: a transient network hiccup or a
//! rate-limit response should be retried a bounded number of times before
//! the caller gives up and surfaces the error up the stack.

use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(300),
            factor: 2,
        }
    }
}

impl BackoffPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * self.factor.saturating_pow(attempt)
    }
}

/// Runs `op` up to `policy.max_attempts` times. Between attempts, sleeps for
/// `base_delay * factor^attempt`. `should_retry` decides whether a given
/// error is worth another attempt at all; the last attempt's error is
/// returned regardless of what `should_retry` says.
pub async fn with_backoff<T, E, F, Fut, R>(
    policy: BackoffPolicy,
    should_retry: R,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(err) => {
                let retryable = should_retry(&err);
                let is_last = attempt + 1 >= policy.max_attempts;
                if !retryable || is_last {
                    return Err(err);
                }
                let delay = policy.delay_for(attempt);
                warn!(attempt, %err, delay_ms = delay.as_millis() as u64, "retrying after failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn succeeds_without_retry_when_first_call_succeeds() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &'static str> = with_backoff(
            BackoffPolicy::default(),
            |_| true,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(7) }
            },
        )
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_up_to_max_attempts_then_gives_up() {
        let calls = AtomicU32::new(0);
        let policy = BackoffPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            factor: 2,
        };
        let result: Result<u32, &'static str> = with_backoff(policy, |_| true, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("transient") }
        })
        .await;
        assert_eq!(result, Err("transient"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &'static str> = with_backoff(
            BackoffPolicy::default(),
            |_| false,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal") }
            },
        )
        .await;
        assert_eq!(result, Err("fatal"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
