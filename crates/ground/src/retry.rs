use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, 500, 4000)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: usize, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff_ms,
            max_backoff_ms,
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self::new(0, 0, 0)
    }

    /// Sleeps between consecutive attempts: doubling, capped at
    /// `max_backoff_ms`, one per retry.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let cap = self.max_backoff_ms;
        std::iter::successors(Some(self.initial_backoff_ms), |ms| Some(ms.saturating_mul(2)))
            .map(move |ms| Duration::from_millis(ms.min(cap)))
            .take(self.max_retries)
    }

    /// Time spent sleeping when every attempt fails. A caller-side timeout
    /// shorter than this cuts the last retries off.
    pub fn total_backoff(&self) -> Duration {
        self.delays().sum()
    }

    /// Run `f` until it succeeds or the retries are used up.
    pub async fn retry<F, Fut, T, E>(&self, operation_name: &str, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut delays = self.delays();
        let mut attempt = 1;

        loop {
            let error = match f().await {
                Ok(result) => {
                    if attempt > 1 {
                        info!(
                            operation = operation_name,
                            attempts = attempt,
                            "Succeeded after retries"
                        );
                    }
                    return Ok(result);
                }
                Err(e) => e,
            };

            let Some(delay) = delays.next() else {
                warn!(
                    operation = operation_name,
                    attempts = attempt,
                    error = %error,
                    "Giving up"
                );
                return Err(error);
            };

            warn!(
                operation = operation_name,
                attempt,
                max_retries = self.max_retries,
                backoff_ms = delay.as_millis() as u64,
                error = %error,
                "Attempt failed, retrying"
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_retry_until_success() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let policy = RetryPolicy::new(3, 1, 2);

        let result: Result<usize, String> = policy
            .retry("flaky", move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < 2 { Err("boom".to_string()) } else { Ok(n) }
            })
            .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let policy = RetryPolicy::new(2, 1, 1);

        let result: Result<(), String> = policy
            .retry("always-failing", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("down".to_string())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_backoff_schedule_is_capped() {
        let policy = RetryPolicy::new(4, 500, 1500);
        let delays: Vec<u64> = policy.delays().map(|d| d.as_millis() as u64).collect();

        assert_eq!(delays, vec![500, 1000, 1500, 1500]);
        assert_eq!(policy.total_backoff(), Duration::from_millis(4500));
        assert_eq!(RetryPolicy::none().total_backoff(), Duration::ZERO);
    }
}
