//! Bounded retry for remote calls.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::error::StoreError;

/// Which failures are worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOn {
    ConnectionReset,
    AnyError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Attempt `n` (0-based) waits `step * n + 1ms` before its request.
    /// `None` means no pre-request delay at all.
    pub step: Option<Duration>,
    pub retry_on: RetryOn,
}

impl RetryPolicy {
    /// Part uploads: 3 attempts, connection resets only, growing delay.
    pub fn part_upload() -> Self {
        Self {
            max_attempts: 3,
            step: Some(Duration::from_millis(1000)),
            retry_on: RetryOn::ConnectionReset,
        }
    }

    /// Multipart completion: 3 attempts on any failure, no delay.
    pub fn completion() -> Self {
        Self {
            max_attempts: 3,
            step: None,
            retry_on: RetryOn::AnyError,
        }
    }

    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        self.step
            .map(|step| step * attempt + Duration::from_millis(1))
    }

    fn should_retry(&self, err: &StoreError) -> bool {
        match self.retry_on {
            RetryOn::AnyError => true,
            RetryOn::ConnectionReset => err.is_connection_reset(),
        }
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up.
pub async fn execute_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &'static str,
    mut operation: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        if let Some(delay) = policy.delay_before(attempt) {
            sleep(delay).await;
        }
        attempt += 1;
        match operation().await {
            Ok(v) => return Ok(v),
            Err(e) if !policy.should_retry(&e) => return Err(e),
            Err(e) if attempt >= max_attempts => {
                return Err(StoreError::RetriesExhausted {
                    operation: operation_name,
                    attempts: attempt,
                    source: Box::new(e),
                });
            }
            Err(e) => {
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    error = %e,
                    "retrying remote call"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn resets_are_retried_with_growing_delay() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let res: Result<u32, _> = execute_with_retry(&RetryPolicy::part_upload(), "part", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StoreError::ConnectionReset("reset".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(res.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1ms + 1001ms + 2001ms
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(3003));
        assert!(elapsed < Duration::from_millis(3100));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_on_every_attempt_exhausts_after_three() {
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = execute_with_retry(&RetryPolicy::part_upload(), "part", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::ConnectionReset("reset".into())) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            res,
            Err(StoreError::RetriesExhausted { attempts: 3, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn other_errors_are_not_retried_for_parts() {
        let calls = AtomicU32::new(0);
        let res: Result<(), _> = execute_with_retry(&RetryPolicy::part_upload(), "part", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(StoreError::Api {
                    status: 400,
                    message: "bad part".into(),
                })
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(res, Err(StoreError::Api { status: 400, .. })));
    }

    #[tokio::test]
    async fn completion_retries_any_error_without_delay() {
        let calls = AtomicU32::new(0);
        let res = execute_with_retry(&RetryPolicy::completion(), "complete", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(StoreError::Api {
                        status: 500,
                        message: "try again".into(),
                    })
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(res.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(RetryPolicy::completion().delay_before(1), None);
    }
}
