//! Bounded retry with exponential backoff and a cancellation flag.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based): `backoff * 2^(attempt-1)`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(10);
        self.backoff.saturating_mul(2u32.saturating_pow(exponent))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    Cancelled,
    Failed { error: E, attempts: u32 },
}

pub async fn sleep_with_cancellation(cancel: &AtomicBool, delay: Duration) -> bool {
    let started = tokio::time::Instant::now();
    while started.elapsed() < delay {
        if cancel.load(Ordering::Relaxed) {
            return false;
        }
        let remaining = delay.saturating_sub(started.elapsed());
        tokio::time::sleep(remaining.min(Duration::from_millis(100))).await;
    }
    !cancel.load(Ordering::Relaxed)
}

/// Runs `call` until it succeeds, fails with a non-transient error, or the
/// attempt budget is spent. `call` receives the 1-based attempt number.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &AtomicBool,
    is_transient: impl Fn(&E) -> bool,
    mut call: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        if cancel.load(Ordering::Relaxed) {
            return Err(RetryError::Cancelled);
        }
        match call(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= attempts || !is_transient(&error) {
                    return Err(RetryError::Failed { error, attempts: attempt });
                }
                tracing::debug!(attempt, delay = ?policy.delay(attempt), "transient failure, retrying");
                if !sleep_with_cancellation(cancel, policy.delay(attempt)).await {
                    return Err(RetryError::Cancelled);
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(200),
        };
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
        assert_eq!(policy.delay(3), Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let cancel = AtomicBool::new(false);
        let started = tokio::time::Instant::now();
        let out = with_retry(&RetryPolicy::default(), &cancel, |_: &&str| true, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err("flaky")
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(out, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 500ms + 1000ms of backoff
        assert!(started.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_and_exhaustion_stop() {
        let cancel = AtomicBool::new(false);
        let out: Result<(), _> =
            with_retry(&RetryPolicy::default(), &cancel, |_: &&str| false, |_| async { Err("bad") })
                .await;
        assert_eq!(out, Err(RetryError::Failed { error: "bad", attempts: 1 }));

        let out: Result<(), _> =
            with_retry(&RetryPolicy::default(), &cancel, |_: &&str| true, |_| async { Err("down") })
                .await;
        assert_eq!(out, Err(RetryError::Failed { error: "down", attempts: 3 }));
    }

    #[tokio::test]
    async fn cancelled_before_first_attempt() {
        let cancel = AtomicBool::new(true);
        let out: Result<(), RetryError<&str>> =
            with_retry(&RetryPolicy::default(), &cancel, |_| true, |_| async { Ok(()) }).await;
        assert_eq!(out, Err(RetryError::Cancelled));
    }
}
