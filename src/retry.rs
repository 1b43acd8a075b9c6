// src/retry.rs
//! Bounded retry around a whole queue drain (not around single items).

use std::future::Future;
use std::time::Duration;

use metrics::counter;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    /// `max_attempts` below 1 is raised to 1.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(5))
    }
}

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("queue drain failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

/// Run `attempt` until `remaining` reports an empty queue.
///
/// A failed attempt waits `policy.delay` before the next one. A successful
/// attempt that leaves work behind continues straight away. Returns the output
/// of every successful attempt.
pub async fn run_with_retry<T, A, Fut, R>(
    policy: &RetryPolicy,
    mut attempt: A,
    mut remaining: R,
) -> Result<Vec<T>, RetryError>
where
    A: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
    R: FnMut() -> anyhow::Result<usize>,
{
    let max = policy.max_attempts.max(1);
    let mut outputs = Vec::new();
    let mut last_error = String::from("no attempt was made");

    for n in 1..=max {
        tracing::info!(attempt = n, max_attempts = max, "drain attempt");
        let failed = match attempt(n).await {
            Ok(out) => {
                outputs.push(out);
                match remaining() {
                    Ok(0) => return Ok(outputs),
                    Ok(left) => {
                        last_error = format!("queue still holds {left} items");
                        tracing::info!(attempt = n, left, "queue not empty, continuing");
                        false
                    }
                    Err(e) => {
                        last_error = format!("{e:#}");
                        true
                    }
                }
            }
            Err(e) => {
                last_error = format!("{e:#}");
                true
            }
        };

        if failed {
            counter!("scheduler_retry_failures_total").increment(1);
            tracing::warn!(attempt = n, error = %last_error, "drain attempt failed");
            if n < max {
                tokio::time::sleep(policy.delay).await;
            }
        }
    }

    Err(RetryError::Exhausted {
        attempts: max,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test(start_paused = true)]
    async fn empty_queue_after_first_attempt_succeeds() {
        let policy = RetryPolicy::new(3, Duration::from_secs(5));
        let out = run_with_retry(&policy, |n| async move { Ok(n) }, || Ok(0))
            .await
            .unwrap();
        assert_eq!(out, vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_wait_between_attempts_then_exhaust() {
        let policy = RetryPolicy::new(3, Duration::from_secs(5));
        let start = tokio::time::Instant::now();
        let err = run_with_retry(
            &policy,
            |n| async move { Err::<(), _>(anyhow::anyhow!("boom {n}")) },
            || Ok(1),
        )
        .await
        .unwrap_err();
        let RetryError::Exhausted { attempts, last_error } = err;
        assert_eq!(attempts, 3);
        assert_eq!(last_error, "boom 3");
        // Two sleeps between three attempts, none after the last.
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn leftover_work_continues_without_delay() {
        let policy = RetryPolicy::new(3, Duration::from_secs(5));
        let left = Cell::new(2usize);
        let start = tokio::time::Instant::now();
        let out = run_with_retry(
            &policy,
            |n| async move { Ok(n) },
            || {
                left.set(left.get() - 1);
                Ok(left.get())
            },
        )
        .await
        .unwrap();
        assert_eq!(out, vec![1, 2]);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[test]
    fn zero_attempts_is_raised_to_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }
}
