//! Bounded retries with a precomputed delay table
//!
//! The retry loop holds an explicit attempt counter and looks up each wait in
//! a table computed up front, so the attempt budget and the delays can be
//! asserted without running the operation. Used by the registration
//! retriever, which retries its whole relay chain on failure and on
//! default-only answers.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Attempt budget and the wait before each retry
///
/// # Examples
///
/// ```
/// use domintel::retry::RetryPolicy;
/// use std::time::Duration;
///
/// // 3 attempts, waiting 2s then 4s between them
/// let policy = RetryPolicy::linear(3, Duration::from_secs(2));
/// assert_eq!(policy.max_attempts(), 3);
/// assert_eq!(policy.delay_after(1), Some(Duration::from_secs(2)));
/// assert_eq!(policy.delay_after(2), Some(Duration::from_secs(4)));
/// assert_eq!(policy.delay_after(3), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    /// `delays[n - 1]` is the wait after failed attempt `n`
    delays: Vec<Duration>,
}

impl RetryPolicy {
    /// Delay grows by `step` after every failed attempt
    pub fn linear(max_attempts: u32, step: Duration) -> Self {
        let max_attempts = max_attempts.max(1);
        let delays = (1..max_attempts).map(|attempt| step * attempt).collect();
        Self {
            max_attempts,
            delays,
        }
    }

    /// Explicit delay table; the budget is one more than the number of delays
    pub fn from_delays(delays: Vec<Duration>) -> Self {
        Self {
            max_attempts: delays.len() as u32 + 1,
            delays,
        }
    }

    /// Single attempt, no retries
    pub fn once() -> Self {
        Self::from_delays(Vec::new())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait after failed attempt `attempt` (1-based), `None` when the budget is spent
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 {
            return None;
        }
        self.delays.get(attempt as usize - 1).copied()
    }

    /// Sum of all waits if every attempt fails
    pub fn total_delay(&self) -> Duration {
        self.delays.iter().sum()
    }
}

/// Runs `operation` until it succeeds, the error is not retriable, or the
/// attempt budget is spent
///
/// The operation receives the 1-based attempt number. The last error is
/// returned when all attempts fail.
///
/// # Examples
///
/// ```
/// use domintel::retry::{with_retry_policy, RetryPolicy};
///
/// # async fn example() -> Result<(), String> {
/// let policy = RetryPolicy::once();
/// let value = with_retry_policy(
///     |attempt| async move { Ok::<_, String>(attempt * 10) },
///     |_err| true,
///     &policy,
/// )
/// .await?;
/// assert_eq!(value, 10);
/// # Ok(())
/// # }
/// ```
pub async fn with_retry_policy<F, Fut, T, E, R>(
    operation: F,
    is_retriable: R,
    policy: &RetryPolicy,
) -> Result<T, E>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        attempt += 1;
        let result = operation(attempt).await;

        let retriable = match &result {
            Ok(_) => false,
            Err(err) => is_retriable(err),
        };
        if !retriable {
            return result;
        }

        match policy.delay_after(attempt) {
            Some(delay) if attempt < policy.max_attempts => {
                debug!(
                    "Retry attempt {}/{} after {:?} delay",
                    attempt + 1,
                    policy.max_attempts,
                    delay
                );
                sleep(delay).await;
            }
            _ => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_table() {
        let policy = RetryPolicy::linear(4, Duration::from_millis(500));
        assert_eq!(
            policy.delays,
            vec![
                Duration::from_millis(500),
                Duration::from_millis(1000),
                Duration::from_millis(1500)
            ]
        );
        assert_eq!(policy.total_delay(), Duration::from_millis(3000));
    }

    #[test]
    fn test_zero_budget_is_clamped_to_one_attempt() {
        let policy = RetryPolicy::linear(0, Duration::from_secs(1));
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.delay_after(1), None);
    }
}
