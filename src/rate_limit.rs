//! Request throttling for public services
//!
//! The registration relays and the operator intelligence service are free
//! public endpoints with per-minute quotas. Every call to them, and every
//! domain started by a batch run, first takes a [`RateLimiter`] permit.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Token bucket with a concurrency cap
#[derive(Debug)]
pub struct RateLimiter {
    capacity: usize,
    period: Duration,
    bucket: Mutex<Bucket>,
    in_flight: Arc<Semaphore>,
}

#[derive(Debug)]
struct Bucket {
    tokens: usize,
    refilled_at: Instant,
}

impl RateLimiter {
    /// `requests_per_period` calls per `period_ms`, at most `max_concurrent` at once
    pub fn new(requests_per_period: usize, period_ms: u64, max_concurrent: usize) -> Self {
        let capacity = requests_per_period.max(1);
        Self {
            capacity,
            period: Duration::from_millis(period_ms.max(1)),
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                refilled_at: Instant::now(),
            }),
            in_flight: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Waits for a token, then for a concurrency slot
    ///
    /// The slot is held until the returned guard is dropped.
    pub async fn acquire(&self) -> Result<RateLimitGuard> {
        loop {
            match self.take_token().await {
                None => break,
                Some(wait) => {
                    debug!("Rate limit reached, waiting {:?}", wait);
                    sleep(wait).await;
                }
            }
        }

        let permit = self
            .in_flight
            .clone()
            .acquire_owned()
            .await
            .context("Rate limiter semaphore closed")?;

        Ok(RateLimitGuard { _permit: permit })
    }

    /// Takes a token, or returns how long until the next refill
    async fn take_token(&self) -> Option<Duration> {
        let mut bucket = self.bucket.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.refilled_at);

        if elapsed >= self.period {
            let periods = (elapsed.as_millis() / self.period.as_millis()) as u32;
            bucket.tokens = self.capacity;
            bucket.refilled_at += self.period * periods;
        }

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            return None;
        }

        let until_refill = self.period.saturating_sub(now.duration_since(bucket.refilled_at));
        Some(until_refill.max(Duration::from_millis(1)))
    }
}

/// Holds a concurrency slot until dropped
#[derive(Debug)]
pub struct RateLimitGuard {
    _permit: OwnedSemaphorePermit,
}

/// Shared by all registration relays
///
/// Public RDAP relays throttle aggressively; stay well below their limits.
pub fn create_relay_limiter() -> RateLimiter {
    RateLimiter::new(30, 60_000, 5)
}

/// The free ip-api.com tier allows 45 requests per minute
pub fn create_operator_api_limiter() -> RateLimiter {
    RateLimiter::new(40, 60_000, 10)
}

/// Batch analysis throttle, in domains per minute
pub fn create_batch_limiter(domains_per_minute: u64, max_concurrent: usize) -> RateLimiter {
    RateLimiter::new(domains_per_minute as usize, 60_000, max_concurrent)
}
