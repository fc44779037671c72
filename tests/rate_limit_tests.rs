use anyhow::Result;
use domintel::rate_limit::{create_batch_limiter, RateLimiter};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};

#[tokio::test(start_paused = true)]
async fn test_bucket_refills_after_period() -> Result<()> {
    let limiter = RateLimiter::new(5, 1000, 3);

    let start = Instant::now();
    for _ in 0..5 {
        drop(limiter.acquire().await?);
    }
    assert!(start.elapsed() < Duration::from_millis(10));

    // the sixth call waits for the next period
    let _permit = limiter.acquire().await?;
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(1000), "waited only {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(1100), "waited {:?}", elapsed);

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_slot_released_on_drop() -> Result<()> {
    let limiter = Arc::new(RateLimiter::new(100, 1000, 2));

    let first = limiter.acquire().await?;
    let _second = limiter.acquire().await?;

    // both slots are taken
    assert!(timeout(Duration::from_millis(100), limiter.acquire()).await.is_err());

    drop(first);
    let third = timeout(Duration::from_millis(100), limiter.acquire()).await;
    assert!(third.is_ok(), "slot was not released");

    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_batch_limiter_is_per_minute() -> Result<()> {
    let limiter = create_batch_limiter(2, 4);

    drop(limiter.acquire().await?);
    drop(limiter.acquire().await?);
    assert!(timeout(Duration::from_secs(59), limiter.acquire()).await.is_err());

    // the timed-out call above consumed nothing; the bucket refills at 60s
    let permit = timeout(Duration::from_secs(2), limiter.acquire()).await;
    assert!(permit.is_ok());

    Ok(())
}
