use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::QuotaError;
use crate::error::Result;
use crate::time::TimeSource;

// Fixed-point scale: tokens are stored in thousandths
const TOKEN_SCALE: u64 = 1000;
const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Largest burst a pool accepts
pub const MAX_BURST: u64 = u64::MAX / TOKEN_SCALE;

/// Outcome of a successful blocking acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acquired {
    /// True when the caller had to queue or sleep before tokens were granted
    pub waited: bool,
}

/// Token state guarded by the pool's short critical section
#[derive(Debug)]
struct Bucket {
    /// Current tokens (scaled by TOKEN_SCALE)
    tokens: u64,

    /// Last refill timestamp in nanoseconds
    last_refill: u64,

    /// Maximum number of tokens
    burst: u64,

    /// Refill rate in tokens per second
    rate: f64,
}

impl Bucket {
    #[inline(always)]
    fn capacity_scaled(&self) -> u64 {
        self.burst * TOKEN_SCALE
    }

    /// Add tokens for the time elapsed since the last refill, capped at burst
    #[inline(always)]
    fn refill(&mut self, now: u64) {
        let elapsed = now.saturating_sub(self.last_refill);
        if elapsed == 0 {
            return;
        }

        let capacity = self.capacity_scaled();
        if self.tokens >= capacity {
            self.last_refill = now;
            return;
        }

        let tokens_to_add = (elapsed as f64 * self.rate * TOKEN_SCALE as f64 / NANOS_PER_SEC) as u64;
        if tokens_to_add == 0 {
            return;
        }

        self.tokens = self.tokens.saturating_add(tokens_to_add).min(capacity);
        self.last_refill = now;
    }

    /// Time until `required` scaled tokens will be available at the current rate
    fn time_until(&self, required: u64) -> Duration {
        let deficit = required.saturating_sub(self.tokens);
        let nanos = (deficit as f64 * NANOS_PER_SEC / (self.rate * TOKEN_SCALE as f64)).ceil();
        Duration::from_nanos((nanos as u64).max(1))
    }
}

fn validate(rate: f64, burst: u64) -> Result<()> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(QuotaError::InvalidConfig("rate must be positive and finite"));
    }
    if burst == 0 {
        return Err(QuotaError::InvalidConfig("burst must be greater than 0"));
    }
    if burst > MAX_BURST {
        return Err(QuotaError::InvalidConfig("burst too large"));
    }
    Ok(())
}

/// Blocking token bucket with FIFO waiters and live reconfiguration
///
/// Tokens refill continuously at `rate` per second up to `burst`. Blocking
/// acquisitions queue in arrival order; only the head of the queue inspects
/// the bucket, so a large request is never starved by a stream of small ones.
/// A reconfiguration wakes the head waiter, which recomputes its sleep from
/// the new rate.
#[derive(Debug)]
pub struct QuotaPool {
    bucket: Mutex<Bucket>,

    /// FIFO queue of blocking acquirers (tokio's mutex is fair)
    queue: tokio::sync::Mutex<()>,

    /// Signalled on every reconfiguration
    reconfigured: Notify,

    time_source: TimeSource,
}

impl QuotaPool {
    /// Create a pool that starts full
    pub fn new(rate: f64, burst: u64) -> Result<Self> {
        validate(rate, burst)?;

        let time_source = TimeSource::new();
        let now = time_source.now_nanos();

        Ok(Self {
            bucket: Mutex::new(Bucket { tokens: burst * TOKEN_SCALE, last_refill: now, burst, rate }),
            queue: tokio::sync::Mutex::new(()),
            reconfigured: Notify::new(),
            time_source,
        })
    }

    /// Create a builder for configuring a quota pool
    pub fn builder() -> QuotaPoolBuilder {
        QuotaPoolBuilder::new()
    }

    /// Wait until `amount` tokens are available, then take them
    ///
    /// Amounts above the burst are charged in full, one bucketful at a time,
    /// so a request of `amount` tokens starting from a full bucket waits
    /// `(amount - burst) / rate`. Tokens debited before a cancellation or
    /// deadline stay spent. Returns `Canceled` or `DeadlineExceeded`
    /// as soon as either fires, whether queued or sleeping.
    pub async fn acquire(&self, amount: u64, cancel: &CancellationToken, deadline: Option<Instant>) -> Result<Acquired> {
        if amount == 0 {
            return Ok(Acquired { waited: false });
        }
        if cancel.is_cancelled() {
            return Err(QuotaError::Canceled);
        }
        if deadline.is_some_and(|deadline| deadline <= Instant::now()) {
            return Err(QuotaError::DeadlineExceeded);
        }

        let expiry = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(expiry);

        let mut waited = false;
        let _turn = match self.queue.try_lock() {
            Ok(turn) => turn,
            Err(_) => {
                waited = true;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(QuotaError::Canceled),
                    _ = &mut expiry => return Err(QuotaError::DeadlineExceeded),
                    turn = self.queue.lock() => turn,
                }
            }
        };

        let mut remaining = amount;
        loop {
            // Register before inspecting the bucket so a concurrent
            // reconfiguration cannot slip between check and sleep
            let notified = self.reconfigured.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wait = {
                let mut bucket = self.bucket.lock();
                bucket.refill(self.time_source.now_nanos());

                // Debit at most a full bucket at a time, keeping the turn
                // until the whole amount has been charged
                let required = remaining.min(bucket.burst) * TOKEN_SCALE;
                if bucket.tokens >= required {
                    bucket.tokens -= required;
                    remaining -= required / TOKEN_SCALE;
                    if remaining == 0 {
                        return Ok(Acquired { waited });
                    }
                    continue;
                }
                bucket.time_until(required)
            };
            waited = true;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(QuotaError::Canceled),
                _ = &mut expiry => return Err(QuotaError::DeadlineExceeded),
                _ = &mut notified => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Take `amount` tokens without blocking
    ///
    /// Fails with `Exceeded` when tokens are short, when `amount` is above
    /// the burst, or when another caller is already queued, so non-blocking
    /// callers never jump the queue.
    pub fn try_acquire(&self, amount: u64) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }

        let _turn = self.queue.try_lock().map_err(|_| QuotaError::Exceeded)?;
        let mut bucket = self.bucket.lock();
        bucket.refill(self.time_source.now_nanos());

        if amount > bucket.burst {
            return Err(QuotaError::Exceeded);
        }
        let required = amount * TOKEN_SCALE;
        if bucket.tokens < required {
            return Err(QuotaError::Exceeded);
        }
        bucket.tokens -= required;
        Ok(())
    }

    /// Apply a new rate and burst in place
    ///
    /// Tokens accrued so far are credited at the old rate, then clamped to
    /// the new burst. Blocked callers are woken to re-plan at the new rate.
    pub fn reconfigure(&self, rate: f64, burst: u64) -> Result<()> {
        validate(rate, burst)?;

        {
            let mut bucket = self.bucket.lock();
            bucket.refill(self.time_source.now_nanos());
            bucket.rate = rate;
            bucket.burst = burst;
            bucket.tokens = bucket.tokens.min(bucket.capacity_scaled());
        }

        self.reconfigured.notify_waiters();
        Ok(())
    }

    /// Whole tokens currently available
    pub fn available(&self) -> u64 {
        let mut bucket = self.bucket.lock();
        bucket.refill(self.time_source.now_nanos());
        bucket.tokens / TOKEN_SCALE
    }

    pub fn burst(&self) -> u64 {
        self.bucket.lock().burst
    }

    pub fn rate(&self) -> f64 {
        self.bucket.lock().rate
    }

    /// Refill the pool to its burst
    pub fn reset(&self) {
        let now = self.time_source.now_nanos();
        let mut bucket = self.bucket.lock();
        bucket.tokens = bucket.capacity_scaled();
        bucket.last_refill = now;
    }
}

/// Builder for configuring a quota pool
pub struct QuotaPoolBuilder {
    burst: Option<u64>,
    rate: Option<f64>,
}

impl QuotaPoolBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self { burst: None, rate: None }
    }

    /// Set the burst (max tokens)
    pub fn burst(mut self, burst: u64) -> Self {
        self.burst = Some(burst);
        self
    }

    /// Set the refill rate in tokens per second
    pub fn rate_per_second(mut self, rate: f64) -> Self {
        self.rate = Some(rate);
        self
    }

    /// Set the refill rate in tokens per minute
    pub fn rate_per_minute(mut self, rate: f64) -> Self {
        self.rate = Some(rate / 60.0);
        self
    }

    /// Build the quota pool
    pub fn build(self) -> Result<QuotaPool> {
        let burst = self.burst.ok_or(QuotaError::InvalidConfig("burst must be set"))?;
        let rate = self.rate.ok_or(QuotaError::InvalidConfig("rate must be set"))?;
        QuotaPool::new(rate, burst)
    }
}

impl Default for QuotaPoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::*;

    fn background() -> CancellationToken {
        CancellationToken::new()
    }

    #[test]
    fn test_creation() {
        let pool = QuotaPool::new(50.0, 100).unwrap();
        assert_eq!(pool.burst(), 100);
        assert_eq!(pool.available(), 100);
        assert_eq!(pool.rate(), 50.0);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(QuotaPool::new(0.0, 10), Err(QuotaError::InvalidConfig(_))));
        assert!(matches!(QuotaPool::new(-1.0, 10), Err(QuotaError::InvalidConfig(_))));
        assert!(matches!(QuotaPool::new(f64::NAN, 10), Err(QuotaError::InvalidConfig(_))));
        assert!(matches!(QuotaPool::new(10.0, 0), Err(QuotaError::InvalidConfig(_))));
        assert!(matches!(QuotaPool::new(10.0, u64::MAX), Err(QuotaError::InvalidConfig(_))));
    }

    #[test]
    fn test_try_acquire() {
        let pool = QuotaPool::new(0.001, 10).unwrap();

        assert!(pool.try_acquire(1).is_ok());
        assert_eq!(pool.available(), 9);

        assert!(pool.try_acquire(5).is_ok());
        assert_eq!(pool.available(), 4);

        assert_eq!(pool.try_acquire(5), Err(QuotaError::Exceeded));
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn test_zero_amount() {
        let pool = QuotaPool::new(0.001, 10).unwrap();
        assert!(pool.try_acquire(0).is_ok());
        assert_eq!(pool.available(), 10);
    }

    #[test]
    fn test_builder() {
        let pool = QuotaPool::builder().burst(200).rate_per_minute(600.0).build().unwrap();
        assert_eq!(pool.burst(), 200);
        assert_eq!(pool.rate(), 10.0);

        assert!(matches!(QuotaPool::builder().burst(1).build(), Err(QuotaError::InvalidConfig("rate must be set"))));
    }

    #[test]
    fn test_reset() {
        let pool = QuotaPool::new(0.001, 10).unwrap();
        assert!(pool.try_acquire(7).is_ok());
        pool.reset();
        assert_eq!(pool.available(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill() {
        let pool = QuotaPool::new(100.0, 100).unwrap();
        assert!(pool.try_acquire(100).is_ok());
        assert_eq!(pool.available(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(pool.available(), 20);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(pool.available(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_blocks_for_deficit() {
        let pool = QuotaPool::new(10.0, 100).unwrap();
        let cancel = background();

        for _ in 0..100 {
            let acquired = pool.acquire(1, &cancel, None).await.unwrap();
            assert!(!acquired.waited);
        }

        let start = Instant::now();
        let acquired = pool.acquire(1, &cancel, None).await.unwrap();
        let elapsed = start.elapsed();

        assert!(acquired.waited);
        assert!(elapsed >= Duration::from_millis(100), "waited {elapsed:?}");
        assert!(elapsed < Duration::from_millis(110), "waited {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_amount_above_burst_is_charged_in_full() {
        let pool = QuotaPool::new(10.0, 10).unwrap();
        let cancel = background();
        assert!(pool.try_acquire(4).is_ok());

        let start = Instant::now();
        let acquired = pool.acquire(25, &cancel, None).await.unwrap();
        let elapsed = start.elapsed();

        // Six tokens on hand, the other nineteen refill at 10/s
        assert!(acquired.waited);
        assert!(elapsed >= Duration::from_millis(1900), "waited {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1920), "waited {elapsed:?}");
        assert_eq!(pool.available(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_large_amounts_pay_full_cost() {
        let pool = QuotaPool::new(1.0, 10).unwrap();
        let cancel = background();
        let start = Instant::now();

        pool.acquire(1000, &cancel, None).await.unwrap();
        let first = start.elapsed();
        assert!(first >= Duration::from_secs(990) && first < Duration::from_secs(991), "waited {first:?}");

        pool.acquire(1000, &cancel, None).await.unwrap();
        pool.acquire(1000, &cancel, None).await.unwrap();
        let total = start.elapsed();
        assert!(total >= Duration::from_secs(2990) && total < Duration::from_secs(2992), "waited {total:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_during_large_amount_keeps_debits() {
        let pool = QuotaPool::new(1.0, 10).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);

        let result = pool.acquire(100, &background(), Some(deadline)).await;

        assert_eq!(result, Err(QuotaError::DeadlineExceeded));
        assert_eq!(pool.available(), 5);
    }

    #[test]
    fn test_try_acquire_above_burst_fails() {
        let pool = QuotaPool::new(0.001, 10).unwrap();
        assert_eq!(pool.try_acquire(11), Err(QuotaError::Exceeded));
        assert_eq!(pool.available(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exceeded() {
        let pool = QuotaPool::new(1.0, 1).unwrap();
        let cancel = background();
        assert!(pool.try_acquire(1).is_ok());

        let start = Instant::now();
        let deadline = start + Duration::from_millis(250);
        let result = pool.acquire(1, &cancel, Some(deadline)).await;

        assert_eq!(result, Err(QuotaError::DeadlineExceeded));
        assert!(start.elapsed() < Duration::from_millis(260));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_deadline_fails_fast() {
        let pool = QuotaPool::new(1.0, 10).unwrap();
        let result = pool.acquire(1, &background(), Some(Instant::now())).await;
        assert_eq!(result, Err(QuotaError::DeadlineExceeded));
        assert_eq!(pool.available(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_sleeping() {
        let pool = Arc::new(QuotaPool::new(1.0, 1).unwrap());
        assert!(pool.try_acquire(1).is_ok());

        let cancel = CancellationToken::new();
        let waiter = {
            let pool = Arc::clone(&pool);
            let cancel = cancel.clone();
            tokio::spawn(async move { pool.acquire(1, &cancel, None).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        assert_eq!(waiter.await.unwrap(), Err(QuotaError::Canceled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_queued() {
        let pool = Arc::new(QuotaPool::new(1.0, 10).unwrap());
        assert!(pool.try_acquire(10).is_ok());

        let head = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire(5, &CancellationToken::new(), None).await })
        };
        tokio::task::yield_now().await;

        let cancel = CancellationToken::new();
        let queued = {
            let pool = Arc::clone(&pool);
            let cancel = cancel.clone();
            tokio::spawn(async move { pool.acquire(1, &cancel, None).await })
        };
        tokio::task::yield_now().await;
        cancel.cancel();

        assert_eq!(queued.await.unwrap(), Err(QuotaError::Canceled));
        assert!(head.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_order() {
        let pool = Arc::new(QuotaPool::new(10.0, 10).unwrap());
        assert!(pool.try_acquire(10).is_ok());
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for (name, amount) in [("large", 5), ("small", 1)] {
            let pool = Arc::clone(&pool);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                pool.acquire(amount, &CancellationToken::new(), None).await.unwrap();
                order.lock().push(name);
            }));
            tokio::task::yield_now().await;
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock(), vec!["large", "small"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire_does_not_jump_queue() {
        let pool = Arc::new(QuotaPool::new(1.0, 10).unwrap());
        assert!(pool.try_acquire(9).is_ok());

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire(5, &CancellationToken::new(), None).await })
        };
        tokio::task::yield_now().await;

        assert_eq!(pool.try_acquire(1), Err(QuotaError::Exceeded));
        assert!(waiter.await.unwrap().unwrap().waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconfigure_slows_blocked_waiter() {
        let pool = Arc::new(QuotaPool::new(10.0, 10).unwrap());
        assert!(pool.try_acquire(10).is_ok());

        let start = Instant::now();
        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                pool.acquire(10, &CancellationToken::new(), None).await.unwrap();
                Instant::now()
            })
        };

        // Half the deficit refills at the old rate, the rest at half speed
        tokio::time::sleep(Duration::from_millis(500)).await;
        pool.reconfigure(5.0, 10).unwrap();

        let finished = waiter.await.unwrap();
        let elapsed = finished - start;
        assert!(elapsed >= Duration::from_millis(1490), "waited {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1600), "waited {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconfigure_speeds_up_blocked_waiter() {
        let pool = Arc::new(QuotaPool::new(1.0, 10).unwrap());
        assert!(pool.try_acquire(10).is_ok());

        let start = Instant::now();
        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire(10, &CancellationToken::new(), None).await })
        };
        tokio::task::yield_now().await;

        pool.reconfigure(100.0, 10).unwrap();
        waiter.await.unwrap().unwrap();

        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[test]
    fn test_reconfigure_clamps_tokens() {
        let pool = QuotaPool::new(0.001, 100).unwrap();
        pool.reconfigure(0.001, 10).unwrap();
        assert_eq!(pool.available(), 10);
        assert_eq!(pool.burst(), 10);

        assert!(matches!(pool.reconfigure(0.0, 10), Err(QuotaError::InvalidConfig(_))));
        assert_eq!(pool.rate(), 0.001);
    }

    #[test]
    fn test_concurrent_access() {
        let pool = Arc::new(QuotaPool::new(0.001, 1000).unwrap());
        let mut handles = vec![];

        for _ in 0..10 {
            let pool = Arc::clone(&pool);
            handles.push(std::thread::spawn(move || {
                let mut acquired = 0;
                for _ in 0..200 {
                    // A concurrent caller may briefly hold the queue; retry on contention
                    while pool.available() > 0 {
                        if pool.try_acquire(1).is_ok() {
                            acquired += 1;
                            break;
                        }
                    }
                }
                acquired
            }));
        }

        let total: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 1000);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Take(u64),
        Reconfigure(u64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![(0u64..50).prop_map(Op::Take), (1u64..50).prop_map(Op::Reconfigure)]
    }

    proptest! {
        #[test]
        fn prop_tokens_stay_within_burst(initial in 1u64..50, ops in proptest::collection::vec(op(), 1..64)) {
            let pool = QuotaPool::new(1000.0, initial).unwrap();
            for op in ops {
                match op {
                    Op::Take(amount) => { let _ = pool.try_acquire(amount); }
                    Op::Reconfigure(burst) => pool.reconfigure(1000.0, burst).unwrap(),
                }
                prop_assert!(pool.available() <= pool.burst());
            }
        }
    }
}
