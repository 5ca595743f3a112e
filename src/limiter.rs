//! Token-bucket rate limiting shared by every call an analyzer issues.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Admits at most `rate` requests per `period` over the long run.
///
/// Acquisition is spin-with-sleep, not a queue: waiters race for the next
/// token and fairness is not guaranteed. The lock covers only the refill and
/// deduct arithmetic and is never held across a sleep, so dropping a waiting
/// future leaves the bucket consistent.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    capacity: f64,
    period: Duration,
    bucket: Arc<Mutex<Bucket>>,
}

impl RateLimiter {
    /// A zero `rate` or `period` is clamped to 1 request per 1ms so the bucket
    /// arithmetic stays finite.
    pub fn new(rate: u32, period: Duration) -> Self {
        let capacity = f64::from(rate.max(1));
        let period = period.max(Duration::from_millis(1));
        Self {
            capacity,
            period,
            bucket: Arc::new(Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            })),
        }
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens per second.
    fn refill_rate(&self) -> f64 {
        self.capacity / self.period.as_secs_f64()
    }

    fn lock(&self) -> MutexGuard<'_, Bucket> {
        // The critical section can't panic mid-update, so a poisoned guard
        // still holds consistent state.
        self.bucket.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// One acquisition attempt. Returns `Duration::ZERO` when a token was
    /// taken, otherwise the minimum wait before a token can exist.
    pub fn try_acquire(&self) -> Duration {
        let mut bucket = self.lock();
        let now = Instant::now();

        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        let earned = elapsed * self.refill_rate();
        if earned > 0.0 {
            bucket.tokens = (bucket.tokens + earned).min(self.capacity);
            bucket.last_refill = now;
        }

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Duration::ZERO;
        }

        // Very long periods overflow Duration; saturate instead.
        Duration::try_from_secs_f64((1.0 - bucket.tokens) / self.refill_rate())
            .unwrap_or(Duration::MAX)
    }

    /// Wait until a token is available, then take it.
    pub async fn acquire(&self) {
        loop {
            let wait = self.try_acquire();
            if wait.is_zero() {
                return;
            }
            tracing::debug!(wait_ms = wait.as_millis() as u64, "rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Current token count (after refill). Mostly useful for tests and logs.
    pub fn available(&self) -> f64 {
        let mut bucket = self.lock();
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate()).min(self.capacity);
        bucket.last_refill = now;
        bucket.tokens
    }
}
