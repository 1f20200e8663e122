//! Token bucket with lazy, continuous refill.
//!
//! Tokens are refilled from elapsed wall-clock time whenever the bucket is
//! touched; there is no background timer. When a caller asks for more tokens
//! than are available, the bucket books the wait up front (pushing its refill
//! clock into the future) and the caller sleeps outside the lock, so queued
//! callers are granted in the order they arrived.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Slowest refill rate accepted, in tokens per second.
pub const MIN_REFILL_RATE: f64 = 1e-6;

/// Longest wait a single reservation books.
const MAX_WAIT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    refill_rate: f64,
    /// Point up to which refill has been accounted for. Ahead of `now` while
    /// earlier callers are still waiting for tokens they already reserved.
    last_refill: Instant,
}

impl BucketState {
    fn refill(&mut self, now: Instant, capacity: f64) {
        if now > self.last_refill {
            let elapsed = (now - self.last_refill).as_secs_f64();
            self.tokens = (self.tokens + elapsed * self.refill_rate).min(capacity);
            self.last_refill = now;
        }
    }
}

/// Rate-limiting counter with a fixed capacity and a continuous refill rate.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        let capacity = f64::from(capacity);
        Self {
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity,
                refill_rate: refill_rate.max(MIN_REFILL_RATE),
                last_refill: Instant::now(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Maximum number of tokens the bucket holds.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens left as of the last acquisition (refill is not applied here).
    pub fn tokens(&self) -> f64 {
        self.lock().tokens
    }

    /// Current refill rate in tokens per second.
    pub fn refill_rate(&self) -> f64 {
        self.lock().refill_rate
    }

    /// Change the refill rate. Time elapsed so far is credited at the old rate.
    pub fn set_refill_rate(&self, refill_rate: f64) {
        let mut state = self.lock();
        state.refill(Instant::now(), self.capacity);
        state.refill_rate = refill_rate.max(MIN_REFILL_RATE);
    }

    /// Take `n` tokens and return how long the caller must wait before they
    /// count as granted. Does not sleep.
    pub fn reserve(&self, n: u32) -> Duration {
        let n = f64::from(n);
        let now = Instant::now();
        let mut state = self.lock();
        state.refill(now, self.capacity);

        if state.tokens >= n {
            state.tokens -= n;
            return Duration::ZERO;
        }

        let deficit = n - state.tokens;
        let base = state.last_refill.max(now);
        let wait = Duration::try_from_secs_f64(deficit / state.refill_rate)
            .unwrap_or(MAX_WAIT)
            .min(MAX_WAIT);
        let ready_at = base + wait;
        state.tokens = 0.0;
        state.last_refill = ready_at;

        ready_at - now
    }

    /// Take `n` tokens, sleeping until they are available.
    ///
    /// Returns the delay that was waited (zero when tokens were on hand).
    pub async fn acquire(&self, n: u32) -> Duration {
        let delay = self.reserve(n);
        if !delay.is_zero() {
            tracing::trace!(delay_ms = delay.as_millis() as u64, tokens = n, "Waiting for tokens");
            tokio::time::sleep(delay).await;
        }
        delay
    }
}
