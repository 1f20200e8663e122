//! Adaptive rate limiting driven by recent request outcomes.
//!
//! The limiter keeps a sliding window of the most recent outcomes. When the
//! caller asks it to re-evaluate (`adjust_rate`), a window with too many
//! failures cuts the effective rate and a window of clean successes raises it.
//! The effective rate always stays inside the configured
//! `[min_requests_per_minute, max_requests_per_minute]` band.
//!
//! Failures whose reason classifies as a rate-limit response weigh double.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::ratelimit::limiter::{RateLimit, RateLimitConfig, RateLimiter, RateLimiterStats};
use crate::task::ErrorKind;

/// Number of recent outcomes considered.
pub const ADJUSTMENT_WINDOW: usize = 20;
/// Fewer samples than this never trigger an adjustment.
pub const MIN_SAMPLES: usize = 5;
/// Weighted failure ratio at or above which the rate is cut.
pub const FAILURE_THRESHOLD: f64 = 0.2;
/// Multiplier applied when cutting.
pub const DECREASE_FACTOR: f64 = 0.75;
/// Multiplier applied when raising after a full clean window.
pub const INCREASE_FACTOR: f64 = 1.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    RateLimited,
}

#[derive(Debug)]
struct AdaptiveState {
    current_rpm: f64,
    window: VecDeque<Outcome>,
}

impl AdaptiveState {
    fn push(&mut self, outcome: Outcome) {
        if self.window.len() == ADJUSTMENT_WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(outcome);
    }

    fn weighted_failure_ratio(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let weight: usize = self
            .window
            .iter()
            .map(|o| match o {
                Outcome::Success => 0,
                Outcome::Failure => 1,
                Outcome::RateLimited => 2,
            })
            .sum();
        (weight as f64 / self.window.len() as f64).min(1.0)
    }
}

/// Rate limiter whose effective rate follows observed success/failure history.
#[derive(Debug)]
pub struct AdaptiveRateLimiter {
    inner: RateLimiter,
    state: Mutex<AdaptiveState>,
}

impl AdaptiveRateLimiter {
    /// Create a limiter starting at the configured rate.
    ///
    /// With adjustment enabled, a configured rate outside
    /// `[min_requests_per_minute, max_requests_per_minute]` starts at the
    /// nearest bound instead.
    pub fn new(config: RateLimitConfig) -> Self {
        let configured = f64::from(config.requests_per_minute);
        let min = f64::from(config.min_requests_per_minute);
        let max = f64::from(config.max_requests_per_minute);
        let current_rpm = if config.adaptive_adjustment && min <= max {
            configured.clamp(min, max)
        } else {
            configured
        };

        let inner = RateLimiter::new(config);
        if current_rpm != configured {
            tracing::warn!(
                configured_rpm = configured,
                current_rpm,
                "Configured rate outside adaptive bounds, clamping"
            );
            inner.bucket().set_refill_rate(current_rpm / 60.0);
        }

        Self {
            inner,
            state: Mutex::new(AdaptiveState {
                current_rpm,
                window: VecDeque::with_capacity(ADJUSTMENT_WINDOW),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AdaptiveState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &RateLimitConfig {
        self.inner.config()
    }

    /// Fixed-rate limiter underneath (counters and bucket).
    pub fn inner(&self) -> &RateLimiter {
        &self.inner
    }

    /// Effective requests per minute.
    pub fn current_rpm(&self) -> f64 {
        self.lock().current_rpm
    }

    pub async fn acquire(&self) -> Duration {
        self.inner.acquire().await
    }

    pub fn record_success(&self) {
        self.inner.record_success();
        self.lock().push(Outcome::Success);
    }

    pub fn record_failure(&self, reason: &str) {
        self.inner.record_failure(reason);
        let outcome = if ErrorKind::classify(reason) == ErrorKind::RateLimit {
            Outcome::RateLimited
        } else {
            Outcome::Failure
        };
        self.lock().push(outcome);
    }

    /// Re-evaluate the effective rate from the outcome window.
    ///
    /// Returns the effective rate after evaluation. The window is cleared
    /// whenever the rate changes so the next decision rests on fresh outcomes.
    pub fn adjust_rate(&self) -> f64 {
        let config = self.inner.config();
        let min = f64::from(config.min_requests_per_minute);
        let max = f64::from(config.max_requests_per_minute);

        let mut state = self.lock();
        if !config.adaptive_adjustment || state.window.len() < MIN_SAMPLES {
            return state.current_rpm;
        }

        let previous = state.current_rpm;
        let ratio = state.weighted_failure_ratio();
        let next = if ratio >= FAILURE_THRESHOLD {
            (previous * DECREASE_FACTOR).max(min)
        } else if ratio == 0.0 && state.window.len() >= ADJUSTMENT_WINDOW {
            (previous * INCREASE_FACTOR).max(previous + 1.0).min(max)
        } else {
            previous
        };

        if next != previous {
            state.current_rpm = next;
            state.window.clear();
            drop(state);
            self.inner.bucket().set_refill_rate(next / 60.0);
            tracing::info!(
                previous_rpm = previous,
                current_rpm = next,
                failure_ratio = ratio,
                "Adjusted request rate"
            );
        }

        next
    }

    pub fn get_stats(&self) -> RateLimiterStats {
        let mut stats = self.inner.get_stats();
        stats.requests_per_minute = self.current_rpm();
        stats
    }
}

#[async_trait]
impl RateLimit for AdaptiveRateLimiter {
    async fn acquire(&self) -> Duration {
        AdaptiveRateLimiter::acquire(self).await
    }

    fn record_success(&self) {
        AdaptiveRateLimiter::record_success(self)
    }

    fn record_failure(&self, reason: &str) {
        AdaptiveRateLimiter::record_failure(self, reason)
    }

    fn adjust_rate(&self) {
        AdaptiveRateLimiter::adjust_rate(self);
    }

    fn stats(&self) -> RateLimiterStats {
        self.get_stats()
    }
}
