//! Request rate limiting on top of a token bucket.
//!
//! A `RateLimiter` turns a requests-per-minute budget into a token bucket
//! (one token per request, `burst_capacity` tokens deep) and keeps outcome
//! counters for statistics. The counters never influence the rate here; see
//! `AdaptiveRateLimiter` for the feedback-driven variant.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ParaflowError, Result};
use crate::ratelimit::bucket::TokenBucket;

/// Rate limit configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Sustained request budget.
    pub requests_per_minute: u32,
    /// How many requests may go out back-to-back before throttling kicks in.
    pub burst_capacity: u32,
    /// Use the adaptive limiter instead of a fixed rate.
    pub adaptive_adjustment: bool,
    /// Floor for adaptive adjustment.
    pub min_requests_per_minute: u32,
    /// Ceiling for adaptive adjustment.
    pub max_requests_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            burst_capacity: 10,
            adaptive_adjustment: true,
            min_requests_per_minute: 10,
            max_requests_per_minute: 120,
        }
    }
}

impl RateLimitConfig {
    /// Create config with a fixed rate and burst, keeping the default band.
    pub fn new(requests_per_minute: u32, burst_capacity: u32) -> Self {
        Self {
            requests_per_minute,
            burst_capacity,
            ..Self::default()
        }
    }

    /// Set the adaptive adjustment flag.
    pub fn with_adaptive(mut self, adaptive: bool) -> Self {
        self.adaptive_adjustment = adaptive;
        self
    }

    /// Set the [min, max] band used by adaptive adjustment.
    pub fn with_bounds(mut self, min_requests_per_minute: u32, max_requests_per_minute: u32) -> Self {
        self.min_requests_per_minute = min_requests_per_minute;
        self.max_requests_per_minute = max_requests_per_minute;
        self
    }

    /// Refill rate of the backing bucket, in tokens per second.
    pub fn refill_rate(&self) -> f64 {
        f64::from(self.requests_per_minute) / 60.0
    }

    /// Reject configurations the limiter cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.requests_per_minute == 0 {
            return Err(ParaflowError::InvalidConfig(
                "requests_per_minute must be positive".to_string(),
            ));
        }
        if self.burst_capacity == 0 {
            return Err(ParaflowError::InvalidConfig("burst_capacity must be positive".to_string()));
        }
        if self.adaptive_adjustment {
            if self.min_requests_per_minute == 0 {
                return Err(ParaflowError::InvalidConfig(
                    "min_requests_per_minute must be positive".to_string(),
                ));
            }
            if self.min_requests_per_minute > self.max_requests_per_minute {
                return Err(ParaflowError::InvalidConfig(format!(
                    "min_requests_per_minute ({}) exceeds max_requests_per_minute ({})",
                    self.min_requests_per_minute, self.max_requests_per_minute
                )));
            }
            if !(self.min_requests_per_minute..=self.max_requests_per_minute).contains(&self.requests_per_minute) {
                return Err(ParaflowError::InvalidConfig(format!(
                    "requests_per_minute ({}) outside [{}, {}]",
                    self.requests_per_minute, self.min_requests_per_minute, self.max_requests_per_minute
                )));
            }
        }
        Ok(())
    }
}

/// Snapshot of limiter counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterStats {
    pub total_requests: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// success / (success + failure), 0 with no recorded outcomes.
    pub success_rate: f64,
    /// Effective rate at snapshot time.
    pub requests_per_minute: f64,
    pub tokens_available: f64,
}

/// Interface the executor uses to throttle task starts.
#[async_trait]
pub trait RateLimit: Send + Sync {
    /// Wait until one request may go out; returns the delay waited.
    async fn acquire(&self) -> Duration;

    /// Record a successful request.
    fn record_success(&self);

    /// Record a failed request with a human-readable reason.
    fn record_failure(&self, reason: &str);

    /// Re-evaluate the effective rate from recorded outcomes. No-op for fixed limiters.
    fn adjust_rate(&self) {}

    /// Read-only counters snapshot.
    fn stats(&self) -> RateLimiterStats;
}

/// Fixed-rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    bucket: TokenBucket,
    total_requests: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter sized from `config`.
    pub fn new(config: RateLimitConfig) -> Self {
        let bucket = TokenBucket::new(config.burst_capacity, config.refill_rate());
        Self {
            config,
            bucket,
            total_requests: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Backing bucket.
    pub fn bucket(&self) -> &TokenBucket {
        &self.bucket
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn success_count(&self) -> u64 {
        self.success_count.load(Ordering::Relaxed)
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// Wait for one request slot.
    pub async fn acquire(&self) -> Duration {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.bucket.acquire(1).await
    }

    pub fn record_success(&self) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, reason: &str) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(reason = %reason, "Rate limiter recorded failure");
    }

    /// Counters snapshot.
    pub fn get_stats(&self) -> RateLimiterStats {
        let success = self.success_count();
        let failure = self.failure_count();
        let outcomes = success + failure;
        RateLimiterStats {
            total_requests: self.total_requests(),
            success_count: success,
            failure_count: failure,
            success_rate: if outcomes == 0 {
                0.0
            } else {
                success as f64 / outcomes as f64
            },
            requests_per_minute: self.bucket.refill_rate() * 60.0,
            tokens_available: self.bucket.tokens(),
        }
    }
}

#[async_trait]
impl RateLimit for RateLimiter {
    async fn acquire(&self) -> Duration {
        RateLimiter::acquire(self).await
    }

    fn record_success(&self) {
        RateLimiter::record_success(self)
    }

    fn record_failure(&self, reason: &str) {
        RateLimiter::record_failure(self, reason)
    }

    fn stats(&self) -> RateLimiterStats {
        self.get_stats()
    }
}
