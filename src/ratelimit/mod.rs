//! Flow control for outbound work.
//!
//! This module provides:
//! - **TokenBucket**: lazily refilled token counter, the rate-limiting primitive.
//! - **RateLimiter**: fixed requests-per-minute budget with outcome counters.
//! - **AdaptiveRateLimiter**: raises or lowers the budget from recent outcomes.
//! - **RateLimit**: the trait the executor consumes, implemented by both limiters.

mod adaptive;
mod bucket;
mod limiter;

pub use adaptive::{
    ADJUSTMENT_WINDOW, AdaptiveRateLimiter, DECREASE_FACTOR, FAILURE_THRESHOLD, INCREASE_FACTOR, MIN_SAMPLES,
};
pub use bucket::{MIN_REFILL_RATE, TokenBucket};
pub use limiter::{RateLimit, RateLimitConfig, RateLimiter, RateLimiterStats};
