//! Paraflow - dependency-aware parallel task execution
//!
//! Paraflow runs a batch of opaque async jobs in dependency order under a
//! concurrency cap, retrying failures with exponential backoff and throttling
//! task starts through a token-bucket rate limiter that can adapt its rate to
//! observed failures.

pub mod error;
pub mod executor;
pub mod plan;
pub mod ratelimit;
pub mod task;

pub use error::{ParaflowError, Result};
pub use executor::{ExecutorConfig, ExecutorStats, ParallelExecutor, RetryPolicy};
pub use ratelimit::{AdaptiveRateLimiter, RateLimit, RateLimitConfig, RateLimiter, RateLimiterStats, TokenBucket};
pub use task::{ErrorKind, Task, TaskError, TaskPriority, TaskResult, TaskState, TaskStatus};
