//! Executor configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ParaflowError, Result};
use crate::executor::retry::RetryPolicy;
use crate::ratelimit::RateLimitConfig;

/// Configuration for a `ParallelExecutor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Hard ceiling on simultaneously running tasks.
    pub max_concurrent_tasks: usize,
    /// Throttle task starts through a rate limiter.
    pub enable_rate_limiting: bool,
    pub rate_limit: RateLimitConfig,
    /// Let the adaptive limiter re-evaluate its rate after every outcome.
    pub enable_adaptive_scheduling: bool,
    /// Per-attempt deadline for tasks that do not set their own.
    pub task_timeout_ms: Option<u64>,
    /// Backoff unit; retry n waits `backoff_base_ms * 2^n`.
    pub backoff_base_ms: u64,
    /// Cap on a single backoff wait.
    pub max_backoff_ms: Option<u64>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 3,
            enable_rate_limiting: true,
            rate_limit: RateLimitConfig::default(),
            enable_adaptive_scheduling: true,
            task_timeout_ms: None,
            backoff_base_ms: 1000,
            max_backoff_ms: None,
        }
    }
}

impl ExecutorConfig {
    /// Create config with the given concurrency and defaults elsewhere.
    pub fn new(max_concurrent_tasks: usize) -> Self {
        Self {
            max_concurrent_tasks,
            ..Self::default()
        }
    }

    pub fn with_rate_limiting(mut self, enabled: bool) -> Self {
        self.enable_rate_limiting = enabled;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_adaptive_scheduling(mut self, enabled: bool) -> Self {
        self.enable_adaptive_scheduling = enabled;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Option<Duration>) -> Self {
        self.backoff_base_ms = base.as_millis() as u64;
        self.max_backoff_ms = max.map(|m| m.as_millis() as u64);
        self
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_ms.map(Duration::from_millis)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.backoff_base_ms),
            self.max_backoff_ms.map(Duration::from_millis),
        )
    }

    /// Reject configurations the executor cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_tasks == 0 {
            return Err(ParaflowError::InvalidConfig(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        if self.task_timeout_ms == Some(0) {
            return Err(ParaflowError::InvalidConfig("task_timeout_ms must be positive".to_string()));
        }
        if self.enable_rate_limiting {
            self.rate_limit.validate()?;
        }
        Ok(())
    }
}
