//! Executor statistics snapshot.

use serde::{Deserialize, Serialize};

use crate::ratelimit::RateLimiterStats;

/// Point-in-time view of an executor's counters and collections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorStats {
    /// Tasks ever submitted.
    pub total_tasks: usize,
    pub successful_tasks: usize,
    pub failed_tasks: usize,
    pub skipped_tasks: usize,
    /// successful / total, 0 when nothing was submitted.
    pub success_rate: f64,
    pub pending_tasks: usize,
    pub running_tasks: usize,
    /// Terminal results held, any status.
    pub completed_tasks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limiter: Option<RateLimiterStats>,
}

impl ExecutorStats {
    pub(crate) fn success_rate(successful: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            successful as f64 / total as f64
        }
    }

    /// Tasks that ended without completing.
    pub fn unsuccessful_tasks(&self) -> usize {
        self.failed_tasks + self.skipped_tasks
    }
}
