//! Task lifecycle states and terminal results.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::task::error::TaskError;

/// Where a task is in its lifecycle.
///
/// `Pending -> Ready -> Running -> {Completed | Retrying -> Running | Failed}`,
/// or `Pending -> Skipped` when a dependency can never complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Ready,
    Running,
    Retrying,
    Completed,
    Failed,
    Skipped,
}

impl TaskState {
    /// Completed, failed or skipped.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed | TaskState::Skipped)
    }

    /// Holding a concurrency slot.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskState::Running | TaskState::Retrying)
    }
}

impl From<TaskStatus> for TaskState {
    fn from(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Completed => TaskState::Completed,
            TaskStatus::Failed => TaskState::Failed,
            TaskStatus::Skipped => TaskState::Skipped,
        }
    }
}

/// Terminal outcome of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Completed,
    Failed,
    Skipped,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Immutable record of how a task ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult<T> {
    pub task_id: String,
    pub status: TaskStatus,
    /// Payload on success.
    pub result: Option<T>,
    /// Last error on failure, or the reason a task was skipped.
    pub error: Option<TaskError>,
    /// Attempts beyond the first.
    pub retry_count: u32,
    /// From first start to termination, backoff included. Zero when skipped.
    pub duration: Duration,
    /// When the first attempt started. `None` when skipped.
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
}

impl<T> TaskResult<T> {
    pub fn completed(
        task_id: impl Into<String>,
        value: T,
        retry_count: u32,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Completed,
            result: Some(value),
            error: None,
            retry_count,
            duration,
            started_at: Some(started_at),
            finished_at: Utc::now(),
        }
    }

    pub fn failed(
        task_id: impl Into<String>,
        error: TaskError,
        retry_count: u32,
        started_at: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Failed,
            result: None,
            error: Some(error),
            retry_count,
            duration,
            started_at: Some(started_at),
            finished_at: Utc::now(),
        }
    }

    pub fn skipped(task_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Skipped,
            result: None,
            error: Some(TaskError::skipped(reason)),
            retry_count: 0,
            duration: Duration::ZERO,
            started_at: None,
            finished_at: Utc::now(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    /// Error message, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::error::ErrorKind;

    #[test]
    fn test_task_state_terminal() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Skipped.is_terminal());
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Ready.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(!TaskState::Retrying.is_terminal());
    }

    #[test]
    fn test_task_state_active() {
        assert!(TaskState::Running.is_active());
        assert!(TaskState::Retrying.is_active());
        assert!(!TaskState::Ready.is_active());
    }

    #[test]
    fn test_status_to_state() {
        assert_eq!(TaskState::from(TaskStatus::Completed), TaskState::Completed);
        assert_eq!(TaskState::from(TaskStatus::Skipped), TaskState::Skipped);
    }

    #[test]
    fn test_completed_result() {
        let started = Utc::now();
        let result = TaskResult::completed("a", 7, 1, started, Duration::from_millis(10));
        assert!(result.is_completed());
        assert_eq!(result.result, Some(7));
        assert_eq!(result.retry_count, 1);
        assert!(result.error.is_none());
        assert!(result.finished_at >= started);
    }

    #[test]
    fn test_failed_result() {
        let result: TaskResult<()> = TaskResult::failed(
            "a",
            TaskError::new("boom"),
            3,
            Utc::now(),
            Duration::from_secs(1),
        );
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.error_message(), Some("boom"));
        assert!(result.result.is_none());
    }

    #[test]
    fn test_skipped_result() {
        let result: TaskResult<()> = TaskResult::skipped("b", "dependency a failed");
        assert_eq!(result.status, TaskStatus::Skipped);
        assert_eq!(result.retry_count, 0);
        assert!(result.started_at.is_none());
        assert_eq!(result.error.as_ref().map(|e| e.kind), Some(ErrorKind::DependencyUnavailable));
    }

    #[test]
    fn test_result_serializes() {
        let result = TaskResult::completed("a", "ok".to_string(), 0, Utc::now(), Duration::ZERO);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["task_id"], "a");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["result"], "ok");
    }
}
