//! Task plan files: YAML lists of shell commands with dependencies.
//!
//! ```yaml
//! working_dir: /tmp/build
//! tasks:
//!   - id: fetch
//!     command: curl -sO https://example.com/data.csv
//!     max_retries: 5
//!   - id: count
//!     command: wc -l data.csv
//!     depends_on: [fetch]
//!     priority: high
//!     timeout_ms: 10000
//! ```
//!
//! Each command runs through `sh -c`. A zero exit completes the task with
//! the trimmed stdout as its payload; anything else is a failed attempt.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::process::Command;

use crate::error::{ParaflowError, Result};
use crate::task::{Task, TaskError, TaskPriority};

/// Lines of stderr kept in a failure message.
const STDERR_LINES: usize = 5;

/// A parsed plan file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanFile {
    /// Directory commands run in. Defaults to the caller's.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    pub tasks: Vec<PlanTask>,
}

/// One shell command in a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanTask {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl PlanFile {
    /// Read and validate a plan file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let plan = Self::from_yaml(&content)?;
        tracing::debug!(tasks = plan.tasks.len(), path = %path.display(), "Loaded plan");
        Ok(plan)
    }

    /// Parse and validate plan YAML.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let plan: PlanFile = serde_yaml::from_str(content)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Reject empty ids or commands and repeated ids.
    pub fn validate(&self) -> Result<()> {
        if self.tasks.is_empty() {
            return Err(ParaflowError::Plan("plan has no tasks".to_string()));
        }

        let mut seen = HashSet::new();
        for task in &self.tasks {
            if task.id.trim().is_empty() {
                return Err(ParaflowError::Plan("task with empty id".to_string()));
            }
            if task.command.trim().is_empty() {
                return Err(ParaflowError::Plan(format!("task {} has an empty command", task.id)));
            }
            if task.timeout_ms == Some(0) {
                return Err(ParaflowError::Plan(format!("task {} has a zero timeout", task.id)));
            }
            if !seen.insert(task.id.as_str()) {
                return Err(ParaflowError::DuplicateTaskId(task.id.clone()));
            }
        }
        Ok(())
    }

    /// Build executor tasks, in file order.
    pub fn into_tasks(self) -> Vec<Task<Value>> {
        let working_dir = self.working_dir;
        self.tasks
            .into_iter()
            .map(|entry| entry.into_task(working_dir.clone()))
            .collect()
    }
}

impl PlanTask {
    fn into_task(self, working_dir: Option<PathBuf>) -> Task<Value> {
        let mut task = command_task(self.id, self.command, working_dir)
            .with_priority(self.priority)
            .with_dependencies(self.depends_on);
        if let Some(max_retries) = self.max_retries {
            task = task.with_max_retries(max_retries);
        }
        if let Some(ms) = self.timeout_ms {
            task = task.with_timeout(Duration::from_millis(ms));
        }
        task
    }
}

/// Task that runs `command` through `sh -c`.
///
/// The child is killed if the attempt is dropped, so a timed-out attempt
/// does not leave the process behind.
pub fn command_task(id: impl Into<String>, command: impl Into<String>, working_dir: Option<PathBuf>) -> Task<Value> {
    let command = command.into();
    Task::bind(id, (command, working_dir), |(command, working_dir)| async move {
        run_command(&command, working_dir.as_deref()).await
    })
}

async fn run_command(command: &str, working_dir: Option<&Path>) -> std::result::Result<Value, TaskError> {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", command]).kill_on_drop(true);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    let output = cmd.output().await?;
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

    if output.status.success() {
        return Ok(Value::String(stdout));
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let detail = stderr.lines().take(STDERR_LINES).collect::<Vec<_>>().join("\n");
    let status = match output.status.code() {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    };
    let message = if detail.is_empty() {
        format!("Command failed with {}", status)
    } else {
        format!("Command failed with {}: {}", status, detail)
    };
    Err(TaskError::new(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ParallelExecutor;
    use crate::task::TaskStatus;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const PLAN: &str = r#"
tasks:
  - id: greet
    command: echo hello
  - id: shout
    command: echo HELLO
    depends_on: [greet]
    priority: high
    max_retries: 0
    timeout_ms: 5000
"#;

    #[test]
    fn test_parse_plan() {
        let plan = PlanFile::from_yaml(PLAN).unwrap();
        assert_eq!(plan.tasks.len(), 2);
        assert!(plan.working_dir.is_none());

        let shout = &plan.tasks[1];
        assert_eq!(shout.depends_on, vec!["greet".to_string()]);
        assert_eq!(shout.priority, TaskPriority::High);
        assert_eq!(shout.max_retries, Some(0));
        assert_eq!(shout.timeout_ms, Some(5000));
        assert_eq!(plan.tasks[0].priority, TaskPriority::Normal);
    }

    #[test]
    fn test_into_tasks_carries_settings() {
        let tasks = PlanFile::from_yaml(PLAN).unwrap().into_tasks();
        assert_eq!(tasks[0].id, "greet");
        assert_eq!(tasks[0].max_retries, crate::task::DEFAULT_MAX_RETRIES);
        assert_eq!(tasks[1].dependencies, vec!["greet".to_string()]);
        assert_eq!(tasks[1].timeout, Some(Duration::from_secs(5)));
        assert_eq!(tasks[1].max_retries, 0);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let yaml = r#"
tasks:
  - id: a
    command: "true"
  - id: a
    command: "true"
"#;
        assert!(matches!(PlanFile::from_yaml(yaml), Err(ParaflowError::DuplicateTaskId(id)) if id == "a"));
    }

    #[test]
    fn test_empty_command_rejected() {
        let yaml = "tasks:\n  - id: a\n    command: \"  \"\n";
        assert!(matches!(PlanFile::from_yaml(yaml), Err(ParaflowError::Plan(_))));
    }

    #[test]
    fn test_empty_plan_rejected() {
        assert!(matches!(PlanFile::from_yaml("tasks: []"), Err(ParaflowError::Plan(_))));
    }

    #[test]
    fn test_missing_command_is_yaml_error() {
        assert!(matches!(PlanFile::from_yaml("tasks:\n  - id: a\n"), Err(ParaflowError::Yaml(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(PLAN.as_bytes()).unwrap();

        let plan = PlanFile::load(file.path()).unwrap();
        assert_eq!(plan.tasks.len(), 2);
    }

    #[test]
    fn test_load_missing_file() {
        let result = PlanFile::load(Path::new("/nonexistent/plan.yml"));
        assert!(matches!(result, Err(ParaflowError::Io(_))));
    }

    #[tokio::test]
    async fn test_command_task_captures_stdout() {
        let task = command_task("echo", "echo '  hi there  '", None);
        assert_eq!(task.attempt().await.unwrap(), Value::String("hi there".to_string()));
    }

    #[tokio::test]
    async fn test_command_task_failure_message() {
        let task = command_task("fail", "echo oops >&2; exit 3", None);
        let err = task.attempt().await.unwrap_err();
        assert_eq!(err.message, "Command failed with exit code 3: oops");
    }

    #[tokio::test]
    async fn test_command_task_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "found").unwrap();

        let task = command_task("cat", "cat marker.txt", Some(dir.path().to_path_buf()));
        assert_eq!(task.attempt().await.unwrap(), Value::String("found".to_string()));
    }

    #[tokio::test]
    async fn test_plan_runs_through_executor() {
        let yaml = r#"
tasks:
  - id: first
    command: echo one
  - id: second
    command: exit 1
    depends_on: [first]
    max_retries: 0
  - id: third
    command: echo three
    depends_on: [second]
"#;
        let executor = ParallelExecutor::new(2);
        executor.submit_many(PlanFile::from_yaml(yaml).unwrap().into_tasks()).unwrap();

        let results = executor.execute_all().await;

        assert_eq!(results["first"].result, Some(Value::String("one".to_string())));
        assert_eq!(results["second"].status, TaskStatus::Failed);
        assert_eq!(results["third"].status, TaskStatus::Skipped);
    }
}
