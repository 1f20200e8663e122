//! Task definition: an opaque unit of work plus its scheduling metadata.
//!
//! The work is stored as a closure producing a fresh future per attempt, so
//! the executor can retry it without knowing what it computes or what
//! arguments it was registered with.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::task::error::TaskError;
use crate::task::priority::TaskPriority;

/// Default number of re-attempts after a first failure.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Future produced by one attempt.
pub type WorkFuture<T> = BoxFuture<'static, Result<T, TaskError>>;

/// Attempt factory shared by every attempt of a task.
pub type TaskWork<T> = Arc<dyn Fn() -> WorkFuture<T> + Send + Sync>;

/// One schedulable unit of work.
pub struct Task<T = serde_json::Value> {
    /// Unique within a batch.
    pub id: String,
    work: TaskWork<T>,
    pub priority: TaskPriority,
    /// Re-attempts allowed after the first failure.
    pub max_retries: u32,
    /// Per-attempt deadline. Falls back to the executor's `task_timeout`.
    pub timeout: Option<Duration>,
    /// Ids that must complete before this task may start, in declaration order.
    pub dependencies: Vec<String>,
}

impl<T: Send + 'static> Task<T> {
    /// Create a task from an async closure.
    pub fn new<F, Fut, E>(id: impl Into<String>, work: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<TaskError> + 'static,
    {
        let work: TaskWork<T> = Arc::new(move || work().map(|r| r.map_err(Into::into)).boxed());
        Self::from_work(id, work)
    }

    /// Create a task whose async closure receives `args`, cloned per attempt.
    pub fn bind<A, F, Fut, E>(id: impl Into<String>, args: A, work: F) -> Self
    where
        A: Clone + Send + Sync + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<TaskError> + 'static,
    {
        Self::new(id, move || work(args.clone()))
    }

    /// Create a task from a blocking closure, run on the blocking thread pool.
    pub fn from_sync<F, E>(id: impl Into<String>, work: F) -> Self
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
        E: Into<TaskError> + Send + 'static,
    {
        let work = Arc::new(work);
        let attempt: TaskWork<T> = Arc::new(move || {
            let work = Arc::clone(&work);
            tokio::task::spawn_blocking(move || work())
                .map(|joined| match joined {
                    Ok(result) => result.map_err(Into::into),
                    Err(e) => Err(TaskError::panicked(e.to_string())),
                })
                .boxed()
        });
        Self::from_work(id, attempt)
    }

    /// Create a task from an already boxed attempt factory.
    pub fn from_work(id: impl Into<String>, work: TaskWork<T>) -> Self {
        Self {
            id: id.into(),
            work,
            priority: TaskPriority::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: None,
            dependencies: Vec::new(),
        }
    }
}

impl<T> Task<T> {
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Add dependencies, ignoring repeats.
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for dep in dependencies {
            self = self.depends_on(dep);
        }
        self
    }

    /// Add one dependency.
    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        let dependency = dependency.into();
        if !self.dependencies.contains(&dependency) {
            self.dependencies.push(dependency);
        }
        self
    }

    /// Start one attempt.
    pub fn attempt(&self) -> WorkFuture<T> {
        (self.work)()
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("max_retries", &self.max_retries)
            .field("timeout", &self.timeout)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}
