//! Parallel executor: drains a batch of dependent tasks under a concurrency cap.
//!
//! One `execute_all` call owns the dispatch loop. Each pass of the loop:
//! 1. Indexes newly submitted tasks as ready, waiting, or skipped
//! 2. Asks the `Scheduler` which ready tasks fit into the free slots
//! 3. Spawns them onto a `JoinSet`, one job per task
//! 4. Waits for the next job to finish and records its terminal result,
//!    which releases or skips (transitively) the tasks waiting on it
//!
//! A job owns its task's retry loop: rate limiter acquisition, the timed
//! attempt, and backoff between attempts. Only the dispatch loop writes
//! terminal results.

use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::error::{ParaflowError, Result};
use crate::executor::config::ExecutorConfig;
use crate::executor::graph::{self, DependencyState};
use crate::executor::retry::RetryPolicy;
use crate::executor::select::{ReadyQueue, Scheduler};
use crate::executor::stats::ExecutorStats;
use crate::ratelimit::{AdaptiveRateLimiter, RateLimit, RateLimiter};
use crate::task::{Task, TaskError, TaskResult, TaskState, TaskStatus};

/// Collections and counters shared between the dispatch loop and its jobs.
///
/// A pending task is identified by its registration sequence number. It is
/// either unindexed (submitted since the loop last looked), waiting on
/// `unmet` dependencies, or in the `ready` queue.
struct ExecutorState<T> {
    /// Not yet started, in registration order.
    pending: BTreeMap<u64, Task<T>>,
    pending_ids: HashMap<String, u64>,
    unindexed: Vec<u64>,
    /// Dependencies of a waiting task that have not completed yet.
    unmet: HashMap<u64, usize>,
    /// Waiting tasks keyed by the in-flight id they wait on.
    dependents: HashMap<String, Vec<u64>>,
    ready: ReadyQueue,
    /// Admitted and not yet terminal.
    running: HashMap<String, TaskState>,
    /// Terminal results, kept across batches.
    completed: HashMap<String, TaskResult<T>>,
    /// Ids submitted since the last `execute_all` returned.
    batch: HashSet<String>,
    next_seq: u64,
    total_tasks: usize,
    successful_tasks: usize,
    failed_tasks: usize,
    skipped_tasks: usize,
}

impl<T> ExecutorState<T> {
    fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
            pending_ids: HashMap::new(),
            unindexed: Vec::new(),
            unmet: HashMap::new(),
            dependents: HashMap::new(),
            ready: ReadyQueue::new(),
            running: HashMap::new(),
            completed: HashMap::new(),
            batch: HashSet::new(),
            next_seq: 0,
            total_tasks: 0,
            successful_tasks: 0,
            failed_tasks: 0,
            skipped_tasks: 0,
        }
    }

    fn register(&mut self, task: Task<T>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending_ids.insert(task.id.clone(), seq);
        self.unindexed.push(seq);
        self.pending.insert(seq, task);
    }

    fn dependency_state(&self, id: &str) -> DependencyState {
        if self.running.contains_key(id) || self.pending_ids.contains_key(id) {
            return DependencyState::InFlight;
        }
        match self.completed.get(id).map(|r| r.status) {
            Some(TaskStatus::Completed) => DependencyState::Completed,
            Some(TaskStatus::Failed) => DependencyState::Failed,
            Some(TaskStatus::Skipped) => DependencyState::Skipped,
            None => DependencyState::Unknown,
        }
    }

    fn is_satisfied(&self, id: &str) -> bool {
        self.completed.get(id).is_some_and(|r| r.is_completed())
    }

    /// Remove a pending task from every index.
    fn take_pending(&mut self, seq: u64) -> Option<Task<T>> {
        let task = self.pending.remove(&seq)?;
        self.pending_ids.remove(&task.id);
        self.unmet.remove(&seq);
        Some(task)
    }

    /// Sort newly submitted tasks into ready, waiting, or skipped.
    fn index_submitted(&mut self) {
        for seq in std::mem::take(&mut self.unindexed) {
            let Some(task) = self.pending.get(&seq) else {
                continue;
            };
            if let Some(reason) = graph::unreachable_dependency(&task.dependencies, |dep| self.dependency_state(dep)) {
                self.skip(seq, reason);
                continue;
            }

            let priority = task.priority;
            let waiting_on: HashSet<String> = task
                .dependencies
                .iter()
                .filter(|dep| !self.is_satisfied(dep))
                .cloned()
                .collect();
            if waiting_on.is_empty() {
                self.ready.push(priority, seq);
                continue;
            }
            self.unmet.insert(seq, waiting_on.len());
            for dep in waiting_on {
                self.dependents.entry(dep).or_default().push(seq);
            }
        }
    }

    /// Remove ready tasks that fit into the free slots, in dispatch order.
    fn take_ready(&mut self, scheduler: &Scheduler) -> Vec<Task<T>> {
        let picked = scheduler.select_ready(&mut self.ready, self.running.len());
        let mut tasks = Vec::with_capacity(picked.len());
        for seq in picked {
            if let Some(task) = self.take_pending(seq) {
                self.running.insert(task.id.clone(), TaskState::Ready);
                tasks.push(task);
            }
        }
        tasks
    }

    fn skip(&mut self, seq: u64, reason: String) {
        if let Some(task) = self.take_pending(seq) {
            tracing::warn!(task_id = %task.id, reason = %reason, "Skipping task");
            self.settle(TaskResult::skipped(task.id, reason));
        }
    }

    /// Record a terminal result, then release or skip the tasks waiting on
    /// it. Skips cascade until nothing else is affected.
    fn settle(&mut self, result: TaskResult<T>) {
        let mut settled = vec![result];
        while let Some(result) = settled.pop() {
            let id = result.task_id.clone();
            match result.status {
                TaskStatus::Completed => self.successful_tasks += 1,
                TaskStatus::Failed => self.failed_tasks += 1,
                TaskStatus::Skipped => self.skipped_tasks += 1,
            }
            self.completed.insert(id.clone(), result);

            let Some(waiters) = self.dependents.remove(&id) else {
                continue;
            };
            match graph::skip_reason(&id, self.dependency_state(&id)) {
                None => {
                    for seq in waiters {
                        self.release(seq);
                    }
                }
                Some(reason) => {
                    for seq in waiters {
                        if let Some(task) = self.take_pending(seq) {
                            tracing::warn!(task_id = %task.id, reason = %reason, "Skipping task");
                            settled.push(TaskResult::skipped(task.id, reason.clone()));
                        }
                    }
                }
            }
        }
    }

    /// One dependency of a waiting task completed.
    fn release(&mut self, seq: u64) {
        let Some(unmet) = self.unmet.get_mut(&seq) else {
            return;
        };
        *unmet -= 1;
        if *unmet > 0 {
            return;
        }
        self.unmet.remove(&seq);
        if let Some(task) = self.pending.get(&seq) {
            self.ready.push(task.priority, seq);
        }
    }

    fn cycles(&self) -> Vec<Vec<String>> {
        graph::find_cycles(self.pending.values().map(|t| (t.id.as_str(), t.dependencies.as_slice())))
    }

    /// Skip the members of every cycle among pending tasks.
    ///
    /// Called when nothing is running and nothing is ready, which means every
    /// pending task waits on another pending task.
    fn break_cycles(&mut self) {
        let mut doomed: Vec<(u64, String)> = Vec::new();
        for cycle in self.cycles() {
            let reason = graph::cycle_reason(&cycle);
            doomed.extend(cycle.iter().filter_map(|id| self.pending_ids.get(id).map(|&seq| (seq, reason.clone()))));
        }
        if doomed.is_empty() {
            doomed = self
                .pending
                .keys()
                .map(|&seq| (seq, "dependencies never became ready".to_string()))
                .collect();
        }

        // Every member leaves the pending set first so each keeps its own reason
        let taken: Vec<(Task<T>, String)> = doomed
            .into_iter()
            .filter_map(|(seq, reason)| self.take_pending(seq).map(|task| (task, reason)))
            .collect();
        for (task, reason) in taken {
            tracing::warn!(task_id = %task.id, reason = %reason, "Skipping task");
            self.settle(TaskResult::skipped(task.id, reason));
        }
    }

    /// Mark everything pending or running skipped and close the batch.
    fn cancel_all(&mut self) {
        let mut cancelled: Vec<String> = self.running.drain().map(|(id, _)| id).collect();
        cancelled.extend(std::mem::take(&mut self.pending).into_values().map(|task| task.id));
        self.pending_ids.clear();
        self.unindexed.clear();
        self.unmet.clear();
        self.dependents.clear();
        self.ready.clear();
        self.batch.clear();

        for id in cancelled {
            tracing::warn!(task_id = %id, "Execution cancelled");
            self.skipped_tasks += 1;
            self.completed.insert(id.clone(), TaskResult::skipped(id, "execution cancelled"));
        }
    }
}

fn lock_state<T>(state: &Mutex<ExecutorState<T>>) -> MutexGuard<'_, ExecutorState<T>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Executes submitted tasks in dependency order with bounded parallelism.
pub struct ParallelExecutor<T = serde_json::Value> {
    scheduler: Scheduler,
    rate_limiter: Option<Arc<dyn RateLimit>>,
    adaptive_scheduling: bool,
    task_timeout: Option<Duration>,
    retry_policy: RetryPolicy,
    state: Arc<Mutex<ExecutorState<T>>>,
    run_lock: tokio::sync::Mutex<()>,
}

impl<T> Default for ParallelExecutor<T>
where
    T: Clone + Send + 'static,
{
    /// Three slots, no rate limiter.
    fn default() -> Self {
        Self::new(ExecutorConfig::default().max_concurrent_tasks)
    }
}

impl<T> ParallelExecutor<T>
where
    T: Clone + Send + 'static,
{
    /// Create an executor without a rate limiter.
    pub fn new(max_concurrent_tasks: usize) -> Self {
        Self {
            scheduler: Scheduler::new(max_concurrent_tasks),
            rate_limiter: None,
            adaptive_scheduling: true,
            task_timeout: None,
            retry_policy: RetryPolicy::default(),
            state: Arc::new(Mutex::new(ExecutorState::new())),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Create an executor from validated configuration.
    ///
    /// With rate limiting enabled, the limiter is adaptive when
    /// `rate_limit.adaptive_adjustment` is set and fixed otherwise.
    pub fn from_config(config: &ExecutorConfig) -> Result<Self> {
        config.validate()?;

        let rate_limiter: Option<Arc<dyn RateLimit>> = if !config.enable_rate_limiting {
            None
        } else if config.rate_limit.adaptive_adjustment {
            Some(Arc::new(AdaptiveRateLimiter::new(config.rate_limit.clone())))
        } else {
            Some(Arc::new(RateLimiter::new(config.rate_limit.clone())))
        };

        tracing::debug!(
            max_concurrent = config.max_concurrent_tasks,
            rate_limited = rate_limiter.is_some(),
            adaptive = config.enable_adaptive_scheduling,
            "Creating parallel executor"
        );

        let mut executor = Self::new(config.max_concurrent_tasks)
            .with_adaptive_scheduling(config.enable_adaptive_scheduling)
            .with_retry_policy(config.retry_policy());
        executor.rate_limiter = rate_limiter;
        executor.task_timeout = config.task_timeout();
        Ok(executor)
    }

    pub fn with_rate_limiter(mut self, rate_limiter: Arc<dyn RateLimit>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    /// Default per-attempt deadline for tasks without their own.
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = Some(timeout);
        self
    }

    /// Whether the rate limiter re-evaluates its rate after each outcome.
    pub fn with_adaptive_scheduling(mut self, enabled: bool) -> Self {
        self.adaptive_scheduling = enabled;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn max_concurrent_tasks(&self) -> usize {
        self.scheduler.max_concurrent()
    }

    pub fn rate_limiter(&self) -> Option<&Arc<dyn RateLimit>> {
        self.rate_limiter.as_ref()
    }

    fn lock(&self) -> MutexGuard<'_, ExecutorState<T>> {
        lock_state(&self.state)
    }

    /// Register one task for the next `execute_all`.
    pub fn submit(&self, task: Task<T>) -> Result<()> {
        self.submit_many([task])
    }

    /// Register several tasks. Either all are registered or, on a duplicate
    /// id, none are.
    pub fn submit_many<I>(&self, tasks: I) -> Result<()>
    where
        I: IntoIterator<Item = Task<T>>,
    {
        let tasks: Vec<Task<T>> = tasks.into_iter().collect();
        let mut state = self.lock();

        let mut seen = HashSet::new();
        for task in &tasks {
            if state.batch.contains(&task.id) || !seen.insert(task.id.as_str()) {
                return Err(ParaflowError::DuplicateTaskId(task.id.clone()));
            }
        }

        for task in tasks {
            tracing::debug!(task_id = %task.id, dependencies = ?task.dependencies, "Task submitted");
            // A resubmitted id must not satisfy dependents with its old result
            state.completed.remove(&task.id);
            state.batch.insert(task.id.clone());
            state.total_tasks += 1;
            state.register(task);
        }
        Ok(())
    }

    /// Run every pending task to a terminal state.
    ///
    /// Returns the results of the tasks submitted since the previous call.
    /// Task failures are reported in the map, never as an error. Dropping the
    /// returned future aborts in-flight attempts and marks every running or
    /// pending task skipped.
    pub async fn execute_all(&self) -> HashMap<String, TaskResult<T>> {
        let _run = self.run_lock.lock().await;
        let mut jobs: JoinSet<TaskResult<T>> = JoinSet::new();
        let mut job_ids: HashMap<tokio::task::Id, String> = HashMap::new();
        let mut guard = RunGuard {
            state: &self.state,
            armed: true,
        };

        let batch_size = self.lock().batch.len();
        tracing::info!(
            tasks = batch_size,
            max_concurrent = self.scheduler.max_concurrent(),
            "Executing batch"
        );
        let started = Instant::now();

        loop {
            let to_start = {
                let mut state = self.lock();
                state.index_submitted();
                let to_start = state.take_ready(&self.scheduler);
                if to_start.is_empty() && state.running.is_empty() {
                    if state.pending.is_empty() {
                        break;
                    }
                    state.break_cycles();
                    continue;
                }
                to_start
            };

            for task in to_start {
                tracing::debug!(task_id = %task.id, priority = %task.priority, "Dispatching task");
                let task_id = task.id.clone();
                let handle = jobs.spawn(run_task(task, self.job_context()));
                job_ids.insert(handle.id(), task_id);
            }

            let result = match jobs.join_next_with_id().await {
                Some(Ok((id, result))) => {
                    job_ids.remove(&id);
                    result
                }
                Some(Err(e)) => {
                    let Some(task_id) = job_ids.remove(&e.id()) else {
                        continue;
                    };
                    tracing::error!(task_id = %task_id, error = %e, "Task job aborted");
                    TaskResult::failed(task_id, TaskError::panicked(e.to_string()), 0, Utc::now(), Duration::ZERO)
                }
                None => continue,
            };
            self.finish(result);
        }
        guard.armed = false;

        let mut state = self.lock();
        let batch = std::mem::take(&mut state.batch);
        let results: HashMap<String, TaskResult<T>> = batch
            .into_iter()
            .filter_map(|id| state.completed.get(&id).map(|r| (id, r.clone())))
            .collect();

        tracing::info!(
            tasks = results.len(),
            completed = results.values().filter(|r| r.is_completed()).count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch finished"
        );
        results
    }

    fn job_context(&self) -> JobContext<T> {
        JobContext {
            state: Arc::clone(&self.state),
            rate_limiter: self.rate_limiter.clone(),
            task_timeout: self.task_timeout,
            retry_policy: self.retry_policy,
        }
    }

    /// Record a terminal result and feed the outcome to the rate limiter.
    fn finish(&self, result: TaskResult<T>) {
        match result.status {
            TaskStatus::Completed => tracing::info!(
                task_id = %result.task_id,
                retries = result.retry_count,
                duration_ms = result.duration.as_millis() as u64,
                "Task completed"
            ),
            TaskStatus::Failed => tracing::error!(
                task_id = %result.task_id,
                retries = result.retry_count,
                error = result.error_message().unwrap_or_default(),
                "Task failed"
            ),
            TaskStatus::Skipped => {}
        }

        if let Some(limiter) = &self.rate_limiter {
            match result.status {
                TaskStatus::Completed => limiter.record_success(),
                TaskStatus::Failed => limiter.record_failure(result.error_message().unwrap_or("unknown error")),
                TaskStatus::Skipped => {}
            }
            if self.adaptive_scheduling {
                limiter.adjust_rate();
            }
        }

        let mut state = self.lock();
        state.running.remove(&result.task_id);
        state.settle(result);
    }

    /// Read-only snapshot of counters and collection sizes.
    pub fn get_stats(&self) -> ExecutorStats {
        let state = self.lock();
        ExecutorStats {
            total_tasks: state.total_tasks,
            successful_tasks: state.successful_tasks,
            failed_tasks: state.failed_tasks,
            skipped_tasks: state.skipped_tasks,
            success_rate: ExecutorStats::success_rate(state.successful_tasks, state.total_tasks),
            pending_tasks: state.pending.len(),
            running_tasks: state.running.len(),
            completed_tasks: state.completed.len(),
            rate_limiter: self.rate_limiter.as_ref().map(|l| l.stats()),
        }
    }

    /// Current lifecycle state of a task, `None` for unknown ids.
    pub fn get_state(&self, task_id: &str) -> Option<TaskState> {
        let state = self.lock();
        if let Some(s) = state.running.get(task_id) {
            return Some(*s);
        }
        if state.pending_ids.contains_key(task_id) {
            return Some(TaskState::Pending);
        }
        state.completed.get(task_id).map(|r| r.status.into())
    }

    /// Terminal result of a task from any batch.
    pub fn result(&self, task_id: &str) -> Option<TaskResult<T>> {
        self.lock().completed.get(task_id).cloned()
    }

    /// Ids of pending tasks, in registration order.
    pub fn pending_ids(&self) -> Vec<String> {
        self.lock().pending.values().map(|t| t.id.clone()).collect()
    }

    /// Cycles among pending tasks.
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        self.lock().cycles()
    }

    /// Layered start order of pending tasks; cycle members are left out.
    pub fn execution_plan(&self) -> Vec<Vec<String>> {
        let state = self.lock();
        graph::execution_levels(state.pending.values().map(|t| (t.id.as_str(), t.dependencies.as_slice())))
    }

    /// Eagerly reject unknown dependencies and cycles among pending tasks.
    ///
    /// Optional: `execute_all` skips such tasks instead of failing.
    pub fn validate_dependencies(&self) -> Result<()> {
        let state = self.lock();
        for task in state.pending.values() {
            for dep in &task.dependencies {
                if state.dependency_state(dep) == DependencyState::Unknown {
                    return Err(ParaflowError::UnknownDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        match state.cycles().into_iter().next() {
            Some(cycle) => Err(ParaflowError::DependencyCycle(cycle)),
            None => Ok(()),
        }
    }
}

/// Cancels the batch if `execute_all` is dropped mid-run.
struct RunGuard<'a, T> {
    state: &'a Mutex<ExecutorState<T>>,
    armed: bool,
}

impl<T> Drop for RunGuard<'_, T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        lock_state(self.state).cancel_all();
    }
}

/// What a job needs from its executor.
struct JobContext<T> {
    state: Arc<Mutex<ExecutorState<T>>>,
    rate_limiter: Option<Arc<dyn RateLimit>>,
    task_timeout: Option<Duration>,
    retry_policy: RetryPolicy,
}

impl<T> JobContext<T> {
    fn set_state(&self, task_id: &str, task_state: TaskState) {
        let mut state = lock_state(&self.state);
        if let Some(s) = state.running.get_mut(task_id) {
            *s = task_state;
        }
    }
}

/// Drive one task through its attempts until it completes or fails for good.
async fn run_task<T: Send + 'static>(task: Task<T>, ctx: JobContext<T>) -> TaskResult<T> {
    let started_at = Utc::now();
    let clock = Instant::now();
    let timeout = task.timeout.or(ctx.task_timeout);
    let mut retry_count = 0;

    loop {
        if let Some(limiter) = &ctx.rate_limiter {
            let waited = limiter.acquire().await;
            if !waited.is_zero() {
                tracing::debug!(task_id = %task.id, waited_ms = waited.as_millis() as u64, "Rate limited");
            }
        }

        ctx.set_state(&task.id, TaskState::Running);
        match attempt_once(&task, timeout).await {
            Ok(value) => {
                return TaskResult::completed(task.id, value, retry_count, started_at, clock.elapsed());
            }
            Err(error) if error.is_retryable() && retry_count < task.max_retries => {
                retry_count += 1;
                let delay = ctx.retry_policy.delay_for(retry_count);
                tracing::warn!(
                    task_id = %task.id,
                    retry = retry_count,
                    max_retries = task.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Attempt failed, retrying"
                );
                ctx.set_state(&task.id, TaskState::Retrying);
                tokio::time::sleep(delay).await;
            }
            Err(error) => {
                return TaskResult::failed(task.id, error, retry_count, started_at, clock.elapsed());
            }
        }
    }
}

/// One attempt, timed and with panics turned into errors.
async fn attempt_once<T: Send + 'static>(task: &Task<T>, timeout: Option<Duration>) -> std::result::Result<T, TaskError> {
    let future = match std::panic::catch_unwind(AssertUnwindSafe(|| task.attempt())) {
        Ok(future) => future,
        Err(payload) => return Err(TaskError::panicked(panic_message(&*payload))),
    };
    let guarded = AssertUnwindSafe(future).catch_unwind();

    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, guarded).await {
            Ok(outcome) => outcome,
            Err(_) => return Err(TaskError::timeout(limit)),
        },
        None => guarded.await,
    };

    outcome.unwrap_or_else(|payload| Err(TaskError::panicked(panic_message(&*payload))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "task panicked".to_string())
}
