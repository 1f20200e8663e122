//! Executor pipeline integration tests
//!
//! Drives the public API end to end: dependency ordering, retries, skips,
//! and rate limiting of task starts.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use paraflow::plan::PlanFile;
use paraflow::{
    AdaptiveRateLimiter, ExecutorConfig, ParallelExecutor, ParaflowError, RateLimit, RateLimitConfig, RateLimiter,
    Result, Task, TaskError, TaskStatus, TokenBucket,
};
use tempfile::TempDir;
use tokio::time::Instant;

/// Task that appends its id to `order` when it runs.
fn recording_task(id: &str, order: &Arc<Mutex<Vec<String>>>) -> Task<String> {
    Task::bind(id, (id.to_string(), Arc::clone(order)), |(id, order)| async move {
        order.lock().unwrap().push(id.clone());
        Ok::<_, TaskError>(format!("result-{}", id))
    })
}

/// Integration test: A, B (after A), C (after A and B) all complete in order
#[tokio::test(start_paused = true)]
async fn test_dependency_chain_completes_in_order() -> Result<()> {
    let executor = ParallelExecutor::new(3);
    let order = Arc::new(Mutex::new(Vec::new()));

    executor.submit(recording_task("A", &order))?;
    executor.submit(recording_task("B", &order).depends_on("A"))?;
    executor.submit(recording_task("C", &order).with_dependencies(["A", "B"]))?;

    let results = executor.execute_all().await;

    assert_eq!(results.len(), 3);
    assert!(results.values().all(|r| r.status == TaskStatus::Completed));
    assert_eq!(*order.lock().unwrap(), vec!["A", "B", "C"]);
    assert_eq!(results["C"].result.as_deref(), Some("result-C"));
    Ok(())
}

/// Integration test: work failing twice then succeeding ends with two retries
#[tokio::test(start_paused = true)]
async fn test_flaky_task_retries_until_success() -> Result<()> {
    let executor = ParallelExecutor::new(1);
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);

    executor.submit(
        Task::new("failing-task", move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt < 3 {
                    Err(TaskError::new(format!("Temporary error {}", attempt)))
                } else {
                    Ok("Success".to_string())
                }
            }
        })
        .with_max_retries(3),
    )?;

    let results = executor.execute_all().await;

    assert_eq!(results["failing-task"].status, TaskStatus::Completed);
    assert_eq!(results["failing-task"].retry_count, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    Ok(())
}

/// Integration test: a permanent failure skips its whole downstream while siblings finish
#[tokio::test(start_paused = true)]
async fn test_failure_skips_downstream_only() -> Result<()> {
    let executor = ParallelExecutor::new(4);
    let order = Arc::new(Mutex::new(Vec::new()));

    executor.submit_many([
        Task::new("extract", || async { Err::<String, _>(TaskError::permanent("400 Bad Request")) }),
        recording_task("transform", &order).depends_on("extract"),
        recording_task("load", &order).depends_on("transform"),
        recording_task("report", &order),
    ])?;

    let results = executor.execute_all().await;

    assert_eq!(results["extract"].status, TaskStatus::Failed);
    assert_eq!(results["extract"].retry_count, 0);
    assert_eq!(results["transform"].status, TaskStatus::Skipped);
    assert_eq!(results["load"].status, TaskStatus::Skipped);
    assert_eq!(results["report"].status, TaskStatus::Completed);
    assert_eq!(*order.lock().unwrap(), vec!["report"]);

    let stats = executor.get_stats();
    assert_eq!(stats.successful_tasks, 1);
    assert_eq!(stats.failed_tasks, 1);
    assert_eq!(stats.skipped_tasks, 2);
    assert_eq!(stats.success_rate, 0.25);
    Ok(())
}

/// Integration test: a task that always fails gets exactly max_retries + 1 attempts
#[tokio::test(start_paused = true)]
async fn test_always_failing_task_uses_whole_budget() -> Result<()> {
    let executor = ParallelExecutor::new(1);
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);

    executor.submit(
        Task::new("locked", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<String, _>(TaskError::new("Access denied: cache file locked")) }
        })
        .with_max_retries(3),
    )?;

    let results = executor.execute_all().await;

    assert_eq!(results["locked"].status, TaskStatus::Failed);
    assert_eq!(results["locked"].retry_count, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    Ok(())
}

/// Integration test: mutually dependent tasks are skipped instead of hanging
#[tokio::test(start_paused = true)]
async fn test_cycle_terminates() -> Result<()> {
    let executor = ParallelExecutor::new(2);
    let order = Arc::new(Mutex::new(Vec::new()));

    executor.submit_many([
        recording_task("X", &order).depends_on("Y"),
        recording_task("Y", &order).depends_on("X"),
    ])?;
    assert!(matches!(executor.validate_dependencies(), Err(ParaflowError::DependencyCycle(_))));

    let results = tokio::time::timeout(Duration::from_secs(5), executor.execute_all())
        .await
        .expect("cycle must not hang the executor");

    assert_eq!(results["X"].status, TaskStatus::Skipped);
    assert_eq!(results["Y"].status, TaskStatus::Skipped);
    assert!(order.lock().unwrap().is_empty());
    Ok(())
}

/// Integration test: six tasks through a 30 rpm / burst 3 limiter are spread out
#[tokio::test(start_paused = true)]
async fn test_full_pipeline_with_rate_limiting() -> Result<()> {
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig::new(30, 3).with_adaptive(false)));
    let executor = ParallelExecutor::new(2)
        .with_rate_limiter(limiter.clone())
        .with_adaptive_scheduling(false);

    let request_times = Arc::new(Mutex::new(Vec::new()));
    for i in 0..6 {
        let times = Arc::clone(&request_times);
        executor.submit(Task::new(format!("task-{}", i), move || {
            let times = Arc::clone(&times);
            async move {
                times.lock().unwrap().push(Instant::now());
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<_, TaskError>(format!("result-{}", i))
            }
        }))?;
    }

    let start = Instant::now();
    let results = executor.execute_all().await;
    let elapsed = start.elapsed();

    assert_eq!(results.len(), 6);
    assert!(results.values().all(|r| r.status == TaskStatus::Completed));
    assert!(elapsed > Duration::from_secs(1), "elapsed {:?}", elapsed);

    let times = request_times.lock().unwrap();
    let intervals: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    assert!(intervals.iter().any(|gap| *gap > Duration::from_millis(500)));

    assert_eq!(limiter.get_stats().total_requests, 6);
    assert_eq!(limiter.get_stats().success_count, 6);
    Ok(())
}

/// Integration test: executor built from config gets an adaptive limiter
#[tokio::test(start_paused = true)]
async fn test_executor_from_config() -> Result<()> {
    let config = ExecutorConfig::new(2).with_rate_limit(RateLimitConfig::new(120, 5));
    let executor: ParallelExecutor<String> = ParallelExecutor::from_config(&config)?;

    executor.submit_many((0..4).map(|i| Task::new(format!("t{}", i), move || async move { Ok::<_, TaskError>(i.to_string()) })))?;
    let results = executor.execute_all().await;

    assert_eq!(results.len(), 4);
    let stats = executor.get_stats();
    let limiter = stats.rate_limiter.expect("rate limiting is enabled by default");
    assert_eq!(limiter.total_requests, 4);
    assert_eq!(limiter.success_rate, 1.0);
    Ok(())
}

/// Integration test: adaptive limiter stays inside its band under pressure
#[tokio::test(start_paused = true)]
async fn test_adaptive_limiter_band() {
    let config = RateLimitConfig::new(60, 10).with_bounds(30, 90);
    let limiter = AdaptiveRateLimiter::new(config);

    for _ in 0..10 {
        for _ in 0..5 {
            limiter.record_failure("Rate limit exceeded");
        }
        RateLimit::adjust_rate(&limiter);
    }
    assert_eq!(limiter.current_rpm(), 30.0);

    for _ in 0..20 {
        for _ in 0..20 {
            limiter.record_success();
        }
        RateLimit::adjust_rate(&limiter);
    }
    assert_eq!(limiter.current_rpm(), 90.0);
}

/// Integration test: draining a fresh bucket is free, the next token is not
#[tokio::test(start_paused = true)]
async fn test_token_bucket_drain_then_wait() {
    let bucket = TokenBucket::new(10, 2.0);

    assert_eq!(bucket.acquire(10).await, Duration::ZERO);

    let delay = bucket.acquire(1).await;
    assert!(delay >= Duration::from_millis(490) && delay <= Duration::from_millis(510), "delay {:?}", delay);
}

/// Integration test: a plan file on disk runs shell commands in dependency order
#[tokio::test]
async fn test_plan_file_end_to_end() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let plan_path = temp_dir.path().join("plan.yml");
    let plan = format!(
        r#"
working_dir: {}
tasks:
  - id: write
    command: echo data > out.txt
  - id: read
    command: cat out.txt
    depends_on: [write]
"#,
        temp_dir.path().display()
    );
    std::fs::write(&plan_path, plan)?;

    let executor = ParallelExecutor::new(2);
    executor.submit_many(PlanFile::load(&plan_path)?.into_tasks())?;
    let results = executor.execute_all().await;

    assert_eq!(results["write"].status, TaskStatus::Completed);
    assert_eq!(results["read"].result, Some(serde_json::Value::String("data".to_string())));
    Ok(())
}
