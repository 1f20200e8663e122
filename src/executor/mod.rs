//! Dependency-aware parallel execution.
//!
//! This module provides:
//! - **ParallelExecutor**: runs a batch of tasks in dependency order under a concurrency cap
//! - **Scheduler**: picks which ready tasks to start next (priority, then FIFO)
//! - **RetryPolicy**: exponential backoff between attempts
//! - **graph**: cycle detection and skip propagation helpers

mod config;
pub mod graph;
mod parallel;
mod retry;
mod select;
mod stats;

pub use config::ExecutorConfig;
pub use parallel::ParallelExecutor;
pub use retry::RetryPolicy;
pub use select::{ReadyQueue, Scheduler};
pub use stats::ExecutorStats;
