//! Task model: definitions, priorities, errors and results.
//!
//! The executor treats a task as an opaque attempt factory with an id,
//! dependencies, a priority, a retry budget and an optional timeout.

mod definition;
mod error;
mod priority;
mod result;

pub use definition::{DEFAULT_MAX_RETRIES, Task, TaskWork, WorkFuture};
pub use error::{ErrorKind, TaskError};
pub use priority::TaskPriority;
pub use result::{TaskResult, TaskState, TaskStatus};
