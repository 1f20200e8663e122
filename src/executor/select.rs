//! Scheduler for selecting which ready tasks to start.
//!
//! The executor moves a task into the `ReadyQueue` once every dependency has
//! completed. The Scheduler then picks from the queue based on:
//! - Priority (higher first; registration order among equals)
//! - Concurrency limit (never more than `max_concurrent` running)

use std::cmp::Reverse;
use std::collections::BTreeSet;

use crate::task::TaskPriority;

/// Sort key of a ready task: priority descending, then registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct DispatchKey {
    priority: Reverse<TaskPriority>,
    seq: u64,
}

/// Registration sequence numbers of tasks whose dependencies have all
/// completed, kept in dispatch order.
#[derive(Debug, Default)]
pub struct ReadyQueue {
    keys: BTreeSet<DispatchKey>,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, priority: TaskPriority, seq: u64) {
        self.keys.insert(DispatchKey {
            priority: Reverse(priority),
            seq,
        });
    }

    fn pop(&mut self) -> Option<u64> {
        self.keys.pop_first().map(|key| key.seq)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }
}

/// Scheduler for selecting ready tasks.
#[derive(Debug, Clone)]
pub struct Scheduler {
    max_concurrent: usize,
}

impl Scheduler {
    /// Create a Scheduler with the given concurrency ceiling (at least 1).
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Get the maximum concurrent tasks.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Free slots given how many tasks are running.
    pub fn available_slots(&self, currently_running: usize) -> usize {
        self.max_concurrent.saturating_sub(currently_running)
    }

    /// Take as many tasks off `ready` as there are free slots.
    ///
    /// Returns sequence numbers highest priority first and FIFO among equal
    /// priorities.
    pub fn select_ready(&self, ready: &mut ReadyQueue, currently_running: usize) -> Vec<u64> {
        let available_slots = self.available_slots(currently_running);
        let mut picked = Vec::with_capacity(available_slots.min(ready.len()));
        while picked.len() < available_slots {
            match ready.pop() {
                Some(seq) => picked.push(seq),
                None => break,
            }
        }
        picked
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(3)
    }
}
