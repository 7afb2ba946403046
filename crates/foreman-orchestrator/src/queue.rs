//! Bounded priority queue for not-yet-dispatched tasks.

use crate::types::Task;
use foreman_core::{ForemanError, ForemanResult};
use std::collections::VecDeque;
use uuid::Uuid;

/// A queued task plus the monotonic sequence number that makes ordering
/// stable among equal priorities.
#[derive(Debug)]
struct Entry {
    seq: u64,
    task: Task,
}

/// Bounded queue ordered by descending priority, FIFO within a priority.
///
/// Retried tasks live in a separate front lane that is always drained
/// before normally queued tasks, FIFO among themselves. `enqueue` on a
/// full queue fails immediately; there is no blocking and no eviction.
/// O(n) scans are fine at the intended scale (tens to low hundreds).
#[derive(Debug)]
pub struct TaskQueue {
    capacity: usize,
    next_seq: u64,
    retries: VecDeque<Task>,
    entries: Vec<Entry>,
}

impl TaskQueue {
    /// Create a queue with a fixed capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_seq: 0,
            retries: VecDeque::new(),
            entries: Vec::new(),
        }
    }

    /// Add a task, failing with [`ForemanError::QueueFull`] at capacity.
    pub fn enqueue(&mut self, task: Task) -> ForemanResult<Uuid> {
        if self.len() >= self.capacity {
            return Err(ForemanError::QueueFull {
                capacity: self.capacity,
            });
        }
        let id = task.id;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(Entry { seq, task });
        Ok(id)
    }

    /// Put a retried task at the front of the queue, ahead of all normally
    /// queued tasks. Retries are FIFO among themselves.
    ///
    /// Exempt from the capacity check: the task already held a
    /// queue-or-worker slot, so total in-flight work stays bounded.
    pub fn requeue_front(&mut self, task: Task) {
        self.retries.push_back(task);
    }

    /// Remove and return the next task to dispatch, or `None` when empty.
    pub fn dequeue(&mut self) -> Option<Task> {
        if let Some(task) = self.retries.pop_front() {
            return Some(task);
        }
        let best = self
            .entries
            .iter()
            .enumerate()
            .max_by_key(|(_, e)| (e.task.priority, std::cmp::Reverse(e.seq)))?;
        let idx = best.0;
        Some(self.entries.remove(idx).task)
    }

    /// Peek at the next task to dispatch without removing it.
    pub fn peek(&self) -> Option<&Task> {
        if let Some(task) = self.retries.front() {
            return Some(task);
        }
        self.entries
            .iter()
            .max_by_key(|e| (e.task.priority, std::cmp::Reverse(e.seq)))
            .map(|e| &e.task)
    }

    /// Number of queued tasks, retries included.
    pub fn len(&self) -> usize {
        self.retries.len() + self.entries.len()
    }

    /// Whether the queue holds no tasks.
    pub fn is_empty(&self) -> bool {
        self.retries.is_empty() && self.entries.is_empty()
    }

    /// The fixed capacity set at construction.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
