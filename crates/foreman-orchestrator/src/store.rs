//! Result store and task status machine.

use crate::types::{TaskResult, TaskStatus};
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

/// Check if a status transition is allowed.
///
/// `Queued → Running → {Completed | Errored | Terminated}`, with
/// `Running → Queued` for retries. Terminal states allow nothing further.
fn can_transition(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
        (from, to),
        (Queued, Running) | (Running, Completed) | (Running, Errored) | (Running, Terminated)
        // Retry path: back in the queue without a recorded result
        | (Running, Queued)
    )
}

/// Map from task id to lifecycle status and final outcome.
///
/// Owned exclusively by the dispatcher. Results are written exactly once
/// per task; both status and result are immutable once terminal.
#[derive(Debug, Default)]
pub(crate) struct ResultStore {
    statuses: HashMap<Uuid, TaskStatus>,
    results: HashMap<Uuid, TaskResult>,
    completed_count: usize,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly submitted task as Queued.
    pub fn insert_queued(&mut self, task_id: Uuid) {
        self.statuses.insert(task_id, TaskStatus::Queued);
    }

    /// Apply a status transition, refusing invalid ones.
    pub fn transition(&mut self, task_id: Uuid, to: TaskStatus) -> bool {
        let Some(current) = self.statuses.get_mut(&task_id) else {
            warn!(task_id = %task_id, to = %to, "transition for unknown task ignored");
            return false;
        };
        if !can_transition(*current, to) {
            warn!(task_id = %task_id, from = %current, to = %to, "invalid transition ignored");
            return false;
        }
        *current = to;
        if to.is_terminal() {
            self.completed_count += 1;
        }
        true
    }

    /// Record a task's final outcome. Write-once: a second write for the
    /// same task is ignored.
    pub fn record(&mut self, result: TaskResult) {
        if self.results.contains_key(&result.task_id) {
            warn!(task_id = %result.task_id, "duplicate result ignored");
            return;
        }
        self.results.insert(result.task_id, result);
    }

    /// Current status for a task id; `Unknown` for ids never submitted.
    pub fn status(&self, task_id: Uuid) -> TaskStatus {
        self.statuses
            .get(&task_id)
            .copied()
            .unwrap_or(TaskStatus::Unknown)
    }

    /// The final outcome for a task, if it has reached one.
    pub fn result(&self, task_id: Uuid) -> Option<&TaskResult> {
        self.results.get(&task_id)
    }

    /// Number of tasks that have reached a terminal state.
    pub fn completed_count(&self) -> usize {
        self.completed_count
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_id_returns_unknown() {
        let store = ResultStore::new();
        assert_eq!(store.status(Uuid::new_v4()), TaskStatus::Unknown);
        assert!(store.result(Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut store = ResultStore::new();
        let id = Uuid::new_v4();
        store.insert_queued(id);
        assert_eq!(store.status(id), TaskStatus::Queued);

        assert!(store.transition(id, TaskStatus::Running));
        assert!(store.transition(id, TaskStatus::Completed));
        assert_eq!(store.status(id), TaskStatus::Completed);
        assert_eq!(store.completed_count(), 1);
    }

    #[test]
    fn test_terminal_states_are_immutable() {
        let mut store = ResultStore::new();
        let id = Uuid::new_v4();
        store.insert_queued(id);
        store.transition(id, TaskStatus::Running);
        store.transition(id, TaskStatus::Errored);

        assert!(!store.transition(id, TaskStatus::Running));
        assert!(!store.transition(id, TaskStatus::Completed));
        assert_eq!(store.status(id), TaskStatus::Errored);
        assert_eq!(store.completed_count(), 1);
    }

    #[test]
    fn test_retry_goes_back_to_queued() {
        let mut store = ResultStore::new();
        let id = Uuid::new_v4();
        store.insert_queued(id);
        store.transition(id, TaskStatus::Running);

        assert!(store.transition(id, TaskStatus::Queued));
        assert_eq!(store.status(id), TaskStatus::Queued);
        // No terminal state reached yet
        assert_eq!(store.completed_count(), 0);
    }

    #[test]
    fn test_cannot_skip_running() {
        let mut store = ResultStore::new();
        let id = Uuid::new_v4();
        store.insert_queued(id);
        assert!(!store.transition(id, TaskStatus::Completed));
        assert_eq!(store.status(id), TaskStatus::Queued);
    }

    #[test]
    fn test_result_write_once() {
        let mut store = ResultStore::new();
        let id = Uuid::new_v4();
        store.record(TaskResult::success(id, serde_json::json!("first"), 10));
        store.record(TaskResult::success(id, serde_json::json!("second"), 20));

        let result = store.result(id).unwrap();
        assert_eq!(result.data, Some(serde_json::json!("first")));
        assert_eq!(result.duration_ms, 10);
    }
}
