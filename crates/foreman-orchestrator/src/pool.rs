//! Worker pool bookkeeping: spawn, affinity matching, reaping.
//!
//! The pool is plain data owned by the dispatcher; nothing here is shared
//! or locked. All status transitions go through the dispatcher's single
//! control flow.

use crate::dispatcher::DispatcherEvent;
use crate::types::{WorkerInfo, WorkerStatus};
use crate::worker::{spawn_worker, WorkerCommand, WORKER_MAILBOX};
use chrono::{DateTime, Utc};
use foreman_core::{ForemanError, ForemanResult, TaskType};
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

/// Dispatcher-side record of one worker execution context.
#[derive(Debug)]
pub(crate) struct WorkerSlot {
    pub id: Uuid,
    /// The task type this worker last ran; used to prefer affinity matches.
    pub affinity: TaskType,
    pub status: WorkerStatus,
    /// Set iff the worker is running.
    pub current_task: Option<Uuid>,
    pub tasks_completed: u64,
    pub error_count: u64,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// When the worker last became idle; drives reaping decisions.
    pub idle_since: Instant,
    /// Command mailbox into the worker task.
    pub mailbox: mpsc::Sender<WorkerCommand>,
    /// Join handle of the worker task; aborted when the worker cannot be
    /// stopped through its mailbox.
    pub join: JoinHandle<()>,
}

impl WorkerSlot {
    fn snapshot(&self) -> WorkerInfo {
        WorkerInfo {
            id: self.id,
            type_affinity: self.affinity.clone(),
            status: self.status,
            current_task: self.current_task,
            tasks_completed: self.tasks_completed,
            error_count: self.error_count,
            started_at: self.started_at,
            last_activity_at: self.last_activity_at,
        }
    }
}

/// The set of workers, bounded by `max_workers`.
#[derive(Debug)]
pub(crate) struct WorkerPool {
    max_workers: usize,
    workers: HashMap<Uuid, WorkerSlot>,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers,
            workers: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn active_count(&self) -> usize {
        self.workers
            .values()
            .filter(|w| w.status == WorkerStatus::Running)
            .count()
    }

    pub fn can_spawn(&self) -> bool {
        self.workers.len() < self.max_workers
    }

    /// Spawn a new worker with the given initial affinity.
    ///
    /// Fails with [`ForemanError::WorkerSpawn`] if the pool is already at
    /// `max_workers`; the pool is unchanged in that case.
    pub fn spawn(
        &mut self,
        affinity: TaskType,
        events: mpsc::WeakSender<DispatcherEvent>,
    ) -> ForemanResult<Uuid> {
        if !self.can_spawn() {
            return Err(ForemanError::WorkerSpawn(format!(
                "pool already at max_workers ({})",
                self.max_workers
            )));
        }

        let id = Uuid::new_v4();
        let (mailbox, mailbox_rx) = mpsc::channel(WORKER_MAILBOX);
        let join = spawn_worker(id, mailbox_rx, events);
        let now = Utc::now();

        debug!(worker_id = %id, affinity = %affinity, "worker spawned");
        self.workers.insert(
            id,
            WorkerSlot {
                id,
                affinity,
                status: WorkerStatus::Idle,
                current_task: None,
                tasks_completed: 0,
                error_count: 0,
                started_at: now,
                last_activity_at: now,
                idle_since: Instant::now(),
                mailbox,
                join,
            },
        );
        Ok(id)
    }

    /// Pick an idle worker for a task type: affinity match first, then any
    /// idle worker.
    pub fn select_idle(&self, task_type: &TaskType) -> Option<Uuid> {
        let idle = || {
            self.workers
                .values()
                .filter(|w| w.status == WorkerStatus::Idle)
        };
        idle()
            .find(|w| &w.affinity == task_type)
            .or_else(|| idle().next())
            .map(|w| w.id)
    }

    pub fn get(&self, id: Uuid) -> Option<&WorkerSlot> {
        self.workers.get(&id)
    }

    /// Transition a worker into Running for the given task, rewriting its
    /// affinity to the task's type.
    pub fn mark_running(&mut self, id: Uuid, task_id: Uuid, task_type: &TaskType) {
        if let Some(worker) = self.workers.get_mut(&id) {
            worker.status = WorkerStatus::Running;
            worker.current_task = Some(task_id);
            worker.affinity = task_type.clone();
            worker.last_activity_at = Utc::now();
        }
    }

    /// Transition a worker back to Idle after an attempt finished (in any
    /// way), updating its counters.
    pub fn mark_idle(&mut self, id: Uuid, attempt_failed: bool) {
        if let Some(worker) = self.workers.get_mut(&id) {
            worker.status = WorkerStatus::Idle;
            worker.current_task = None;
            worker.last_activity_at = Utc::now();
            worker.idle_since = Instant::now();
            if attempt_failed {
                worker.error_count += 1;
            } else {
                worker.tasks_completed += 1;
            }
        }
    }

    /// Remove a worker from the pool. Removed workers are never reused.
    pub fn remove(&mut self, id: Uuid) -> Option<WorkerSlot> {
        self.workers.remove(&id)
    }

    /// Read-only snapshots of every worker.
    pub fn snapshot(&self) -> Vec<WorkerInfo> {
        let mut infos: Vec<WorkerInfo> = self.workers.values().map(WorkerSlot::snapshot).collect();
        infos.sort_by_key(|w| w.started_at);
        infos
    }

    /// Iterate over the workers (shutdown path).
    pub fn iter(&self) -> impl Iterator<Item = &WorkerSlot> {
        self.workers.values()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn events() -> mpsc::WeakSender<DispatcherEvent> {
        mpsc::channel(8).0.downgrade()
    }

    #[tokio::test]
    async fn test_spawn_respects_max_workers() {
        let mut pool = WorkerPool::new(2);
        pool.spawn(TaskType::new("a"), events()).unwrap();
        pool.spawn(TaskType::new("b"), events()).unwrap();
        assert_eq!(pool.len(), 2);
        assert!(!pool.can_spawn());

        let err = pool.spawn(TaskType::new("c"), events()).unwrap_err();
        assert!(matches!(err, ForemanError::WorkerSpawn(_)));
        // Pool size unchanged on spawn failure
        assert_eq!(pool.len(), 2);
    }

    #[tokio::test]
    async fn test_select_prefers_affinity() {
        let mut pool = WorkerPool::new(3);
        let monitor = pool.spawn(TaskType::new("monitor"), events()).unwrap();
        let _research = pool.spawn(TaskType::new("research"), events()).unwrap();

        assert_eq!(pool.select_idle(&TaskType::new("monitor")), Some(monitor));
    }

    #[tokio::test]
    async fn test_select_falls_back_to_any_idle() {
        let mut pool = WorkerPool::new(2);
        let only = pool.spawn(TaskType::new("monitor"), events()).unwrap();
        assert_eq!(pool.select_idle(&TaskType::new("research")), Some(only));
    }

    #[tokio::test]
    async fn test_running_workers_are_not_selected() {
        let mut pool = WorkerPool::new(2);
        let worker = pool.spawn(TaskType::new("monitor"), events()).unwrap();
        pool.mark_running(worker, Uuid::new_v4(), &TaskType::new("monitor"));

        assert_eq!(pool.select_idle(&TaskType::new("monitor")), None);
        assert_eq!(pool.active_count(), 1);
    }

    #[tokio::test]
    async fn test_mark_running_rewrites_affinity() {
        let mut pool = WorkerPool::new(1);
        let worker = pool.spawn(TaskType::new("monitor"), events()).unwrap();
        pool.mark_running(worker, Uuid::new_v4(), &TaskType::new("research"));

        assert_eq!(
            pool.get(worker).unwrap().affinity,
            TaskType::new("research")
        );
    }

    #[tokio::test]
    async fn test_mark_idle_updates_counters() {
        let mut pool = WorkerPool::new(1);
        let worker = pool.spawn(TaskType::new("t"), events()).unwrap();

        pool.mark_running(worker, Uuid::new_v4(), &TaskType::new("t"));
        pool.mark_idle(worker, false);
        pool.mark_running(worker, Uuid::new_v4(), &TaskType::new("t"));
        pool.mark_idle(worker, true);

        let slot = pool.get(worker).unwrap();
        assert_eq!(slot.tasks_completed, 1);
        assert_eq!(slot.error_count, 1);
        assert_eq!(slot.status, WorkerStatus::Idle);
        assert!(slot.current_task.is_none());
    }

    #[tokio::test]
    async fn test_remove_frees_a_slot() {
        let mut pool = WorkerPool::new(1);
        let worker = pool.spawn(TaskType::new("t"), events()).unwrap();
        assert!(!pool.can_spawn());

        pool.remove(worker).unwrap();
        assert!(pool.can_spawn());
        assert_eq!(pool.len(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_shape() {
        let mut pool = WorkerPool::new(2);
        let worker = pool.spawn(TaskType::new("monitor"), events()).unwrap();
        let task_id = Uuid::new_v4();
        pool.mark_running(worker, task_id, &TaskType::new("monitor"));

        let snapshot = pool.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, worker);
        assert_eq!(snapshot[0].current_task, Some(task_id));
        assert_eq!(snapshot[0].status, WorkerStatus::Running);
    }
}
