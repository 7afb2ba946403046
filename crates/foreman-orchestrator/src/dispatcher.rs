//! The dispatcher: single-writer control flow over queue, pool, and store.
//!
//! Every external trigger — a submission, a query, a worker message, a
//! timeout fire, an idle sweep — arrives as one [`DispatcherEvent`] on one
//! ordered channel consumed by one tokio task. Queue and pool state are
//! mutated nowhere else, which makes timeout and crash transitions
//! race-free by construction. Waiting for a free worker is event-driven:
//! matching re-runs when a worker-became-idle event is consumed, never on
//! a polling interval.

use crate::config::OrchestratorConfig;
use crate::events::{EventBus, OrchestratorEvent};
use crate::handler::HandlerRegistry;
use crate::pool::WorkerPool;
use crate::queue::TaskQueue;
use crate::store::ResultStore;
use crate::types::{PoolStatus, Task, TaskResult, TaskSpec, TaskStatus, WorkerInfo};
use crate::worker::{WorkerCommand, WorkerEvent};
use foreman_core::{ForemanError, ForemanResult};
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Request/reply commands from the public API surface.
#[derive(Debug)]
pub(crate) enum Command {
    Submit {
        spec: TaskSpec,
        reply: oneshot::Sender<ForemanResult<Uuid>>,
    },
    Status {
        task_id: Uuid,
        reply: oneshot::Sender<TaskStatus>,
    },
    GetResult {
        task_id: Uuid,
        reply: oneshot::Sender<Option<TaskResult>>,
    },
    ListWorkers {
        reply: oneshot::Sender<Vec<WorkerInfo>>,
    },
    PoolStatus {
        reply: oneshot::Sender<PoolStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// The single ordered event stream the dispatcher consumes.
#[derive(Debug)]
pub(crate) enum DispatcherEvent {
    /// A public API command.
    Command(Command),
    /// A message from a worker.
    Worker(WorkerEvent),
    /// A task's timeout timer fired. `attempt` is the attempt counter the
    /// timer was armed for; a timer from an earlier attempt of a retried
    /// task is stale.
    TaskTimeout {
        worker_id: Uuid,
        task_id: Uuid,
        attempt: u32,
    },
    /// An idle-reaping timer fired for a worker. `idle_since` is the
    /// idle mark the timer was armed against; if the worker has worked
    /// since, the marks differ and the sweep is stale.
    IdleSweep {
        worker_id: Uuid,
        idle_since: Instant,
    },
}

impl From<WorkerEvent> for DispatcherEvent {
    fn from(event: WorkerEvent) -> Self {
        Self::Worker(event)
    }
}

/// A dispatched task awaiting its terminal outcome.
#[derive(Debug)]
struct ActiveTask {
    task: Task,
    worker_id: Uuid,
    started: Instant,
}

/// Public handle to a running orchestrator. Cheap to clone; all methods
/// go through the dispatcher's event channel.
///
/// The dispatcher only holds weak references to its own channel, so
/// dropping the last handle without calling [`shutdown`](Self::shutdown)
/// ends the dispatcher loop and stops its workers.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    tx: mpsc::Sender<DispatcherEvent>,
    events: broadcast::Sender<OrchestratorEvent>,
}

impl Orchestrator {
    /// Start the dispatcher loop with the given configuration and handler
    /// registry, returning the public handle.
    pub fn start(config: OrchestratorConfig, registry: HandlerRegistry) -> Self {
        let (tx, rx) = mpsc::channel(config.event_buffer.max(1));
        let bus = EventBus::new(config.event_buffer.max(1));
        let events = bus.sender();

        let dispatcher = Dispatcher {
            queue: TaskQueue::new(config.task_queue_size),
            pool: WorkerPool::new(config.max_workers.max(1)),
            store: ResultStore::new(),
            active: HashMap::new(),
            registry: Arc::new(registry),
            bus,
            self_tx: tx.downgrade(),
            config,
        };
        tokio::spawn(dispatcher.run(rx));

        Self { tx, events }
    }

    /// Submit a task for execution. Fails synchronously with
    /// [`ForemanError::QueueFull`] at capacity or
    /// [`ForemanError::HandlerNotFound`] for unregistered types.
    pub async fn submit(&self, spec: TaskSpec) -> ForemanResult<Uuid> {
        self.request(|reply| Command::Submit { spec, reply }).await?
    }

    /// Lifecycle status for a task id; `Unknown` for ids never submitted.
    pub async fn status(&self, task_id: Uuid) -> ForemanResult<TaskStatus> {
        self.request(|reply| Command::Status { task_id, reply }).await
    }

    /// Final outcome for a task, if it has reached one. Idempotent.
    pub async fn result(&self, task_id: Uuid) -> ForemanResult<Option<TaskResult>> {
        self.request(|reply| Command::GetResult { task_id, reply })
            .await
    }

    /// Read-only snapshots of all workers.
    pub async fn list_workers(&self) -> ForemanResult<Vec<WorkerInfo>> {
        self.request(|reply| Command::ListWorkers { reply }).await
    }

    /// Aggregate pool counters.
    pub async fn pool_status(&self) -> ForemanResult<PoolStatus> {
        self.request(|reply| Command::PoolStatus { reply }).await
    }

    /// Subscribe to lifecycle events. Delivery never blocks the
    /// dispatcher; a lagging subscriber loses the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    /// Stop all workers and end the dispatcher loop. Queued tasks keep
    /// their last recorded status.
    pub async fn shutdown(&self) -> ForemanResult<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> ForemanResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(DispatcherEvent::Command(command(reply_tx)))
            .await
            .map_err(|_| ForemanError::Orchestrator("dispatcher unavailable".to_string()))?;
        reply_rx
            .await
            .map_err(|_| ForemanError::Orchestrator("dispatcher dropped the request".to_string()))
    }
}

struct Dispatcher {
    config: OrchestratorConfig,
    registry: Arc<HandlerRegistry>,
    queue: TaskQueue,
    pool: WorkerPool,
    store: ResultStore,
    active: HashMap<Uuid, ActiveTask>,
    bus: EventBus,
    /// Weak sender into the dispatcher's own channel, for timers and
    /// workers. Weak so that only public handles keep the loop alive.
    self_tx: mpsc::WeakSender<DispatcherEvent>,
}

impl Dispatcher {
    async fn run(mut self, mut rx: mpsc::Receiver<DispatcherEvent>) {
        info!(
            max_workers = self.config.max_workers,
            task_queue_size = self.config.task_queue_size,
            auto_scaling = self.config.enable_auto_scaling,
            "dispatcher started"
        );
        while let Some(event) = rx.recv().await {
            let flow = match event {
                DispatcherEvent::Command(command) => self.handle_command(command),
                DispatcherEvent::Worker(worker_event) => {
                    self.handle_worker_event(worker_event);
                    ControlFlow::Continue(())
                }
                DispatcherEvent::TaskTimeout {
                    worker_id,
                    task_id,
                    attempt,
                } => {
                    self.handle_timeout(worker_id, task_id, attempt);
                    ControlFlow::Continue(())
                }
                DispatcherEvent::IdleSweep {
                    worker_id,
                    idle_since,
                } => {
                    self.handle_idle_sweep(worker_id, idle_since);
                    ControlFlow::Continue(())
                }
            };
            if flow.is_break() {
                break;
            }
        }
        info!("dispatcher stopped");
    }

    fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Submit { spec, reply } => {
                let _ = reply.send(self.submit(spec));
            }
            Command::Status { task_id, reply } => {
                let _ = reply.send(self.store.status(task_id));
            }
            Command::GetResult { task_id, reply } => {
                let _ = reply.send(self.store.result(task_id).cloned());
            }
            Command::ListWorkers { reply } => {
                let _ = reply.send(self.pool.snapshot());
            }
            Command::PoolStatus { reply } => {
                let _ = reply.send(PoolStatus {
                    worker_count: self.pool.len(),
                    active_worker_count: self.pool.active_count(),
                    queued_count: self.queue.len(),
                    completed_count: self.store.completed_count(),
                });
            }
            Command::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn submit(&mut self, spec: TaskSpec) -> ForemanResult<Uuid> {
        if !self.registry.contains(&spec.task_type) {
            return Err(ForemanError::HandlerNotFound(
                spec.task_type.as_str().to_string(),
            ));
        }

        let task = Task::from_spec(spec);
        let task_id = self.queue.enqueue(task.clone())?;
        self.store.insert_queued(task_id);
        info!(
            task_id = %task_id,
            task_type = %task.task_type,
            priority = task.priority,
            "task queued"
        );
        self.bus.emit(OrchestratorEvent::TaskQueued {
            task_id,
            task_type: task.task_type,
            priority: task.priority,
        });

        self.try_dispatch();
        Ok(task_id)
    }

    /// Match queue head to workers until no task or no worker is left.
    fn try_dispatch(&mut self) {
        loop {
            let Some(head) = self.queue.peek() else {
                return;
            };
            let task_type = head.task_type.clone();

            let worker_id = match self.pool.select_idle(&task_type) {
                Some(id) => id,
                None if self.pool.can_spawn() => {
                    match self.pool.spawn(task_type.clone(), self.self_tx.clone()) {
                        Ok(id) => {
                            self.bus.emit(OrchestratorEvent::WorkerCreated {
                                worker_id: id,
                                task_type: task_type.clone(),
                            });
                            id
                        }
                        Err(e) => {
                            // Pool unchanged; the task stays queued.
                            error!(error = %e, "worker spawn failed");
                            return;
                        }
                    }
                }
                // All workers busy at the ceiling; re-evaluated on the
                // next worker-idle event.
                None => return,
            };

            let Some(task) = self.queue.dequeue() else {
                return;
            };
            self.dispatch(task, worker_id);
        }
    }

    fn dispatch(&mut self, task: Task, worker_id: Uuid) {
        let task_id = task.id;
        let Some(handler) = self.registry.get(&task.task_type) else {
            // Unreachable after submit-time validation; fail the task
            // rather than lose it.
            self.store.transition(task_id, TaskStatus::Running);
            self.store.transition(task_id, TaskStatus::Errored);
            self.store.record(TaskResult::failure(
                task_id,
                format!("no handler for task type '{}'", task.task_type),
                0,
            ));
            return;
        };

        let Some(slot) = self.pool.get(worker_id) else {
            self.queue.requeue_front(task);
            return;
        };

        if let Err(e) = slot
            .mailbox
            .try_send(WorkerCommand::Execute(Box::new(task.clone()), handler))
        {
            // The worker is gone or wedged; evict it and keep the task.
            warn!(worker_id = %worker_id, error = %e, "worker mailbox rejected execute; evicting");
            self.evict_worker(worker_id);
            self.queue.requeue_front(task);
            return;
        }

        self.pool.mark_running(worker_id, task_id, &task.task_type);
        self.store.transition(task_id, TaskStatus::Running);

        if let Some(timeout) = task.timeout {
            self.arm_timeout(worker_id, task_id, task.attempts, timeout);
        }

        info!(
            task_id = %task_id,
            worker_id = %worker_id,
            task_type = %task.task_type,
            attempt = task.attempts + 1,
            "task dispatched"
        );
        self.bus
            .emit(OrchestratorEvent::TaskStarted { task_id, worker_id });
        self.active.insert(
            task_id,
            ActiveTask {
                task,
                worker_id,
                started: Instant::now(),
            },
        );
    }

    fn arm_timeout(&self, worker_id: Uuid, task_id: Uuid, attempt: u32, timeout: Duration) {
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let Some(tx) = tx.upgrade() else {
                return;
            };
            let _ = tx
                .send(DispatcherEvent::TaskTimeout {
                    worker_id,
                    task_id,
                    attempt,
                })
                .await;
        });
    }

    fn handle_worker_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Progress {
                worker_id,
                task_id,
                completed,
                total,
                message,
            } => {
                if !self.is_current(worker_id, task_id) {
                    debug!(task_id = %task_id, "stale progress ignored");
                    return;
                }
                self.bus.emit(OrchestratorEvent::TaskProgress {
                    task_id,
                    completed,
                    total,
                    message,
                });
            }
            WorkerEvent::Complete {
                worker_id,
                task_id,
                data,
                duration_ms,
            } => {
                if !self.is_current(worker_id, task_id) {
                    debug!(task_id = %task_id, "late completion ignored");
                    return;
                }
                self.active.remove(&task_id);
                self.pool.mark_idle(worker_id, false);
                self.store.transition(task_id, TaskStatus::Completed);
                self.store
                    .record(TaskResult::success(task_id, data, duration_ms));
                info!(task_id = %task_id, duration_ms, "task completed");
                self.bus.emit(OrchestratorEvent::TaskCompleted {
                    task_id,
                    duration_ms,
                });
                self.after_worker_idle(worker_id);
            }
            WorkerEvent::Error {
                worker_id,
                task_id,
                message,
                duration_ms,
            } => {
                if !self.is_current(worker_id, task_id) {
                    debug!(task_id = %task_id, "late error ignored");
                    return;
                }
                self.pool.mark_idle(worker_id, true);
                self.resolve_failure(task_id, message, duration_ms, false);
                self.after_worker_idle(worker_id);
            }
            WorkerEvent::Crashed {
                worker_id,
                task_id,
                message,
            } => {
                let current = self.is_current(worker_id, task_id);
                // The worker loop exits after a crash; the slot is dead
                // either way. A replacement is spawned lazily when a
                // future task needs one.
                if self.pool.remove(worker_id).is_some() {
                    warn!(worker_id = %worker_id, task_id = %task_id, "worker crashed; evicted");
                    self.bus
                        .emit(OrchestratorEvent::WorkerTerminated { worker_id });
                }
                if current {
                    let duration_ms = self
                        .active
                        .get(&task_id)
                        .map(|a| a.started.elapsed().as_millis() as u64)
                        .unwrap_or(0);
                    self.resolve_failure(task_id, message, duration_ms, false);
                }
                self.try_dispatch();
            }
        }
    }

    fn handle_timeout(&mut self, worker_id: Uuid, task_id: Uuid, attempt: u32) {
        // The single-writer discipline makes these checks authoritative:
        // if the task already finished, the timer is stale and ignored.
        if !self.is_current(worker_id, task_id) {
            debug!(task_id = %task_id, "stale timeout ignored");
            return;
        }
        let Some(active) = self.active.get(&task_id) else {
            return;
        };
        // A retried task can land on the same worker with the same task
        // id; only the attempt counter tells the old timer apart. Each
        // attempt gets its full timeout budget.
        if active.task.attempts != attempt {
            debug!(task_id = %task_id, attempt, "timeout for an earlier attempt ignored");
            return;
        }

        let duration_ms = active.started.elapsed().as_millis() as u64;

        // Best-effort stop; if the worker does not comply, its slot is
        // freed anyway and any late terminal message is ignored.
        if let Some(slot) = self.pool.get(worker_id) {
            let _ = slot.mailbox.try_send(WorkerCommand::Terminate { task_id });
        }
        self.pool.mark_idle(worker_id, true);

        warn!(task_id = %task_id, worker_id = %worker_id, duration_ms, "task timed out");
        let message = ForemanError::TaskTimeout { task_id }.to_string();
        self.resolve_failure(task_id, message, duration_ms, true);
        self.after_worker_idle(worker_id);
    }

    /// Retry or finalize a failed attempt. `timed_out` picks the terminal
    /// status (`Terminated` vs `Errored`) when retries are exhausted.
    fn resolve_failure(&mut self, task_id: Uuid, message: String, duration_ms: u64, timed_out: bool) {
        let Some(active) = self.active.remove(&task_id) else {
            return;
        };
        let mut task = active.task;
        task.attempts += 1;

        if task.can_retry() {
            info!(
                task_id = %task_id,
                attempt = task.attempts,
                max_retries = task.max_retries,
                error = %message,
                "retrying task"
            );
            self.store.transition(task_id, TaskStatus::Queued);
            self.queue.requeue_front(task);
            self.bus.emit(OrchestratorEvent::TaskError {
                task_id,
                message,
                will_retry: true,
            });
            return;
        }

        let status = if timed_out {
            TaskStatus::Terminated
        } else {
            TaskStatus::Errored
        };
        self.store.transition(task_id, status);
        self.store
            .record(TaskResult::failure(task_id, message.clone(), duration_ms));
        warn!(task_id = %task_id, status = %status, error = %message, "task failed");
        if timed_out {
            self.bus.emit(OrchestratorEvent::TaskTerminated { task_id });
        } else {
            self.bus.emit(OrchestratorEvent::TaskError {
                task_id,
                message,
                will_retry: false,
            });
        }
    }

    /// Re-run matching and, when auto-scaling allows, arm an idle-reaping
    /// timer for the newly idle worker.
    fn after_worker_idle(&mut self, worker_id: Uuid) {
        self.try_dispatch();

        if !self.config.enable_auto_scaling || !self.queue.is_empty() || self.pool.len() <= 1 {
            return;
        }
        let Some(slot) = self.pool.get(worker_id) else {
            return;
        };
        if slot.status != crate::types::WorkerStatus::Idle {
            return;
        }

        let idle_since = slot.idle_since;
        let idle_timeout = self.config.idle_timeout();
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(idle_timeout).await;
            let Some(tx) = tx.upgrade() else {
                return;
            };
            let _ = tx
                .send(DispatcherEvent::IdleSweep {
                    worker_id,
                    idle_since,
                })
                .await;
        });
    }

    fn handle_idle_sweep(&mut self, worker_id: Uuid, idle_since: Instant) {
        if !self.config.enable_auto_scaling || !self.queue.is_empty() || self.pool.len() <= 1 {
            return;
        }
        let Some(slot) = self.pool.get(worker_id) else {
            return;
        };
        // The idle mark moved if the worker ran anything since the timer
        // was armed; that sweep is stale.
        if slot.status != crate::types::WorkerStatus::Idle || slot.idle_since != idle_since {
            return;
        }

        info!(worker_id = %worker_id, "reaping idle worker");
        self.evict_worker(worker_id);
    }

    fn evict_worker(&mut self, worker_id: Uuid) {
        if let Some(slot) = self.pool.remove(worker_id) {
            // A wedged worker that cannot take the stop command gets its
            // task aborted outright.
            if slot.mailbox.try_send(WorkerCommand::Stop).is_err() {
                slot.join.abort();
            }
            self.bus
                .emit(OrchestratorEvent::WorkerTerminated { worker_id });
        }
    }

    fn shutdown(&mut self) {
        info!(workers = self.pool.len(), "shutting down");
        for slot in self.pool.iter() {
            let _ = slot.mailbox.try_send(WorkerCommand::Stop);
            self.bus.emit(OrchestratorEvent::WorkerTerminated {
                worker_id: slot.id,
            });
        }
        self.bus.emit(OrchestratorEvent::Shutdown);
    }

    /// Whether `task_id` is the task currently assigned to `worker_id`.
    fn is_current(&self, worker_id: Uuid, task_id: Uuid) -> bool {
        self.pool
            .get(worker_id)
            .is_some_and(|w| w.current_task == Some(task_id))
    }
}
