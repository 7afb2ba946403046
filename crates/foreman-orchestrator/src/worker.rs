//! Worker execution contexts and the dispatcher <-> worker message protocol.
//!
//! Each worker is one tokio task owning nothing but its own mailbox. It
//! accepts `Execute` and `Terminate` commands, runs the handler in a
//! spawned subtask (so a panicking handler is caught instead of taking the
//! worker down silently), and reports back to the dispatcher over the
//! shared event channel. A worker never emits two terminal messages for
//! the same task; the dispatcher never sends `Execute` to a busy worker.

use crate::dispatcher::DispatcherEvent;
use crate::handler::TaskHandler;
use crate::types::Task;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Mailbox capacity per worker. The dispatcher sends at most one
/// `Execute` plus a handful of control messages at a time.
pub(crate) const WORKER_MAILBOX: usize = 8;

/// Inbound messages a worker accepts.
pub(crate) enum WorkerCommand {
    /// Run a task to a terminal outcome.
    Execute(Box<Task>, Arc<dyn TaskHandler>),
    /// Best-effort abort of the named task, without a terminal message.
    Terminate {
        /// The task to stop; stale ids are ignored.
        task_id: Uuid,
    },
    /// Stop the worker loop (reaping or shutdown).
    Stop,
}

impl std::fmt::Debug for WorkerCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Execute(task, _) => f.debug_tuple("Execute").field(&task.id).finish(),
            Self::Terminate { task_id } => {
                f.debug_struct("Terminate").field("task_id", task_id).finish()
            }
            Self::Stop => write!(f, "Stop"),
        }
    }
}

/// Outbound messages a worker emits.
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    /// Progress notification from a running handler.
    Progress {
        worker_id: Uuid,
        task_id: Uuid,
        completed: u64,
        total: u64,
        message: Option<String>,
    },
    /// Terminal: the handler returned successfully.
    Complete {
        worker_id: Uuid,
        task_id: Uuid,
        data: serde_json::Value,
        duration_ms: u64,
    },
    /// Terminal: the handler returned an error.
    Error {
        worker_id: Uuid,
        task_id: Uuid,
        message: String,
        duration_ms: u64,
    },
    /// The handler panicked; the worker exits after sending this.
    Crashed {
        worker_id: Uuid,
        task_id: Uuid,
        message: String,
    },
}

/// Handle given to handlers for emitting progress notifications.
///
/// Cheap to clone; reports are fire-and-forget and never fail the handler.
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    worker_id: Uuid,
    task_id: Uuid,
    events: mpsc::WeakSender<DispatcherEvent>,
}

impl ProgressHandle {
    pub(crate) fn new(
        worker_id: Uuid,
        task_id: Uuid,
        events: mpsc::WeakSender<DispatcherEvent>,
    ) -> Self {
        Self {
            worker_id,
            task_id,
            events,
        }
    }

    /// Report progress: `completed` out of `total` units, with an optional
    /// message.
    pub async fn report(&self, completed: u64, total: u64, message: Option<&str>) {
        let Some(events) = self.events.upgrade() else {
            return;
        };
        let event = WorkerEvent::Progress {
            worker_id: self.worker_id,
            task_id: self.task_id,
            completed,
            total,
            message: message.map(str::to_string),
        };
        let _ = events.send(event.into()).await;
    }
}

/// Spawn a worker task and return its join handle.
///
/// The event sender is weak: workers do not keep the dispatcher's channel
/// open, so the dispatcher loop can end once all public handles are gone.
pub(crate) fn spawn_worker(
    worker_id: Uuid,
    mailbox: mpsc::Receiver<WorkerCommand>,
    events: mpsc::WeakSender<DispatcherEvent>,
) -> JoinHandle<()> {
    let context = WorkerContext {
        id: worker_id,
        mailbox,
        events,
    };
    tokio::spawn(context.run())
}

struct WorkerContext {
    id: Uuid,
    mailbox: mpsc::Receiver<WorkerCommand>,
    events: mpsc::WeakSender<DispatcherEvent>,
}

enum AfterExecute {
    /// Back to the idle dispatch loop.
    Continue,
    /// The worker is done (crash or stop); exit the loop.
    Exit,
}

impl WorkerContext {
    async fn run(mut self) {
        debug!(worker_id = %self.id, "worker started");
        while let Some(command) = self.mailbox.recv().await {
            match command {
                WorkerCommand::Execute(task, handler) => {
                    if matches!(self.execute(*task, handler).await, AfterExecute::Exit) {
                        break;
                    }
                }
                // A terminate that raced with task completion; nothing is
                // running, so there is nothing to stop.
                WorkerCommand::Terminate { task_id } => {
                    debug!(worker_id = %self.id, task_id = %task_id, "stale terminate ignored");
                }
                WorkerCommand::Stop => break,
            }
        }
        debug!(worker_id = %self.id, "worker stopped");
    }

    /// Send an event to the dispatcher, if it is still around.
    async fn notify(&self, event: WorkerEvent) {
        if let Some(events) = self.events.upgrade() {
            let _ = events.send(event.into()).await;
        }
    }

    async fn execute(&mut self, task: Task, handler: Arc<dyn TaskHandler>) -> AfterExecute {
        let start = Instant::now();
        let task_id = task.id;
        let progress = ProgressHandle::new(self.id, task_id, self.events.clone());
        let config = task.config.clone();

        let mut job = tokio::spawn(async move { handler.run(config, progress).await });

        loop {
            tokio::select! {
                outcome = &mut job => {
                    let duration_ms = start.elapsed().as_millis() as u64;
                    let event = match outcome {
                        Ok(Ok(data)) => WorkerEvent::Complete {
                            worker_id: self.id,
                            task_id,
                            data,
                            duration_ms,
                        },
                        Ok(Err(error)) => WorkerEvent::Error {
                            worker_id: self.id,
                            task_id,
                            message: error.to_string(),
                            duration_ms,
                        },
                        Err(join_error) if join_error.is_panic() => {
                            let message = panic_message(join_error);
                            self.notify(WorkerEvent::Crashed {
                                worker_id: self.id,
                                task_id,
                                message,
                            })
                            .await;
                            return AfterExecute::Exit;
                        }
                        Err(join_error) => WorkerEvent::Error {
                            worker_id: self.id,
                            task_id,
                            message: format!("handler aborted: {join_error}"),
                            duration_ms,
                        },
                    };
                    self.notify(event).await;
                    return AfterExecute::Continue;
                }
                command = self.mailbox.recv() => match command {
                    Some(WorkerCommand::Terminate { task_id: target }) if target == task_id => {
                        job.abort();
                        // No terminal message for a terminated task; the
                        // dispatcher already recorded the outcome.
                        return AfterExecute::Continue;
                    }
                    Some(WorkerCommand::Terminate { task_id: stale }) => {
                        debug!(worker_id = %self.id, task_id = %stale, "stale terminate ignored");
                    }
                    Some(WorkerCommand::Execute(other, _)) => {
                        // Contract violation; the dispatcher never sends to
                        // a busy worker.
                        warn!(
                            worker_id = %self.id,
                            task_id = %other.id,
                            "execute received while busy; dropping"
                        );
                    }
                    Some(WorkerCommand::Stop) | None => {
                        job.abort();
                        return AfterExecute::Exit;
                    }
                }
            }
        }
    }
}

/// Extract a readable message from a panicked handler's payload.
fn panic_message(join_error: tokio::task::JoinError) -> String {
    match join_error.try_into_panic() {
        Ok(payload) => {
            if let Some(s) = payload.downcast_ref::<&str>() {
                format!("handler panicked: {s}")
            } else if let Some(s) = payload.downcast_ref::<String>() {
                format!("handler panicked: {s}")
            } else {
                "handler panicked".to_string()
            }
        }
        Err(join_error) => format!("handler failed: {join_error}"),
    }
}
