//! Observer-facing lifecycle events.
//!
//! The dispatcher fans events out over a `tokio::sync::broadcast` channel.
//! Delivery is non-blocking: a slow subscriber loses the oldest events
//! rather than slowing the dispatcher, and subscribers hold read-only
//! payloads with no way to reach back into dispatcher state.

use foreman_core::TaskType;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// A lifecycle notification emitted by the orchestrator.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    /// A task was accepted into the queue.
    TaskQueued {
        /// The task id.
        task_id: Uuid,
        /// The task's type.
        task_type: TaskType,
        /// The task's priority.
        priority: i32,
    },
    /// A task was handed to a worker.
    TaskStarted {
        /// The task id.
        task_id: Uuid,
        /// The executing worker.
        worker_id: Uuid,
    },
    /// A running task reported progress.
    TaskProgress {
        /// The task id.
        task_id: Uuid,
        /// Units of work done so far.
        completed: u64,
        /// Total units of work, as estimated by the handler.
        total: u64,
        /// Optional free-form progress message.
        message: Option<String>,
    },
    /// A task finished successfully.
    TaskCompleted {
        /// The task id.
        task_id: Uuid,
        /// Duration of the final attempt in milliseconds.
        duration_ms: u64,
    },
    /// A task attempt failed.
    TaskError {
        /// The task id.
        task_id: Uuid,
        /// Failure description.
        message: String,
        /// Whether another attempt will be made.
        will_retry: bool,
    },
    /// A task was forcibly stopped by timeout.
    TaskTerminated {
        /// The task id.
        task_id: Uuid,
    },
    /// A new worker joined the pool.
    WorkerCreated {
        /// The worker id.
        worker_id: Uuid,
        /// The task type the worker was spawned for.
        task_type: TaskType,
    },
    /// A worker left the pool (reaped, crashed, or shut down).
    WorkerTerminated {
        /// The worker id.
        worker_id: Uuid,
    },
    /// The orchestrator is shutting down.
    Shutdown,
}

/// Broadcast fan-out for [`OrchestratorEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<OrchestratorEvent>,
}

impl EventBus {
    /// Create a bus with the given per-subscriber buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Open a new subscription. Events emitted before this call are not
    /// replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.tx.subscribe()
    }

    /// Emit an event. A send error only means there are currently no
    /// subscribers, which is fine.
    pub fn emit(&self, event: OrchestratorEvent) {
        let _ = self.tx.send(event);
    }

    /// Sender handle for constructing subscriber endpoints elsewhere.
    pub(crate) fn sender(&self) -> broadcast::Sender<OrchestratorEvent> {
        self.tx.clone()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_without_subscribers_is_ok() {
        let bus = EventBus::new(8);
        bus.emit(OrchestratorEvent::Shutdown);
    }

    #[tokio::test]
    async fn test_subscribers_see_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let task_id = Uuid::new_v4();
        bus.emit(OrchestratorEvent::TaskQueued {
            task_id,
            task_type: TaskType::new("monitor"),
            priority: 1,
        });

        match rx.recv().await.unwrap() {
            OrchestratorEvent::TaskQueued {
                task_id: id,
                priority,
                ..
            } => {
                assert_eq!(id, task_id);
                assert_eq!(priority, 1);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_event_serialization_tags() {
        let event = OrchestratorEvent::TaskTerminated {
            task_id: Uuid::new_v4(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"task_terminated\""));
    }
}
