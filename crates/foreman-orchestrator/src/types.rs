//! Shared orchestration types (Task, TaskSpec, TaskResult, worker snapshots).

use chrono::{DateTime, Utc};
use foreman_core::TaskType;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Default bound on retry attempts when retries are enabled without an
/// explicit per-task limit.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// The task id has never been seen by this orchestrator.
    Unknown,
    /// Submitted and waiting for a worker.
    Queued,
    /// Currently executing on a worker.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with a handler error (retries, if any, exhausted).
    Errored,
    /// Forcibly stopped by timeout.
    Terminated,
}

impl TaskStatus {
    /// Check if this is a terminal status (no further transitions occur).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Terminated)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Errored => "errored",
            Self::Terminated => "terminated",
        };
        write!(f, "{s}")
    }
}

/// Submission-side description of a unit of work.
///
/// Built with the `with_*` methods and handed to
/// [`Orchestrator::submit`](crate::Orchestrator::submit), which assigns the
/// task its id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Task type, used for handler lookup and worker affinity.
    pub task_type: TaskType,
    /// Human-readable description.
    pub description: String,
    /// Higher priority is served first; equal priority is FIFO.
    #[serde(default)]
    pub priority: i32,
    /// Opaque payload passed verbatim to the handler.
    #[serde(default)]
    pub config: serde_json::Value,
    /// Optional execution timeout; absence means no timeout.
    #[serde(default)]
    pub timeout: Option<Duration>,
    /// Whether a failed attempt is retried.
    #[serde(default)]
    pub retry_on_error: bool,
    /// Bound on retry attempts (in addition to the first attempt).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl TaskSpec {
    /// Create a spec with default priority, no timeout, and no retries.
    pub fn new(task_type: impl Into<TaskType>, description: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            description: description.into(),
            priority: 0,
            config: serde_json::Value::Null,
            timeout: None,
            retry_on_error: false,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Set the priority (higher = served first).
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the opaque handler payload.
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    /// Set an execution timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Enable retries with the default attempt bound.
    pub fn with_retry_on_error(mut self) -> Self {
        self.retry_on_error = true;
        self
    }

    /// Enable retries with an explicit attempt bound.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry_on_error = true;
        self.max_retries = max_retries;
        self
    }
}

/// A submitted task tracked by the orchestrator.
///
/// Immutable after submission except for the internal retry counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique id, assigned at submission, never reused.
    pub id: Uuid,
    /// Task type, used for handler lookup and worker affinity.
    pub task_type: TaskType,
    /// Human-readable description.
    pub description: String,
    /// Higher priority is served first; equal priority is FIFO.
    pub priority: i32,
    /// Opaque payload passed verbatim to the handler.
    pub config: serde_json::Value,
    /// Optional execution timeout.
    pub timeout: Option<Duration>,
    /// Whether a failed attempt is retried.
    pub retry_on_error: bool,
    /// Bound on retry attempts.
    pub max_retries: u32,
    /// Number of completed attempts so far (0 before first dispatch).
    pub attempts: u32,
    /// When the task was submitted.
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Materialize a spec into a tracked task with a fresh id.
    pub fn from_spec(spec: TaskSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type: spec.task_type,
            description: spec.description,
            priority: spec.priority,
            config: spec.config,
            timeout: spec.timeout,
            retry_on_error: spec.retry_on_error,
            max_retries: spec.max_retries,
            attempts: 0,
            created_at: Utc::now(),
        }
    }

    /// Whether another attempt is allowed after a failure.
    pub fn can_retry(&self) -> bool {
        self.retry_on_error && self.attempts <= self.max_retries
    }
}

/// Final outcome of a task, written exactly once per task that reaches a
/// terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// The task this result belongs to.
    pub task_id: Uuid,
    /// Whether the final attempt succeeded.
    pub success: bool,
    /// Handler output when successful.
    pub data: Option<serde_json::Value>,
    /// Failure description when unsuccessful.
    pub error_message: Option<String>,
    /// Wall-clock duration of the final attempt in milliseconds.
    pub duration_ms: u64,
}

impl TaskResult {
    /// Build a success result.
    pub fn success(task_id: Uuid, data: serde_json::Value, duration_ms: u64) -> Self {
        Self {
            task_id,
            success: true,
            data: Some(data),
            error_message: None,
            duration_ms,
        }
    }

    /// Build a failure result.
    pub fn failure(task_id: Uuid, message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            task_id,
            success: false,
            data: None,
            error_message: Some(message.into()),
            duration_ms,
        }
    }
}

/// Status of a worker execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Ready to accept a task.
    Idle,
    /// Executing a task.
    Running,
    /// Stopped and removed from the pool; never reused. Reaping and
    /// shutdown remove the slot in the same dispatcher step that stops
    /// the worker, so pool snapshots never observe this state; it exists
    /// for consumers that persist or display worker records.
    Terminated,
    /// Exited unexpectedly while holding a task. Crashed workers are
    /// evicted in the same dispatcher step, so, as with
    /// [`Terminated`](Self::Terminated), snapshots never observe it.
    Errored,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Terminated => "terminated",
            Self::Errored => "errored",
        };
        write!(f, "{s}")
    }
}

/// Read-only snapshot of a single worker, as returned by
/// [`Orchestrator::list_workers`](crate::Orchestrator::list_workers).
#[derive(Debug, Clone, Serialize)]
pub struct WorkerInfo {
    /// Unique worker id.
    pub id: Uuid,
    /// The task type this worker last executed.
    pub type_affinity: TaskType,
    /// Current worker status.
    pub status: WorkerStatus,
    /// The task currently executing, set iff the worker is running.
    pub current_task: Option<Uuid>,
    /// Number of tasks completed successfully.
    pub tasks_completed: u64,
    /// Number of failed attempts executed on this worker.
    pub error_count: u64,
    /// When the worker was spawned.
    pub started_at: DateTime<Utc>,
    /// Last time the worker started or finished a task.
    pub last_activity_at: DateTime<Utc>,
}

/// Aggregate pool snapshot, as returned by
/// [`Orchestrator::pool_status`](crate::Orchestrator::pool_status).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Workers currently in the pool.
    pub worker_count: usize,
    /// Workers currently executing a task.
    pub active_worker_count: usize,
    /// Tasks waiting in the queue (including retries).
    pub queued_count: usize,
    /// Tasks that have reached a terminal state since start.
    pub completed_count: usize,
}
