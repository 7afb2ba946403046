//! Core types and error definitions for the Foreman orchestration system.
//!
//! This crate provides the foundational types shared across the Foreman
//! crates: the unified error enum, the result alias, and the task-type
//! newtype used for worker affinity and handler lookup.
//!
//! # Main types
//!
//! - [`ForemanError`] — Unified error enum for all orchestration subsystems.
//! - [`ForemanResult`] — Convenience alias for `Result<T, ForemanError>`.
//! - [`TaskType`] — Opaque task-type identifier.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Top-level error type for the Foreman orchestration system.
#[derive(Debug, thiserror::Error)]
pub enum ForemanError {
    /// The task queue is at capacity; the submission was rejected.
    /// Recoverable: the caller may back off and retry.
    #[error("task queue full (capacity {capacity})")]
    QueueFull {
        /// The configured queue capacity that was exceeded.
        capacity: usize,
    },

    /// A worker execution context could not be created. The pool size is
    /// unchanged when this is returned.
    #[error("worker spawn failed: {0}")]
    WorkerSpawn(String),

    /// A task's timeout expired before its worker produced a terminal
    /// message; the task is marked terminated.
    #[error("task {task_id} timed out")]
    TaskTimeout {
        /// The task whose timer expired.
        task_id: Uuid,
    },

    /// A task handler reported a failure.
    #[error("task execution failed: {0}")]
    TaskExecution(String),

    /// A worker execution context exited unexpectedly while holding a task.
    #[error("worker crashed: {0}")]
    WorkerCrash(String),

    /// No handler is registered for the submitted task type.
    #[error("no handler registered for task type '{0}'")]
    HandlerNotFound(String),

    /// An internal orchestrator failure (e.g. the dispatcher loop has
    /// stopped and can no longer accept commands).
    #[error("orchestrator error: {0}")]
    Orchestrator(String),

    /// A serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used across the Foreman crates.
pub type ForemanResult<T> = Result<T, ForemanError>;

/// Identifier for a kind of task.
///
/// The orchestrator treats task types as opaque: they are used only for
/// worker affinity and for looking up the registered handler. The set of
/// valid types is whatever the embedding application registers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    /// Create a task type from any string-like value.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The type name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskType {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for TaskType {
    fn from(name: String) -> Self {
        Self(name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_task_type_display_and_eq() {
        let a = TaskType::new("monitor");
        let b = TaskType::from("monitor");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "monitor");
        assert_eq!(a.as_str(), "monitor");
    }

    #[test]
    fn test_task_type_serde_transparent() {
        let t = TaskType::new("research");
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, "\"research\"");
        let parsed: TaskType = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, t);
    }

    #[test]
    fn test_error_display() {
        let err = ForemanError::QueueFull { capacity: 100 };
        assert_eq!(err.to_string(), "task queue full (capacity 100)");

        let err = ForemanError::HandlerNotFound("monitor".to_string());
        assert!(err.to_string().contains("monitor"));
    }

    #[test]
    fn test_serde_error_conversion() {
        let bad = serde_json::from_str::<TaskType>("{not json");
        let err: ForemanError = bad.unwrap_err().into();
        assert!(matches!(err, ForemanError::Serialization(_)));
    }
}
