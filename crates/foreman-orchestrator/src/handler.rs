//! The task-handler seam between the orchestrator and the embedding
//! application.
//!
//! Handlers are opaque to the orchestrator: a handler receives the task's
//! `config` payload verbatim and produces a result value or an error. What
//! the handler does with either is not the orchestrator's business.

use crate::worker::ProgressHandle;
use async_trait::async_trait;
use foreman_core::{ForemanResult, TaskType};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Business logic for one task type.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Execute the task. `config` is the submitted payload, `progress` may
    /// be used to emit progress notifications. The returned value becomes
    /// the task's result data.
    async fn run(
        &self,
        config: serde_json::Value,
        progress: ProgressHandle,
    ) -> ForemanResult<serde_json::Value>;
}

/// Mapping from task type to handler, supplied by the embedding
/// application at orchestrator construction.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a task type, replacing any previous one.
    pub fn register(
        &mut self,
        task_type: impl Into<TaskType>,
        handler: impl TaskHandler + 'static,
    ) {
        self.handlers.insert(task_type.into(), Arc::new(handler));
    }

    /// Register an async closure as the handler for a task type.
    pub fn register_fn<F, Fut>(&mut self, task_type: impl Into<TaskType>, handler: F)
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ForemanResult<serde_json::Value>> + Send + 'static,
    {
        self.handlers
            .insert(task_type.into(), Arc::new(FnHandler(handler)));
    }

    /// Look up the handler for a task type.
    pub fn get(&self, task_type: &TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).cloned()
    }

    /// Whether a handler is registered for the given type.
    pub fn contains(&self, task_type: &TaskType) -> bool {
        self.handlers.contains_key(task_type)
    }

    /// The registered task types, in no particular order.
    pub fn task_types(&self) -> Vec<&TaskType> {
        self.handlers.keys().collect()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("task_types", &self.task_types())
            .finish()
    }
}

/// Adapter wrapping a plain async closure as a [`TaskHandler`].
struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync,
    Fut: Future<Output = ForemanResult<serde_json::Value>> + Send,
{
    async fn run(
        &self,
        config: serde_json::Value,
        _progress: ProgressHandle,
    ) -> ForemanResult<serde_json::Value> {
        (self.0)(config).await
    }
}
