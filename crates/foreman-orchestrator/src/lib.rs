//! Parallel task orchestration: a bounded priority queue feeding a managed
//! pool of isolated workers, with lifecycle tracking, progress reporting,
//! timeout/retry handling, and idle-worker auto-scaling.
//!
//! One dispatcher task is the single writer over queue and pool state;
//! workers are isolated tokio tasks that communicate only over channels.
//! Submissions beyond queue capacity fail fast, executions beyond the
//! worker ceiling wait in priority order, and every submitted task reaches
//! a definite terminal status.
//!
//! # Main types
//!
//! - [`Orchestrator`] — Public handle: submit tasks, query status, observe
//!   events, shut down.
//! - [`TaskSpec`] — Builder-style description of a unit of work.
//! - [`TaskHandler`] / [`HandlerRegistry`] — The seam where the embedding
//!   application plugs in per-type business logic.
//! - [`OrchestratorEvent`] — Lifecycle notifications over a broadcast
//!   channel.
//! - [`OrchestratorConfig`] — Pool and queue limits.
//!
//! # Example
//!
//! ```no_run
//! use foreman_orchestrator::{HandlerRegistry, Orchestrator, OrchestratorConfig, TaskSpec};
//!
//! # async fn demo() -> foreman_core::ForemanResult<()> {
//! let mut registry = HandlerRegistry::new();
//! registry.register_fn("echo", |config| async move { Ok(config) });
//!
//! let orchestrator = Orchestrator::start(OrchestratorConfig::default(), registry);
//! let task_id = orchestrator
//!     .submit(TaskSpec::new("echo", "say it back").with_priority(3))
//!     .await?;
//! let status = orchestrator.status(task_id).await?;
//! println!("{status}");
//! # Ok(())
//! # }
//! ```

/// Orchestrator configuration.
pub mod config;
/// The single-writer dispatcher loop and public handle.
pub mod dispatcher;
/// Observer-facing lifecycle events.
pub mod events;
/// Task-handler trait and registry.
pub mod handler;
/// Worker pool bookkeeping.
mod pool;
/// Bounded priority queue.
pub mod queue;
/// Result store and status machine.
mod store;
/// Shared orchestration types.
pub mod types;
/// Worker execution contexts and message protocol.
pub mod worker;

pub use config::OrchestratorConfig;
pub use dispatcher::Orchestrator;
pub use events::{EventBus, OrchestratorEvent};
pub use foreman_core::{ForemanError, ForemanResult, TaskType};
pub use handler::{HandlerRegistry, TaskHandler};
pub use queue::TaskQueue;
pub use types::{
    PoolStatus, Task, TaskResult, TaskSpec, TaskStatus, WorkerInfo, WorkerStatus,
    DEFAULT_MAX_RETRIES,
};
pub use worker::ProgressHandle;
