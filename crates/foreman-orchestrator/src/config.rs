//! Orchestrator configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Recognized orchestrator options.
///
/// All fields have serde defaults, so a partial configuration document
/// deserializes into a fully usable value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Hard ceiling on concurrent worker execution contexts.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Hard ceiling on pending (not yet dispatched) tasks.
    #[serde(default = "default_task_queue_size")]
    pub task_queue_size: usize,
    /// Permit idle-worker reaping.
    #[serde(default = "default_enable_auto_scaling")]
    pub enable_auto_scaling: bool,
    /// Minimum idle duration in milliseconds before a worker may be reaped.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Capacity of the dispatcher event channel and the observer broadcast
    /// channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_max_workers() -> usize {
    5
}

fn default_task_queue_size() -> usize {
    100
}

fn default_enable_auto_scaling() -> bool {
    true
}

fn default_idle_timeout_ms() -> u64 {
    300_000
}

fn default_event_buffer() -> usize {
    256
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            task_queue_size: default_task_queue_size(),
            enable_auto_scaling: default_enable_auto_scaling(),
            idle_timeout_ms: default_idle_timeout_ms(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl OrchestratorConfig {
    /// The idle timeout as a [`Duration`].
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_workers, 5);
        assert_eq!(config.task_queue_size, 100);
        assert!(config.enable_auto_scaling);
        assert_eq!(config.idle_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_partial_deserialization() {
        let config: OrchestratorConfig =
            serde_json::from_str(r#"{"max_workers": 2, "idle_timeout_ms": 50}"#).unwrap();
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.idle_timeout_ms, 50);
        // Unspecified fields fall back to defaults
        assert_eq!(config.task_queue_size, 100);
        assert!(config.enable_auto_scaling);
    }
}
