//! Queue manager configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the job queue and its worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Number of workers, and so the maximum number of jobs running at once.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// How long a worker waits for a job before re-checking for shutdown
    /// (milliseconds).
    #[serde(default = "default_dequeue_timeout")]
    pub dequeue_timeout_ms: u64,

    /// Pause after an unexpected worker loop error (milliseconds).
    #[serde(default = "default_error_backoff")]
    pub error_backoff_ms: u64,

    /// Re-enqueue jobs left `PENDING` by a previous run.
    /// Jobs left mid-pipeline are marked failed instead.
    #[serde(default = "default_requeue")]
    pub requeue_pending_on_start: bool,
}

fn default_max_workers() -> usize {
    2
}

fn default_dequeue_timeout() -> u64 {
    1000 // 1 second
}

fn default_error_backoff() -> u64 {
    1000 // 1 second
}

fn default_requeue() -> bool {
    true
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            dequeue_timeout_ms: default_dequeue_timeout(),
            error_backoff_ms: default_error_backoff(),
            requeue_pending_on_start: default_requeue(),
        }
    }
}
