//! Types for the queue manager.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::JobError;

/// Errors raised inside a worker loop.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Job store error while loading a job.
    #[error("job store error: {0}")]
    Store(#[from] JobError),

    /// The job channel was closed.
    #[error("job channel closed")]
    ChannelClosed,
}

/// A job waiting for a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub job_id: i64,
    pub source_url: String,
}

/// Current status of the queue manager.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Whether the worker pool is running.
    pub running: bool,
    /// Number of workers in the pool.
    pub workers: usize,
    /// Jobs waiting for a worker.
    pub queued: usize,
    /// Ids of jobs currently being run, ascending.
    pub active_jobs: Vec<i64>,
}
