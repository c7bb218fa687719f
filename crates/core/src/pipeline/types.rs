//! Types for the pipeline runner.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::job::JobError;
use crate::stage::{Stage, StageError};

/// Why a run stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// The job was cancelled through the service or the queue.
    UserRequested,
    /// The worker pool is shutting down.
    Shutdown,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::UserRequested => f.write_str("cancelled by user"),
            CancelReason::Shutdown => f.write_str("interrupted by shutdown"),
        }
    }
}

/// Final result of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed(String),
    Cancelled(CancelReason),
}

impl RunOutcome {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::Failed(_) => "failed",
            RunOutcome::Cancelled(_) => "cancelled",
        }
    }
}

/// Error type for pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage collaborator failed.
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: StageError,
    },

    /// The run was cancelled at a checkpoint.
    #[error("Pipeline {0}")]
    Cancelled(CancelReason),

    /// Job store error.
    #[error("Job store error: {0}")]
    Store(#[from] JobError),
}
