//! Job storage trait and types.

use thiserror::Error;
use uuid::Uuid;

use super::{Artifact, Job, JobDetail, JobStatistics, JobStatus, JobUpdate, LogEntry, LogLevel};

/// Error type for job operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum JobError {
    /// Malformed input at the submission boundary.
    #[error("Invalid source URL: {0}")]
    Validation(String),

    /// Job not found.
    #[error("Job not found: {0}")]
    NotFound(String),

    /// Operation refused because of the job's current status.
    #[error("Cannot {operation} job {job_id}: current status is {status}")]
    Conflict {
        job_id: i64,
        status: JobStatus,
        operation: String,
    },

    /// The requested status change is not an edge of the state graph.
    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: i64,
        from: JobStatus,
        to: JobStatus,
    },

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for JobError {
    fn from(e: rusqlite::Error) -> Self {
        JobError::Database(e.to_string())
    }
}

/// Request to create a new job.
#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    pub source_url: String,
    /// Identifier extracted during validation, if any.
    pub video_id: Option<String>,
}

/// Filter for querying jobs.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    /// Filter by status.
    pub status: Option<JobStatus>,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl JobFilter {
    /// Create a new filter with defaults.
    pub fn new() -> Self {
        Self {
            status: None,
            limit: 100,
            offset: 0,
        }
    }

    /// Filter by status.
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set limit.
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    /// Set offset.
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Trait for job storage backends.
///
/// Implementations enforce the job state graph: `update_status` refuses
/// edges that [`JobStatus::can_transition_to`] rejects, and `cancel` refuses
/// terminal jobs.
pub trait JobStore: Send + Sync {
    /// Create a new job in `PENDING` with zero progress.
    fn create(&self, request: CreateJobRequest) -> Result<Job, JobError>;

    /// Get a job by internal id.
    fn get(&self, id: i64) -> Result<Option<Job>, JobError>;

    /// Get a job by its external UUID.
    fn get_by_uuid(&self, uuid: &Uuid) -> Result<Option<Job>, JobError>;

    /// List jobs matching the filter, newest first.
    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobError>;

    /// Count jobs matching the filter (ignores limit and offset).
    fn count(&self, filter: &JobFilter) -> Result<i64, JobError>;

    /// All `PENDING` jobs, oldest first.
    fn pending_jobs(&self) -> Result<Vec<Job>, JobError>;

    /// Apply a status patch.
    ///
    /// Sets `started_at` on the first non-pending status and `completed_at`
    /// on entering a terminal status. Progress never moves backwards.
    fn update_status(&self, id: i64, update: JobUpdate) -> Result<Job, JobError>;

    /// Mark a job cancelled. Fails with `Conflict` if the job is already terminal.
    fn cancel(&self, id: i64) -> Result<Job, JobError>;

    /// Record the video identifier.
    fn set_video_id(&self, id: i64, video_id: &str) -> Result<(), JobError>;

    /// Append a log entry.
    fn append_log(
        &self,
        id: i64,
        level: LogLevel,
        stage: Option<&str>,
        message: &str,
    ) -> Result<LogEntry, JobError>;

    /// Log entries for a job, oldest first.
    fn logs(&self, id: i64, offset: i64, limit: i64) -> Result<Vec<LogEntry>, JobError>;

    /// Persist a stage result.
    fn record_artifact(&self, id: i64, artifact: Artifact) -> Result<(), JobError>;

    /// A job with all of its artifacts.
    fn detail(&self, id: i64) -> Result<Option<JobDetail>, JobError>;

    /// Aggregate counts and mean completed duration.
    fn statistics(&self) -> Result<JobStatistics, JobError>;
}
