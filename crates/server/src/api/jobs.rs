//! Job API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use distillery_core::job::UnknownStatus;
use distillery_core::{Job, JobDetail, JobError, JobFilter, JobStatus, LogEntry};

use crate::state::AppState;

/// Default page size for job listings
const DEFAULT_LIMIT: i64 = 50;

/// Maximum page size for job listings
const MAX_LIMIT: i64 = 100;

/// Default number of log entries returned
const DEFAULT_LOG_LIMIT: i64 = 1000;

/// Maximum number of log entries returned
const MAX_LOG_LIMIT: i64 = 10_000;

const CANCEL_CONFLICT: &str = "Job cannot be cancelled (already completed, failed, or cancelled)";

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for submitting a job
#[derive(Debug, Deserialize)]
pub struct CreateJobBody {
    pub source_url: String,
}

/// Query parameters for listing jobs
#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    /// Filter by status (`PENDING`, `completed`, ...)
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Query parameters for reading a job's log
#[derive(Debug, Deserialize)]
pub struct LogParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Response for listing jobs
#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<Job>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Response for a successful cancellation
#[derive(Debug, Serialize)]
pub struct CancelJobResponse {
    pub message: String,
    pub job_uuid: Uuid,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// A job error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub JobError);

impl From<JobError> for ApiError {
    fn from(e: JobError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Response {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: message.into(),
            }),
        )
            .into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            JobError::Validation(_) => (StatusCode::BAD_REQUEST, self.0.to_string()),
            JobError::NotFound(_) => (StatusCode::NOT_FOUND, "Job not found".to_string()),
            JobError::Conflict { operation, .. } if operation == "cancel" => {
                (StatusCode::CONFLICT, CANCEL_CONFLICT.to_string())
            }
            JobError::Conflict { .. } | JobError::InvalidTransition { .. } => {
                (StatusCode::CONFLICT, self.0.to_string())
            }
            JobError::Database(e) => {
                error!("Job store error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Submit a new job
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateJobBody>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let job = state.service().submit(&body.source_url)?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// List jobs, newest first
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListJobsParams>,
) -> Result<Json<ListJobsResponse>, Response> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let mut filter = JobFilter::new().with_limit(limit).with_offset(offset);
    if let Some(status) = params.status.as_deref().filter(|s| !s.is_empty()) {
        let status: JobStatus = status
            .parse()
            .map_err(|e: UnknownStatus| ApiError::bad_request(e.to_string()))?;
        filter = filter.with_status(status);
    }

    let page = state
        .service()
        .list(&filter)
        .map_err(|e| ApiError(e).into_response())?;

    Ok(Json(ListJobsResponse {
        jobs: page.jobs,
        total: page.total,
        limit,
        offset,
    }))
}

/// Get a job with all of its artifacts
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<Uuid>,
) -> Result<Json<JobDetail>, ApiError> {
    Ok(Json(state.service().detail(&uuid)?))
}

/// Read a job's log, oldest first
pub async fn get_job_logs(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<Uuid>,
    Query(params): Query<LogParams>,
) -> Result<Json<Vec<LogEntry>>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);
    Ok(Json(state.service().logs(&uuid, offset, limit)?))
}

/// Cancel a job
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<Uuid>,
) -> Result<Json<CancelJobResponse>, ApiError> {
    let job = state.service().cancel(&uuid)?;
    Ok(Json(CancelJobResponse {
        message: "Job cancelled".to_string(),
        job_uuid: job.uuid,
    }))
}
