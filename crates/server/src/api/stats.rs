//! Statistics and queue status handlers.

use axum::{extract::State, Json};
use std::sync::Arc;

use distillery_core::{JobStatistics, QueueStatus};

use super::jobs::ApiError;
use crate::state::AppState;

/// Aggregate job statistics
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<JobStatistics>, ApiError> {
    Ok(Json(state.service().statistics()?))
}

/// Worker pool status
pub async fn get_queue_status(State(state): State<Arc<AppState>>) -> Json<QueueStatus> {
    Json(state.service().queue_status())
}
