use axum::{
    http::{HeaderValue, Method},
    middleware,
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use super::{handlers, jobs, middleware::metrics_middleware, stats, ws};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(state.cors_origins());

    // API routes
    let api_routes = Router::new()
        // Health, config and metrics
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        .route("/metrics", get(handlers::get_metrics))
        // Jobs
        .route("/jobs", get(jobs::list_jobs).post(jobs::create_job))
        .route("/jobs/{uuid}", get(jobs::get_job).delete(jobs::cancel_job))
        .route("/jobs/{uuid}/logs", get(jobs::get_job_logs))
        // Statistics
        .route("/stats", get(stats::get_stats))
        .route("/queue", get(stats::get_queue_status))
        .with_state(Arc::clone(&state));

    // Real-time streams
    let ws_routes = Router::new()
        .route("/jobs/status", get(ws::status_socket))
        .route("/jobs/{uuid}/logs", get(ws::log_socket))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .nest("/ws", ws_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Build the CORS layer. An empty origin list allows any origin.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}
