//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Job service (submissions, outcomes)
//! - Pipeline stages (durations by result)
//! - Queue manager (depth, active jobs)
//! - Broadcast hub (connected observers)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts};

// =============================================================================
// Jobs
// =============================================================================

/// Jobs accepted by the service.
pub static JOBS_SUBMITTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("distillery_jobs_submitted_total", "Total jobs submitted").unwrap()
});

/// Pipeline runs finished, by outcome.
pub static JOB_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("distillery_job_outcomes_total", "Total finished pipeline runs"),
        &["outcome"], // "completed", "failed", "cancelled"
    )
    .unwrap()
});

// =============================================================================
// Pipeline
// =============================================================================

/// Stage duration in seconds.
pub static STAGE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("distillery_stage_duration_seconds", "Duration of pipeline stages")
            .buckets(vec![
                0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 300.0, 900.0, 1800.0, 3600.0,
            ]),
        &["stage", "result"], // result: "success", "failed"
    )
    .unwrap()
});

// =============================================================================
// Queue
// =============================================================================

/// Jobs waiting in the queue.
pub static QUEUE_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("distillery_queue_depth", "Jobs waiting for a worker").unwrap()
});

/// Jobs currently being run by a worker.
pub static JOBS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("distillery_jobs_active", "Jobs currently running").unwrap()
});

// =============================================================================
// Broadcast hub
// =============================================================================

/// Connected observers by channel.
pub static HUB_OBSERVERS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("distillery_hub_observers", "Connected broadcast observers"),
        &["channel"], // "status", "logs"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Jobs
        Box::new(JOBS_SUBMITTED.clone()),
        Box::new(JOB_OUTCOMES.clone()),
        // Pipeline
        Box::new(STAGE_DURATION.clone()),
        // Queue
        Box::new(QUEUE_DEPTH.clone()),
        Box::new(JOBS_ACTIVE.clone()),
        // Hub
        Box::new(HUB_OBSERVERS.clone()),
    ]
}
