//! Per-job pipeline execution.
//!
//! A [`PipelineRunner`] owns one job and drives it through the six stages:
//! download, transcribe, translate, process video, analyze, publish. Each
//! stage transition is persisted, broadcast to status observers and logged.
//! Cancellation is checked between stages.

mod runner;
mod types;

pub use runner::PipelineRunner;
pub use types::{CancelReason, PipelineError, RunOutcome};
