//! Job queue with a fixed-size worker pool.
//!
//! Submitted jobs wait in an unbounded FIFO. Each worker takes one job at a
//! time and runs it to completion with a [`PipelineRunner`](crate::pipeline::PipelineRunner),
//! so at most `max_workers` jobs run at once.

mod config;
mod manager;
mod types;

pub use config::QueueConfig;
pub use manager::QueueManager;
pub use types::{QueueError, QueueStatus, QueuedJob};
