//! In-memory fan-out of job status and log events.
//!
//! Two independent channels:
//! - **Status**: global, every observer sees every job's transitions.
//! - **Logs**: per job, with history replay on connect.

mod broadcast;
mod types;

pub use broadcast::BroadcastHub;
pub use types::{LogEvent, ObserverId, StatusEvent, Subscription};
