//! Events carried by the broadcast hub.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::job::{Job, JobStatus, LogEntry, LogLevel};

/// Identifies one connected observer.
pub type ObserverId = u64;

/// A job status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub job_uuid: Uuid,
    pub status: JobStatus,
    pub progress: u8,
    /// Lowercase status label.
    pub stage: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusEvent {
    /// Snapshot of a job's current status.
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_uuid: job.uuid,
            status: job.status,
            progress: job.progress,
            stage: job.status.stage_label().to_string(),
            timestamp: Utc::now(),
            error: if job.status == JobStatus::Failed {
                job.error_message.clone()
            } else {
                None
            },
        }
    }
}

/// A log line as delivered to log observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub stage: Option<String>,
    pub message: String,
}

impl From<&LogEntry> for LogEvent {
    fn from(entry: &LogEntry) -> Self {
        Self {
            timestamp: entry.timestamp,
            level: entry.level,
            stage: entry.stage.clone(),
            message: entry.message.clone(),
        }
    }
}

/// Receiving side of a hub registration.
///
/// Dropping `events` disconnects implicitly: the next send to this observer
/// fails and the hub removes it.
#[derive(Debug)]
pub struct Subscription<T> {
    pub id: ObserverId,
    pub events: mpsc::UnboundedReceiver<T>,
}
