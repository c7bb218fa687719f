//! Core job data types.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Job Status
// ============================================================================

/// Status of a job in the processing pipeline.
///
/// The pipeline statuses are declared in execution order, so the derived
/// `Ord` follows the pipeline. `Completed`, `Failed` and `Cancelled` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Downloading,
    Transcribing,
    Translating,
    ProcessingVideo,
    Analyzing,
    Publishing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 10] = [
        JobStatus::Pending,
        JobStatus::Downloading,
        JobStatus::Transcribing,
        JobStatus::Translating,
        JobStatus::ProcessingVideo,
        JobStatus::Analyzing,
        JobStatus::Publishing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    /// Returns true if this is a terminal status (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Returns true if a worker is executing a stage for this job.
    pub fn is_active(&self) -> bool {
        !self.is_terminal() && *self != JobStatus::Pending
    }

    /// The status that follows this one on the success path.
    pub fn next(&self) -> Option<JobStatus> {
        match self {
            JobStatus::Pending => Some(JobStatus::Downloading),
            JobStatus::Downloading => Some(JobStatus::Transcribing),
            JobStatus::Transcribing => Some(JobStatus::Translating),
            JobStatus::Translating => Some(JobStatus::ProcessingVideo),
            JobStatus::ProcessingVideo => Some(JobStatus::Analyzing),
            JobStatus::Analyzing => Some(JobStatus::Publishing),
            JobStatus::Publishing => Some(JobStatus::Completed),
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => None,
        }
    }

    /// Whether moving from `self` to `next` is an edge of the job state graph.
    ///
    /// Staying in the same non-terminal status is allowed so progress can be
    /// refreshed within a stage.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            JobStatus::Failed | JobStatus::Cancelled => true,
            other if other == *self => true,
            other => self.next() == Some(other),
        }
    }

    /// Database and wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Downloading => "DOWNLOADING",
            JobStatus::Transcribing => "TRANSCRIBING",
            JobStatus::Translating => "TRANSLATING",
            JobStatus::ProcessingVideo => "PROCESSING_VIDEO",
            JobStatus::Analyzing => "ANALYZING",
            JobStatus::Publishing => "PUBLISHING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    /// Lowercase label used as the `stage` field of status events.
    pub fn stage_label(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Downloading => "downloading",
            JobStatus::Transcribing => "transcribing",
            JobStatus::Translating => "translating",
            JobStatus::ProcessingVideo => "processing_video",
            JobStatus::Analyzing => "analyzing",
            JobStatus::Publishing => "publishing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown job status: {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    /// Accepts both the uppercase wire form and the lowercase stage label.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == upper)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

// ============================================================================
// Job
// ============================================================================

/// A unit of pipeline work tracked from submission to a terminal outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    /// Internal sequential id.
    pub id: i64,
    /// Externally exposed identifier.
    pub uuid: Uuid,
    pub source_url: String,
    /// Video identifier extracted from the source URL, refined after download.
    pub video_id: Option<String>,
    pub status: JobStatus,
    /// Progress percentage (0-100).
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Set once cancellation has been requested. Never cleared.
    pub cancelled: bool,
}

impl Job {
    /// Wall-clock duration between start and completion, when both are known.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => Some(completed - started),
            _ => None,
        }
    }
}

/// Typed status patch applied by [`JobStore::update_status`](super::JobStore::update_status).
#[derive(Debug, Clone, PartialEq)]
pub struct JobUpdate {
    pub status: JobStatus,
    /// New progress value. `None` keeps the stored value.
    pub progress: Option<u8>,
    /// Error message to record. `None` keeps the stored value.
    pub error_message: Option<String>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status,
            progress: None,
            error_message: None,
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress.min(100));
        self
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            progress: None,
            error_message: Some(message.into()),
        }
    }
}

// ============================================================================
// Logs
// ============================================================================

/// Severity of a job log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<LogLevel> {
        match s {
            "DEBUG" => Some(LogLevel::Debug),
            "INFO" => Some(LogLevel::Info),
            "WARNING" | "WARN" => Some(LogLevel::Warning),
            "ERROR" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// An immutable log line owned by one job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub id: i64,
    pub job_id: i64,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub stage: Option<String>,
    pub message: String,
}

// ============================================================================
// Artifacts
// ============================================================================

/// Source video metadata reported by the download stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VideoMetadata {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub channel_name: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub upload_date: Option<String>,
    #[serde(default)]
    pub duration_secs: Option<u32>,
    #[serde(default)]
    pub view_count: Option<u64>,
    #[serde(default)]
    pub like_count: Option<u64>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Kind of file produced for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    OriginalVideo,
    SubtitledVideo,
    SourceSubtitles,
    TranslatedSubtitles,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::OriginalVideo => "original_video",
            FileKind::SubtitledVideo => "subtitled_video",
            FileKind::SourceSubtitles => "source_subtitles",
            FileKind::TranslatedSubtitles => "translated_subtitles",
        }
    }

    pub fn parse(s: &str) -> Option<FileKind> {
        match s {
            "original_video" => Some(FileKind::OriginalVideo),
            "subtitled_video" => Some(FileKind::SubtitledVideo),
            "source_subtitles" => Some(FileKind::SourceSubtitles),
            "translated_subtitles" => Some(FileKind::TranslatedSubtitles),
            _ => None,
        }
    }
}

/// A file produced by a stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobFile {
    pub kind: FileKind,
    pub path: String,
    pub size_mb: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl JobFile {
    pub fn new(kind: FileKind, path: impl Into<String>, size_mb: Option<f64>) -> Self {
        Self {
            kind,
            path: path.into(),
            size_mb,
            created_at: Utc::now(),
        }
    }
}

/// Result of the content analysis stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContentAnalysis {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub key_insights: Vec<String>,
    #[serde(default)]
    pub highlights: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
}

/// Outcome of publishing to one platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStatus {
    Success,
    Failed,
    Skipped,
}

impl PublishStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishStatus::Success => "success",
            PublishStatus::Failed => "failed",
            PublishStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<PublishStatus> {
        match s {
            "success" => Some(PublishStatus::Success),
            "failed" => Some(PublishStatus::Failed),
            "skipped" => Some(PublishStatus::Skipped),
            _ => None,
        }
    }
}

/// Publishing result for a single destination platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishingOutcome {
    pub platform: String,
    pub status: PublishStatus,
    #[serde(default)]
    pub post_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Filled in by the store when the outcome is recorded as a success.
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

/// A stage result persisted against a job.
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    Metadata(VideoMetadata),
    File(JobFile),
    Analysis(ContentAnalysis),
    Publishing(PublishingOutcome),
}

impl Artifact {
    pub fn kind(&self) -> &'static str {
        match self {
            Artifact::Metadata(_) => "metadata",
            Artifact::File(_) => "file",
            Artifact::Analysis(_) => "analysis",
            Artifact::Publishing(_) => "publishing",
        }
    }
}

// ============================================================================
// Query Results
// ============================================================================

/// A job together with every artifact recorded for it.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobDetail {
    #[serde(flatten)]
    pub job: Job,
    pub metadata: Option<VideoMetadata>,
    pub files: Vec<JobFile>,
    pub analysis: Option<ContentAnalysis>,
    pub publishing: Vec<PublishingOutcome>,
}

/// One page of a job listing.
#[derive(Debug, Clone, Serialize)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    pub total: i64,
}

/// Aggregate job statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobStatistics {
    pub total: i64,
    pub pending: i64,
    /// Jobs currently executing a stage.
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub by_status: BTreeMap<JobStatus, i64>,
    /// Mean duration of completed jobs, in minutes.
    pub avg_duration_minutes: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Publishing.is_terminal());
    }

    #[test]
    fn test_active_statuses() {
        assert!(!JobStatus::Pending.is_active());
        assert!(JobStatus::Downloading.is_active());
        assert!(JobStatus::ProcessingVideo.is_active());
        assert!(!JobStatus::Completed.is_active());
        assert!(!JobStatus::Cancelled.is_active());
    }

    #[test]
    fn test_success_path_is_a_chain() {
        let mut status = JobStatus::Pending;
        let mut visited = vec![status];
        while let Some(next) = status.next() {
            assert!(status.can_transition_to(next));
            status = next;
            visited.push(status);
        }
        assert_eq!(status, JobStatus::Completed);
        assert_eq!(visited.len(), 8);
    }

    #[test]
    fn test_cannot_skip_stages() {
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Transcribing));
        assert!(!JobStatus::Downloading.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Analyzing.can_transition_to(JobStatus::Downloading));
    }

    #[test]
    fn test_failure_and_cancel_from_any_non_terminal() {
        for status in JobStatus::ALL.into_iter().filter(|s| !s.is_terminal()) {
            assert!(status.can_transition_to(JobStatus::Failed), "{status}");
            assert!(status.can_transition_to(JobStatus::Cancelled), "{status}");
        }
    }

    #[test]
    fn test_no_transitions_out_of_terminal() {
        for from in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            for to in JobStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&JobStatus::ProcessingVideo).unwrap();
        assert_eq!(json, "\"PROCESSING_VIDEO\"");

        let parsed: JobStatus = serde_json::from_str("\"CANCELLED\"").unwrap();
        assert_eq!(parsed, JobStatus::Cancelled);
    }

    #[test]
    fn test_status_from_str_accepts_labels() {
        assert_eq!("processing_video".parse::<JobStatus>(), Ok(JobStatus::ProcessingVideo));
        assert_eq!("COMPLETED".parse::<JobStatus>(), Ok(JobStatus::Completed));
        assert!("bogus".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_status_map_keys_serialize_as_strings() {
        let mut stats = JobStatistics::default();
        stats.by_status.insert(JobStatus::Completed, 3);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["by_status"]["COMPLETED"], 3);
    }

    #[test]
    fn test_job_update_clamps_progress() {
        let update = JobUpdate::status(JobStatus::Downloading).with_progress(250);
        assert_eq!(update.progress, Some(100));
    }

    #[test]
    fn test_log_level_round_trip() {
        for level in [LogLevel::Debug, LogLevel::Info, LogLevel::Warning, LogLevel::Error] {
            assert_eq!(LogLevel::parse(level.as_str()), Some(level));
        }
    }
}
