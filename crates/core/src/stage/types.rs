//! Stage identifiers and the typed inputs and outputs exchanged with
//! stage collaborators.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::job::{ContentAnalysis, JobStatus, VideoMetadata};

/// One ordered step of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Download,
    Transcribe,
    Translate,
    ProcessVideo,
    Analyze,
    Publish,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 6] = [
        Stage::Download,
        Stage::Transcribe,
        Stage::Translate,
        Stage::ProcessVideo,
        Stage::Analyze,
        Stage::Publish,
    ];

    /// Job status while this stage runs.
    pub fn status(&self) -> JobStatus {
        match self {
            Stage::Download => JobStatus::Downloading,
            Stage::Transcribe => JobStatus::Transcribing,
            Stage::Translate => JobStatus::Translating,
            Stage::ProcessVideo => JobStatus::ProcessingVideo,
            Stage::Analyze => JobStatus::Analyzing,
            Stage::Publish => JobStatus::Publishing,
        }
    }

    /// Progress reported when the stage starts.
    pub fn progress(&self) -> u8 {
        match self {
            Stage::Download => 10,
            Stage::Transcribe => 25,
            Stage::Translate => 40,
            Stage::ProcessVideo => 60,
            Stage::Analyze => 75,
            Stage::Publish => 85,
        }
    }

    /// Configuration key and metric label.
    pub fn key(&self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Transcribe => "transcribe",
            Stage::Translate => "translate",
            Stage::ProcessVideo => "process_video",
            Stage::Analyze => "analyze",
            Stage::Publish => "publish",
        }
    }

    pub fn start_message(&self) -> &'static str {
        match self {
            Stage::Download => "Starting video download...",
            Stage::Transcribe => "Starting transcription...",
            Stage::Translate => "Starting translation...",
            Stage::ProcessVideo => "Burning subtitles into video...",
            Stage::Analyze => "Analyzing content...",
            Stage::Publish => "Publishing to platforms...",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

// ============================================================================
// Inputs
// ============================================================================

/// Job identity handed to every stage.
#[derive(Debug, Clone, Serialize)]
pub struct JobContext {
    pub job_id: i64,
    pub job_uuid: Uuid,
    pub source_url: String,
    pub video_id: Option<String>,
    /// Cancelled when the job is cancelled or the pool shuts down.
    /// Collaborators that can stop early may watch it.
    #[serde(skip)]
    pub cancel: CancellationToken,
}

impl JobContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadInput {
    pub context: JobContext,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscribeInput {
    pub context: JobContext,
    pub video_id: String,
    pub video_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranslateInput {
    pub context: JobContext,
    pub video_id: String,
    pub transcript: Transcript,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessVideoInput {
    pub context: JobContext,
    pub video_id: String,
    pub video_path: PathBuf,
    /// Translated subtitle file to burn in.
    pub subtitles_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeInput {
    pub context: JobContext,
    pub video_id: String,
    pub transcript_text: String,
    pub translated_text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishInput {
    pub context: JobContext,
    pub video_id: String,
    /// The subtitled video.
    pub video_path: PathBuf,
    pub metadata: VideoMetadata,
    pub analysis: ContentAnalysis,
}

// ============================================================================
// Outputs
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadOutput {
    pub video_id: String,
    pub video_path: PathBuf,
    #[serde(default)]
    pub size_mb: Option<f64>,
    #[serde(default)]
    pub metadata: VideoMetadata,
}

/// A timed piece of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub full_text: String,
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Translation {
    pub full_text: String,
    #[serde(default)]
    pub segments: Vec<Segment>,
    /// Subtitles in the source language.
    pub source_subtitles: PathBuf,
    /// Subtitles in the target language.
    pub translated_subtitles: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedVideo {
    pub video_path: PathBuf,
    #[serde(default)]
    pub size_mb: Option<f64>,
}
