//! Stage collaborator traits.
//!
//! Collaborators are synchronous and may block; the pipeline runner calls
//! them on the blocking thread pool.

use std::sync::Arc;

use super::error::StageError;
use super::types::{
    AnalyzeInput, DownloadInput, DownloadOutput, ProcessVideoInput, ProcessedVideo, PublishInput,
    TranscribeInput, Transcript, TranslateInput, Translation,
};
use crate::job::{ContentAnalysis, PublishingOutcome};

/// Fetches the source video and its metadata.
pub trait Downloader: Send + Sync {
    fn download(&self, input: DownloadInput) -> Result<DownloadOutput, StageError>;
}

/// Produces a transcript from the downloaded video.
pub trait Transcriber: Send + Sync {
    fn transcribe(&self, input: TranscribeInput) -> Result<Transcript, StageError>;
}

/// Translates the transcript and writes subtitle files.
pub trait Translator: Send + Sync {
    fn translate(&self, input: TranslateInput) -> Result<Translation, StageError>;
}

/// Burns subtitles into the video.
pub trait VideoProcessor: Send + Sync {
    fn process_video(&self, input: ProcessVideoInput) -> Result<ProcessedVideo, StageError>;
}

/// Summarizes the content.
pub trait Analyzer: Send + Sync {
    fn analyze(&self, input: AnalyzeInput) -> Result<ContentAnalysis, StageError>;
}

/// Publishes the result to destination platforms.
///
/// A platform-level failure is reported as an outcome, not as an error;
/// `Err` fails the whole job.
pub trait Publisher: Send + Sync {
    fn publish(&self, input: PublishInput) -> Result<Vec<PublishingOutcome>, StageError>;
}

/// The six collaborators a pipeline run needs.
#[derive(Clone)]
pub struct StageSet {
    pub downloader: Arc<dyn Downloader>,
    pub transcriber: Arc<dyn Transcriber>,
    pub translator: Arc<dyn Translator>,
    pub video_processor: Arc<dyn VideoProcessor>,
    pub analyzer: Arc<dyn Analyzer>,
    pub publisher: Arc<dyn Publisher>,
}

impl StageSet {
    /// Use one value for every stage.
    pub fn from_shared<T>(stages: Arc<T>) -> Self
    where
        T: Downloader + Transcriber + Translator + VideoProcessor + Analyzer + Publisher + 'static,
    {
        Self {
            downloader: stages.clone(),
            transcriber: stages.clone(),
            translator: stages.clone(),
            video_processor: stages.clone(),
            analyzer: stages.clone(),
            publisher: stages,
        }
    }
}
