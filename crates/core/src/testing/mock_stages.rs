//! Mock stage collaborators for testing.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;

use crate::job::{ContentAnalysis, PublishStatus, PublishingOutcome, VideoMetadata};
use crate::stage::{
    AnalyzeInput, Analyzer, DownloadInput, DownloadOutput, Downloader, JobContext,
    ProcessVideoInput, ProcessedVideo, PublishInput, Publisher, Segment, Stage, StageError,
    TranscribeInput, Transcriber, Transcript, TranslateInput, Translation, Translator,
    VideoProcessor,
};

/// A stage call recorded for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub job_id: i64,
    pub stage: Stage,
}

/// A latch that holds the download stage until opened.
///
/// Waiters also wake when their job's cancellation token fires, so a gated
/// pool can still be stopped.
#[derive(Debug, Default)]
pub struct StageGate {
    open: Mutex<bool>,
    opened: Condvar,
    waiting: AtomicUsize,
}

impl StageGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Release every current and future waiter.
    pub fn open(&self) {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.opened.notify_all();
    }

    /// Number of stage calls currently held.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    fn wait(&self, context: &JobContext) {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        while !*open && !context.is_cancelled() {
            open = self
                .opened
                .wait_timeout(open, Duration::from_millis(10))
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        self.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
struct FailRule {
    stage: Stage,
    video_id: Option<String>,
    message: String,
}

/// Mock implementation of every stage trait.
///
/// Provides controllable behavior for testing:
/// - Instant, deterministic outputs derived from the job's video id
/// - Failures or panics at a chosen stage
/// - A per-stage delay and an optional gate on the download stage
/// - Tracking of concurrent stage calls
///
/// # Example
///
/// ```rust,ignore
/// use distillery_core::stage::{Stage, StageSet};
/// use distillery_core::testing::MockStages;
///
/// let stages = Arc::new(MockStages::new().failing_at(Stage::Translate, "quota exceeded"));
/// let set = StageSet::from_shared(stages.clone());
/// // ... run a job ...
/// assert_eq!(stages.calls().len(), 3);
/// ```
#[derive(Debug, Default)]
pub struct MockStages {
    delay: Duration,
    fail_rules: Vec<FailRule>,
    panic_at: Option<Stage>,
    gate: Option<Arc<StageGate>>,
    calls: Mutex<Vec<RecordedCall>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockStages {
    /// Create a mock whose stages all succeed immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every stage call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail `stage` for every job.
    pub fn failing_at(mut self, stage: Stage, message: impl Into<String>) -> Self {
        self.fail_rules.push(FailRule {
            stage,
            video_id: None,
            message: message.into(),
        });
        self
    }

    /// Fail `stage` only for the job with this video id.
    pub fn failing_video_at(
        mut self,
        video_id: impl Into<String>,
        stage: Stage,
        message: impl Into<String>,
    ) -> Self {
        self.fail_rules.push(FailRule {
            stage,
            video_id: Some(video_id.into()),
            message: message.into(),
        });
        self
    }

    /// Panic inside `stage`.
    pub fn panicking_at(mut self, stage: Stage) -> Self {
        self.panic_at = Some(stage);
        self
    }

    /// Hold the download stage until the gate opens.
    pub fn with_gate(mut self, gate: Arc<StageGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Every stage call so far, in call order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Stages called for one job, in call order.
    pub fn calls_for(&self, job_id: i64) -> Vec<Stage> {
        self.calls()
            .into_iter()
            .filter(|call| call.job_id == job_id)
            .map(|call| call.stage)
            .collect()
    }

    /// Highest number of stage calls that ran at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn enter(&self, context: &JobContext, stage: Stage) -> Result<(), StageError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCall {
                job_id: context.job_id,
                stage,
            });

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);
        self.simulate(context, stage)
    }

    fn simulate(&self, context: &JobContext, stage: Stage) -> Result<(), StageError> {
        if stage == Stage::Download {
            if let Some(gate) = &self.gate {
                gate.wait(context);
            }
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.panic_at == Some(stage) {
            panic!("mock {} stage panicked", stage);
        }

        let rule = self.fail_rules.iter().find(|rule| {
            rule.stage == stage
                && rule
                    .video_id
                    .as_ref()
                    .is_none_or(|id| context.video_id.as_ref() == Some(id))
        });
        match rule {
            Some(rule) => Err(StageError::failed(rule.message.clone())),
            None => Ok(()),
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn work_dir(video_id: &str) -> PathBuf {
    PathBuf::from("/tmp/distillery-mock").join(video_id)
}

impl Downloader for MockStages {
    fn download(&self, input: DownloadInput) -> Result<DownloadOutput, StageError> {
        self.enter(&input.context, Stage::Download)?;
        let video_id = input
            .context
            .video_id
            .clone()
            .unwrap_or_else(|| format!("job{:08}", input.context.job_id));
        Ok(DownloadOutput {
            video_path: work_dir(&video_id).join("original.mp4"),
            size_mb: Some(12.5),
            metadata: VideoMetadata {
                title: Some(format!("Video {}", video_id)),
                channel_name: Some("Mock Channel".to_string()),
                duration_secs: Some(600),
                ..Default::default()
            },
            video_id,
        })
    }
}

impl Transcriber for MockStages {
    fn transcribe(&self, input: TranscribeInput) -> Result<Transcript, StageError> {
        self.enter(&input.context, Stage::Transcribe)?;
        Ok(Transcript {
            full_text: "hello world".to_string(),
            segments: vec![Segment {
                start: 0.0,
                end: 2.0,
                text: "hello world".to_string(),
            }],
            language: Some("en".to_string()),
        })
    }
}

impl Translator for MockStages {
    fn translate(&self, input: TranslateInput) -> Result<Translation, StageError> {
        self.enter(&input.context, Stage::Translate)?;
        let dir = work_dir(&input.video_id);
        Ok(Translation {
            full_text: "hola mundo".to_string(),
            segments: input
                .transcript
                .segments
                .iter()
                .map(|segment| Segment {
                    text: "hola mundo".to_string(),
                    ..segment.clone()
                })
                .collect(),
            source_subtitles: dir.join("source.srt"),
            translated_subtitles: dir.join("translated.srt"),
        })
    }
}

impl VideoProcessor for MockStages {
    fn process_video(&self, input: ProcessVideoInput) -> Result<ProcessedVideo, StageError> {
        self.enter(&input.context, Stage::ProcessVideo)?;
        Ok(ProcessedVideo {
            video_path: work_dir(&input.video_id).join("subtitled.mp4"),
            size_mb: Some(13.0),
        })
    }
}

impl Analyzer for MockStages {
    fn analyze(&self, input: AnalyzeInput) -> Result<ContentAnalysis, StageError> {
        self.enter(&input.context, Stage::Analyze)?;
        Ok(ContentAnalysis {
            summary: Some(format!("Summary of {}", input.video_id)),
            key_insights: vec!["insight".to_string()],
            highlights: vec![],
            topics: vec!["testing".to_string()],
        })
    }
}

impl Publisher for MockStages {
    fn publish(&self, input: PublishInput) -> Result<Vec<PublishingOutcome>, StageError> {
        self.enter(&input.context, Stage::Publish)?;
        Ok(vec![PublishingOutcome {
            platform: "mock".to_string(),
            status: PublishStatus::Success,
            post_id: Some(format!("post-{}", input.video_id)),
            url: None,
            error_message: None,
            published_at: Some(Utc::now()),
        }])
    }
}
