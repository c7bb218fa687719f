//! Pipeline runner implementation.

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::hub::BroadcastHub;
use crate::job::{
    Artifact, FileKind, Job, JobError, JobFile, JobStatus, JobStore, JobUpdate, LogLevel,
};
use crate::metrics::{JOB_OUTCOMES, STAGE_DURATION};
use crate::stage::{
    AnalyzeInput, DownloadInput, JobContext, ProcessVideoInput, PublishInput, Stage, StageError,
    StageSet, TranscribeInput, TranslateInput,
};

use super::types::{CancelReason, PipelineError, RunOutcome};

const COMPLETED_PROGRESS: u8 = 100;

/// Drives a single job through every stage.
///
/// A runner is bound to one job and consumed by [`run`](Self::run).
pub struct PipelineRunner {
    job_id: i64,
    job_uuid: Uuid,
    source_url: String,
    video_id: Option<String>,
    store: Arc<dyn JobStore>,
    hub: Arc<BroadcastHub>,
    stages: StageSet,
    cancel: CancellationToken,
    shutdown: CancellationToken,
}

impl PipelineRunner {
    /// Bind a runner to `job`.
    ///
    /// Cancelling `cancel` stops the run at the next stage boundary. Unless
    /// [`with_shutdown`](Self::with_shutdown) says otherwise, that counts as
    /// a shutdown.
    pub fn new(
        job: &Job,
        store: Arc<dyn JobStore>,
        hub: Arc<BroadcastHub>,
        stages: StageSet,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            job_id: job.id,
            job_uuid: job.uuid,
            source_url: job.source_url.clone(),
            video_id: job.video_id.clone(),
            store,
            hub,
            stages,
            shutdown: cancel.clone(),
            cancel,
        }
    }

    /// The pool-wide token. A cancelled execution token only counts as a
    /// shutdown when this one is cancelled too.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Run the job to a terminal status.
    pub async fn run(mut self) -> RunOutcome {
        info!(job_id = self.job_id, job_uuid = %self.job_uuid, "Starting pipeline");
        let started = Instant::now();

        let outcome = match self.execute().await {
            Ok(()) => self.complete(),
            Err(PipelineError::Cancelled(reason)) => self.stop_cancelled(reason),
            Err(e) => self.fail(&e),
        };

        JOB_OUTCOMES.with_label_values(&[outcome.label()]).inc();
        info!(
            job_id = self.job_id,
            outcome = outcome.label(),
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Pipeline finished"
        );
        outcome
    }

    async fn execute(&mut self) -> Result<(), PipelineError> {
        // Download
        self.enter(Stage::Download)?;
        let downloader = self.stages.downloader.clone();
        let input = DownloadInput {
            context: self.context(),
        };
        let download = self
            .invoke(Stage::Download, move || downloader.download(input))
            .await?;
        self.store
            .record_artifact(self.job_id, Artifact::Metadata(download.metadata.clone()))?;
        if self.video_id.is_none() {
            self.store.set_video_id(self.job_id, &download.video_id)?;
            self.video_id = Some(download.video_id.clone());
        }
        let video_id = self
            .video_id
            .clone()
            .unwrap_or_else(|| download.video_id.clone());
        self.log_info(
            Stage::Download,
            &format!("Video downloaded: {}", download.video_path.display()),
        );

        // Transcribe
        self.enter(Stage::Transcribe)?;
        let transcriber = self.stages.transcriber.clone();
        let input = TranscribeInput {
            context: self.context(),
            video_id: video_id.clone(),
            video_path: download.video_path.clone(),
        };
        let transcript = self
            .invoke(Stage::Transcribe, move || transcriber.transcribe(input))
            .await?;
        self.log_info(Stage::Transcribe, "Transcription completed");

        // Translate
        self.enter(Stage::Translate)?;
        let translator = self.stages.translator.clone();
        let input = TranslateInput {
            context: self.context(),
            video_id: video_id.clone(),
            transcript: transcript.clone(),
        };
        let translation = self
            .invoke(Stage::Translate, move || translator.translate(input))
            .await?;
        self.log_info(Stage::Translate, "Translation completed");

        // Process video
        self.enter(Stage::ProcessVideo)?;
        let processor = self.stages.video_processor.clone();
        let input = ProcessVideoInput {
            context: self.context(),
            video_id: video_id.clone(),
            video_path: download.video_path.clone(),
            subtitles_path: translation.translated_subtitles.clone(),
        };
        let processed = self
            .invoke(Stage::ProcessVideo, move || processor.process_video(input))
            .await?;
        let files = [
            JobFile::new(
                FileKind::OriginalVideo,
                download.video_path.display().to_string(),
                download.size_mb,
            ),
            JobFile::new(
                FileKind::SourceSubtitles,
                translation.source_subtitles.display().to_string(),
                None,
            ),
            JobFile::new(
                FileKind::TranslatedSubtitles,
                translation.translated_subtitles.display().to_string(),
                None,
            ),
            JobFile::new(
                FileKind::SubtitledVideo,
                processed.video_path.display().to_string(),
                processed.size_mb,
            ),
        ];
        for file in files {
            self.store.record_artifact(self.job_id, Artifact::File(file))?;
        }
        self.log_info(Stage::ProcessVideo, "Video processing completed");

        // Analyze
        self.enter(Stage::Analyze)?;
        let analyzer = self.stages.analyzer.clone();
        let input = AnalyzeInput {
            context: self.context(),
            video_id: video_id.clone(),
            transcript_text: transcript.full_text,
            translated_text: translation.full_text,
        };
        let analysis = self
            .invoke(Stage::Analyze, move || analyzer.analyze(input))
            .await?;
        self.store
            .record_artifact(self.job_id, Artifact::Analysis(analysis.clone()))?;
        self.log_info(Stage::Analyze, "Content analysis completed");

        // Publish
        self.enter(Stage::Publish)?;
        let publisher = self.stages.publisher.clone();
        let input = PublishInput {
            context: self.context(),
            video_id,
            video_path: processed.video_path,
            metadata: download.metadata,
            analysis,
        };
        let outcomes = self
            .invoke(Stage::Publish, move || publisher.publish(input))
            .await?;
        let published = outcomes.len();
        for outcome in outcomes {
            self.store
                .record_artifact(self.job_id, Artifact::Publishing(outcome))?;
        }
        self.log_info(
            Stage::Publish,
            &format!("Publishing completed ({} platforms)", published),
        );

        self.checkpoint()
    }

    fn context(&self) -> JobContext {
        JobContext {
            job_id: self.job_id,
            job_uuid: self.job_uuid,
            source_url: self.source_url.clone(),
            video_id: self.video_id.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Stop if the job was cancelled since the last boundary.
    fn checkpoint(&self) -> Result<(), PipelineError> {
        let job = self
            .store
            .get(self.job_id)?
            .ok_or_else(|| JobError::NotFound(self.job_id.to_string()))?;

        if job.cancelled || job.status.is_terminal() {
            return Err(PipelineError::Cancelled(CancelReason::UserRequested));
        }
        if self.cancel.is_cancelled() {
            let reason = if self.shutdown.is_cancelled() {
                CancelReason::Shutdown
            } else {
                CancelReason::UserRequested
            };
            return Err(PipelineError::Cancelled(reason));
        }
        Ok(())
    }

    /// Move the job into a stage's status and announce it.
    fn enter(&self, stage: Stage) -> Result<(), PipelineError> {
        self.checkpoint()?;

        let update = JobUpdate::status(stage.status()).with_progress(stage.progress());
        self.transition(update)?;
        self.log_info(stage, stage.start_message());

        debug!(job_id = self.job_id, stage = %stage, "Entered stage");
        Ok(())
    }

    fn transition(&self, update: JobUpdate) -> Result<Job, PipelineError> {
        self.hub
            .publish_status(|| self.store.update_status(self.job_id, update))
            .map_err(store_error)
    }

    /// Write a terminal status and its log entry, then announce it.
    fn settle(
        &self,
        write: impl FnOnce() -> Result<Job, JobError>,
        level: LogLevel,
        stage: &str,
        message: &str,
    ) -> Result<Job, JobError> {
        self.hub.publish_status(|| {
            let job = write()?;
            self.log(level, stage, message);
            Ok(job)
        })
    }

    /// Run a stage collaborator on the blocking pool.
    async fn invoke<T, F>(&self, stage: Stage, call: F) -> Result<T, PipelineError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, StageError> + Send + 'static,
    {
        let started = Instant::now();
        let result = match tokio::task::spawn_blocking(call).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(StageError::Panicked(panic_message(e.into_panic()))),
            Err(e) => Err(StageError::Panicked(e.to_string())),
        };

        let label = if result.is_ok() { "success" } else { "failed" };
        STAGE_DURATION
            .with_label_values(&[stage.key(), label])
            .observe(started.elapsed().as_secs_f64());

        result.map_err(|source| PipelineError::Stage { stage, source })
    }

    fn complete(&self) -> RunOutcome {
        let update = JobUpdate::status(JobStatus::Completed).with_progress(COMPLETED_PROGRESS);
        let result = self.settle(
            || self.store.update_status(self.job_id, update),
            LogLevel::Info,
            JobStatus::Completed.stage_label(),
            "Pipeline completed successfully",
        );

        match result.map_err(store_error) {
            Ok(_) => RunOutcome::Completed,
            Err(PipelineError::Cancelled(reason)) => self.stop_cancelled(reason),
            Err(e) => self.fail(&e),
        }
    }

    fn stop_cancelled(&self, reason: CancelReason) -> RunOutcome {
        info!(job_id = self.job_id, reason = %reason, "Pipeline cancelled");

        let message = match reason {
            CancelReason::UserRequested => "Job cancelled by user",
            CancelReason::Shutdown => "Job interrupted by shutdown",
        };
        let result = self.settle(
            || self.store.cancel(self.job_id),
            LogLevel::Info,
            JobStatus::Cancelled.stage_label(),
            message,
        );

        match result {
            Ok(_) => {}
            // Already finalized, normally by the service.
            Err(JobError::Conflict { .. }) => {
                if reason == CancelReason::UserRequested {
                    self.log(
                        LogLevel::Info,
                        JobStatus::Cancelled.stage_label(),
                        "Pipeline stopped at cancellation checkpoint",
                    );
                }
            }
            Err(e) => {
                error!(
                    job_id = self.job_id,
                    reason = %reason,
                    error = %e,
                    "Failed to mark job cancelled"
                );
            }
        }

        RunOutcome::Cancelled(reason)
    }

    fn fail(&self, err: &PipelineError) -> RunOutcome {
        let message = match err {
            PipelineError::Stage { source, .. } => source.to_string(),
            other => other.to_string(),
        };
        error!(job_id = self.job_id, error = %err, "Pipeline failed");

        let result = self.settle(
            || self.store.update_status(self.job_id, JobUpdate::failed(&message)),
            LogLevel::Error,
            "error",
            &format!("Pipeline error: {}", message),
        );

        match result {
            Ok(_) => RunOutcome::Failed(message),
            Err(JobError::InvalidTransition {
                from: JobStatus::Cancelled,
                ..
            }) => self.stop_cancelled(CancelReason::UserRequested),
            Err(e) => {
                error!(job_id = self.job_id, error = %e, "Failed to mark job as failed");
                RunOutcome::Failed(message)
            }
        }
    }

    fn log_info(&self, stage: Stage, message: &str) {
        self.log(LogLevel::Info, stage.status().stage_label(), message);
    }

    /// Persist a job log entry and fan it out to log observers.
    fn log(&self, level: LogLevel, stage: &str, message: &str) {
        let result = self.hub.publish_log(self.job_id, || {
            self.store
                .append_log(self.job_id, level, Some(stage), message)
        });
        if let Err(e) = result {
            warn!(job_id = self.job_id, error = %e, "Failed to write job log");
        }
    }
}

fn store_error(err: JobError) -> PipelineError {
    match err {
        // A cancel landed between the checkpoint and the write.
        JobError::InvalidTransition {
            from: JobStatus::Cancelled,
            ..
        } => PipelineError::Cancelled(CancelReason::UserRequested),
        other => other.into(),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
