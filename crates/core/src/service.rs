//! Job service: the command and query façade used by the API layer.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::hub::{BroadcastHub, LogEvent, ObserverId, StatusEvent, Subscription};
use crate::job::{
    extract_video_id, CreateJobRequest, Job, JobDetail, JobError, JobFilter, JobPage,
    JobStatistics, JobStatus, JobStore, JobUpdate, LogEntry, LogLevel,
};
use crate::metrics::JOBS_SUBMITTED;
use crate::queue::{QueueManager, QueueStatus};

/// Error message recorded on jobs a restart left mid-pipeline.
pub const RESTART_INTERRUPTED: &str = "Interrupted by service restart";

/// What startup recovery did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// `PENDING` jobs put back on the queue.
    pub requeued: usize,
    /// Jobs found mid-pipeline and marked failed.
    pub failed: usize,
}

/// Submission, query and cancellation of jobs.
pub struct JobService {
    store: Arc<dyn JobStore>,
    hub: Arc<BroadcastHub>,
    queue: Arc<QueueManager>,
}

impl JobService {
    pub fn new(store: Arc<dyn JobStore>, hub: Arc<BroadcastHub>, queue: Arc<QueueManager>) -> Self {
        Self { store, hub, queue }
    }

    /// Validate a source URL, create a job for it and enqueue it.
    pub fn submit(&self, source_url: &str) -> Result<Job, JobError> {
        let source_url = source_url.trim();
        let video_id = extract_video_id(source_url)
            .ok_or_else(|| JobError::Validation(source_url.to_string()))?;

        let job = self.store.create(CreateJobRequest {
            source_url: source_url.to_string(),
            video_id: Some(video_id),
        })?;
        JOBS_SUBMITTED.inc();

        info!(job_id = job.id, job_uuid = %job.uuid, "Job submitted");
        self.queue.enqueue(job.id, job.source_url.clone());
        Ok(job)
    }

    pub fn get(&self, uuid: &Uuid) -> Result<Job, JobError> {
        self.store
            .get_by_uuid(uuid)?
            .ok_or_else(|| JobError::NotFound(uuid.to_string()))
    }

    pub fn detail(&self, uuid: &Uuid) -> Result<JobDetail, JobError> {
        let job = self.get(uuid)?;
        self.store
            .detail(job.id)?
            .ok_or_else(|| JobError::NotFound(uuid.to_string()))
    }

    /// One page of jobs, newest first, with the unpaged total.
    pub fn list(&self, filter: &JobFilter) -> Result<JobPage, JobError> {
        let jobs = self.store.list(filter)?;
        let total = self.store.count(filter)?;
        Ok(JobPage { jobs, total })
    }

    pub fn logs(&self, uuid: &Uuid, offset: i64, limit: i64) -> Result<Vec<LogEntry>, JobError> {
        let job = self.get(uuid)?;
        self.store.logs(job.id, offset, limit)
    }

    pub fn statistics(&self) -> Result<JobStatistics, JobError> {
        self.store.statistics()
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.queue.status()
    }

    /// Cancel a job.
    ///
    /// The `CANCELLED` transition is persisted and broadcast here; a worker
    /// running the job stops at its next stage boundary. Fails with
    /// `Conflict` if the job is already terminal.
    pub fn cancel(&self, uuid: &Uuid) -> Result<Job, JobError> {
        let job = self.get(uuid)?;
        let job = self.hub.publish_status(|| {
            let job = self.store.cancel(job.id)?;
            self.log(
                job.id,
                LogLevel::Info,
                JobStatus::Cancelled.stage_label(),
                "Job cancelled by user",
            );
            Ok::<_, JobError>(job)
        })?;

        let signalled = self.queue.cancel(job.id);
        info!(job_id = job.id, job_uuid = %job.uuid, signalled, "Job cancelled");
        Ok(job)
    }

    /// Stream a job's log: full history first, then live entries.
    pub fn subscribe_logs(&self, uuid: &Uuid) -> Result<(Job, Subscription<LogEvent>), JobError> {
        let job = self.get(uuid)?;
        let subscription = self
            .hub
            .connect_logs(job.id, || self.store.logs(job.id, 0, i64::MAX))?;
        Ok((job, subscription))
    }

    pub fn unsubscribe_logs(&self, job_id: i64, observer: ObserverId) -> bool {
        self.hub.disconnect_logs(job_id, observer)
    }

    pub fn subscribe_status(&self) -> Subscription<StatusEvent> {
        self.hub.connect_status()
    }

    pub fn unsubscribe_status(&self, observer: ObserverId) -> bool {
        self.hub.disconnect_status(observer)
    }

    /// Reconcile jobs left behind by a previous process.
    ///
    /// Jobs caught mid-pipeline are marked `FAILED`. When `requeue_pending`
    /// is set, `PENDING` jobs are enqueued again, oldest first.
    pub fn recover_on_startup(&self, requeue_pending: bool) -> Result<RecoveryReport, JobError> {
        let mut report = RecoveryReport::default();

        for status in JobStatus::ALL.into_iter().filter(JobStatus::is_active) {
            let filter = JobFilter::new().with_status(status).with_limit(i64::MAX);
            for job in self.store.list(&filter)? {
                self.hub.publish_status(|| {
                    let job = self
                        .store
                        .update_status(job.id, JobUpdate::failed(RESTART_INTERRUPTED))?;
                    self.log(
                        job.id,
                        LogLevel::Error,
                        "error",
                        &format!("Pipeline error: {}", RESTART_INTERRUPTED),
                    );
                    Ok::<_, JobError>(job)
                })?;
                warn!(job_id = job.id, status = %status, "Marked interrupted job as failed");
                report.failed += 1;
            }
        }

        if requeue_pending {
            for job in self.store.pending_jobs()? {
                self.queue.enqueue(job.id, job.source_url.clone());
                report.requeued += 1;
            }
        }

        info!(
            requeued = report.requeued,
            failed = report.failed,
            "Startup recovery finished"
        );
        Ok(report)
    }

    fn log(&self, job_id: i64, level: LogLevel, stage: &str, message: &str) {
        let logged = self.hub.publish_log(job_id, || {
            self.store.append_log(job_id, level, Some(stage), message)
        });
        if let Err(e) = logged {
            warn!(job_id, error = %e, "Failed to write job log");
        }
    }
}
