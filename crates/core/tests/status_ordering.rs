//! Status stream ordering under concurrent writers.
//!
//! A user cancel that lands between a runner's status write and its
//! broadcast must not reach observers ahead of that write.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use uuid::Uuid;

use distillery_core::{
    hub::BroadcastHub,
    job::{
        Artifact, CreateJobRequest, Job, JobDetail, JobError, JobFilter, JobStatistics,
        JobStatus, JobStore, JobUpdate, LogEntry, LogLevel, SqliteJobStore,
    },
    queue::{QueueConfig, QueueManager},
    service::JobService,
    stage::StageSet,
    testing::{sample_url, MockStages},
};

type Hook = Box<dyn FnOnce() + Send>;

/// Delegating store that runs a hook once, right after a job enters
/// `TRANSLATING`, before control returns to the writer.
struct InterleavingStore {
    inner: SqliteJobStore,
    on_translating: Mutex<Option<Hook>>,
}

impl InterleavingStore {
    fn new() -> Self {
        Self {
            inner: SqliteJobStore::in_memory().expect("Failed to create job store"),
            on_translating: Mutex::new(None),
        }
    }

    fn arm(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_translating.lock().unwrap() = Some(Box::new(hook));
    }
}

impl JobStore for InterleavingStore {
    fn create(&self, request: CreateJobRequest) -> Result<Job, JobError> {
        self.inner.create(request)
    }

    fn get(&self, id: i64) -> Result<Option<Job>, JobError> {
        self.inner.get(id)
    }

    fn get_by_uuid(&self, uuid: &Uuid) -> Result<Option<Job>, JobError> {
        self.inner.get_by_uuid(uuid)
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, JobError> {
        self.inner.list(filter)
    }

    fn count(&self, filter: &JobFilter) -> Result<i64, JobError> {
        self.inner.count(filter)
    }

    fn pending_jobs(&self) -> Result<Vec<Job>, JobError> {
        self.inner.pending_jobs()
    }

    fn update_status(&self, id: i64, update: JobUpdate) -> Result<Job, JobError> {
        let entering_translation = update.status == JobStatus::Translating;
        let job = self.inner.update_status(id, update)?;
        if entering_translation {
            let hook = self.on_translating.lock().unwrap().take();
            if let Some(hook) = hook {
                hook();
            }
        }
        Ok(job)
    }

    fn cancel(&self, id: i64) -> Result<Job, JobError> {
        self.inner.cancel(id)
    }

    fn set_video_id(&self, id: i64, video_id: &str) -> Result<(), JobError> {
        self.inner.set_video_id(id, video_id)
    }

    fn append_log(
        &self,
        id: i64,
        level: LogLevel,
        stage: Option<&str>,
        message: &str,
    ) -> Result<LogEntry, JobError> {
        self.inner.append_log(id, level, stage, message)
    }

    fn logs(&self, id: i64, offset: i64, limit: i64) -> Result<Vec<LogEntry>, JobError> {
        self.inner.logs(id, offset, limit)
    }

    fn record_artifact(&self, id: i64, artifact: Artifact) -> Result<(), JobError> {
        self.inner.record_artifact(id, artifact)
    }

    fn detail(&self, id: i64) -> Result<Option<JobDetail>, JobError> {
        self.inner.detail(id)
    }

    fn statistics(&self) -> Result<JobStatistics, JobError> {
        self.inner.statistics()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_during_stage_write_is_observed_last() {
    let store = Arc::new(InterleavingStore::new());
    let shared: Arc<dyn JobStore> = Arc::clone(&store) as Arc<dyn JobStore>;
    let hub = Arc::new(BroadcastHub::new());
    let queue = Arc::new(QueueManager::new(
        QueueConfig {
            dequeue_timeout_ms: 25,
            error_backoff_ms: 25,
            ..Default::default()
        },
        Arc::clone(&shared),
        Arc::clone(&hub),
        StageSet::from_shared(Arc::new(
            MockStages::new().with_delay(Duration::from_millis(50)),
        )),
    ));
    let service = Arc::new(JobService::new(
        Arc::clone(&shared),
        Arc::clone(&hub),
        Arc::clone(&queue),
    ));
    let mut status = service.subscribe_status();

    let job = service.submit(&sample_url(1)).unwrap();

    // Cancel from another thread once TRANSLATING is stored, and hold the
    // writer long enough for that cancel to finish if nothing orders them.
    let canceller: Arc<Mutex<Option<JoinHandle<Result<Job, JobError>>>>> =
        Arc::new(Mutex::new(None));
    {
        let service = Arc::clone(&service);
        let canceller = Arc::clone(&canceller);
        let uuid = job.uuid;
        store.arm(move || {
            let handle = std::thread::spawn(move || service.cancel(&uuid));
            *canceller.lock().unwrap() = Some(handle);
            std::thread::sleep(Duration::from_millis(100));
        });
    }
    queue.start(1);

    let mut observed = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), status.events.recv())
            .await
            .expect("Timed out waiting for status event")
            .expect("Status channel closed");
        assert_eq!(event.job_uuid, job.uuid);
        let terminal = event.status.is_terminal();
        observed.push(event.status);
        if terminal {
            break;
        }
    }

    let handle = canceller
        .lock()
        .unwrap()
        .take()
        .expect("cancel was never issued");
    let cancelled = handle.join().unwrap().expect("cancel failed");
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    for pair in observed.windows(2) {
        assert!(
            pair[0].can_transition_to(pair[1]),
            "illegal edge {:?} -> {:?} in {:?}",
            pair[0],
            pair[1],
            observed
        );
    }
    assert_eq!(observed.first(), Some(&JobStatus::Downloading));
    assert_eq!(observed.last(), Some(&JobStatus::Cancelled));
    let translating = observed
        .iter()
        .position(|s| *s == JobStatus::Translating)
        .expect("TRANSLATING was never observed");
    assert_eq!(translating, observed.len() - 2);

    // Nothing follows the terminal event.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(status.events.try_recv().is_err());
    assert_eq!(
        shared.get(job.id).unwrap().unwrap().status,
        JobStatus::Cancelled
    );

    queue.stop().await;
}
