//! Queue manager implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::hub::BroadcastHub;
use crate::job::JobStore;
use crate::metrics::{JOBS_ACTIVE, QUEUE_DEPTH};
use crate::pipeline::PipelineRunner;
use crate::stage::StageSet;

use super::config::QueueConfig;
use super::types::{QueueError, QueueStatus, QueuedJob};

type ActiveJobs = Arc<RwLock<HashMap<i64, CancellationToken>>>;

/// Owns the job FIFO and the worker pool.
pub struct QueueManager {
    config: QueueConfig,
    store: Arc<dyn JobStore>,
    hub: Arc<BroadcastHub>,
    stages: StageSet,

    sender: mpsc::UnboundedSender<QueuedJob>,
    receiver: Arc<AsyncMutex<mpsc::UnboundedReceiver<QueuedJob>>>,
    queued: Arc<AtomicUsize>,

    // Runtime state
    running: AtomicBool,
    shutdown: Mutex<CancellationToken>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    active: ActiveJobs,
}

impl QueueManager {
    /// Create a stopped queue manager.
    pub fn new(
        config: QueueConfig,
        store: Arc<dyn JobStore>,
        hub: Arc<BroadcastHub>,
        stages: StageSet,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();

        Self {
            config,
            store,
            hub,
            stages,
            sender,
            receiver: Arc::new(AsyncMutex::new(receiver)),
            queued: Arc::new(AtomicUsize::new(0)),
            running: AtomicBool::new(false),
            shutdown: Mutex::new(CancellationToken::new()),
            workers: Mutex::new(Vec::new()),
            active: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Spawn `worker_count` workers. Must be called from within a tokio runtime.
    pub fn start(&self, worker_count: usize) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Queue manager already running");
            return;
        }

        let worker_count = worker_count.max(1);
        let shutdown = CancellationToken::new();
        *lock(&self.shutdown) = shutdown.clone();

        let mut workers = lock(&self.workers);
        for worker_id in 0..worker_count {
            let worker = Worker {
                id: worker_id,
                config: self.config.clone(),
                store: Arc::clone(&self.store),
                hub: Arc::clone(&self.hub),
                stages: self.stages.clone(),
                receiver: Arc::clone(&self.receiver),
                queued: Arc::clone(&self.queued),
                active: Arc::clone(&self.active),
            };
            workers.push(tokio::spawn(worker.run(shutdown.clone())));
        }

        info!(workers = worker_count, "Queue manager started");
    }

    /// Append a job to the FIFO. Never blocks.
    pub fn enqueue(&self, job_id: i64, source_url: impl Into<String>) {
        let job = QueuedJob {
            job_id,
            source_url: source_url.into(),
        };

        // Count first; a worker may take the job before send returns.
        let depth = self.queued.fetch_add(1, Ordering::SeqCst) + 1;
        if self.sender.send(job).is_err() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            error!(job_id, "Job channel closed, job not queued");
            return;
        }
        QUEUE_DEPTH.set(depth as i64);

        info!(job_id, depth, "Job enqueued");
    }

    /// Signal the execution running `job_id`, if any worker holds it.
    pub fn cancel(&self, job_id: i64) -> bool {
        let active = self.active.read().unwrap_or_else(PoisonError::into_inner);
        match active.get(&job_id) {
            Some(token) => {
                token.cancel();
                info!(job_id, "Signalled running job to cancel");
                true
            }
            None => {
                debug!(job_id, "Job is not running in any worker");
                false
            }
        }
    }

    /// Stop the pool and wait for every worker to exit.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Queue manager not running");
            return;
        }

        info!("Stopping queue manager");
        lock(&self.shutdown).cancel();

        let workers = std::mem::take(&mut *lock(&self.workers));
        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                error!(error = %e, "Worker task failed");
            }
        }

        self.active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        info!("Queue manager stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get current queue status.
    pub fn status(&self) -> QueueStatus {
        let mut active_jobs: Vec<i64> = self
            .active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        active_jobs.sort_unstable();

        QueueStatus {
            running: self.is_running(),
            workers: lock(&self.workers).len(),
            queued: self.queued.load(Ordering::SeqCst),
            active_jobs,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registers a job's token in the active map for as long as it lives.
struct ActiveJobGuard {
    active: ActiveJobs,
    job_id: i64,
}

impl ActiveJobGuard {
    fn register(active: &ActiveJobs, job_id: i64, token: CancellationToken) -> Self {
        active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id, token);
        JOBS_ACTIVE.inc();

        Self {
            active: Arc::clone(active),
            job_id,
        }
    }
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        self.active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.job_id);
        JOBS_ACTIVE.dec();
    }
}

/// One worker of the pool.
struct Worker {
    id: usize,
    config: QueueConfig,
    store: Arc<dyn JobStore>,
    hub: Arc<BroadcastHub>,
    stages: StageSet,
    receiver: Arc<AsyncMutex<mpsc::UnboundedReceiver<QueuedJob>>>,
    queued: Arc<AtomicUsize>,
    active: ActiveJobs,
}

impl Worker {
    async fn run(self, shutdown: CancellationToken) {
        debug!(worker_id = self.id, "Worker started");
        let backoff = Duration::from_millis(self.config.error_backoff_ms);

        while !shutdown.is_cancelled() {
            let result = match self.next_job(&shutdown).await {
                Ok(Some(job)) => self.process(job, &shutdown).await,
                Ok(None) => Ok(()),
                Err(e) => Err(e),
            };

            if let Err(e) = result {
                error!(worker_id = self.id, error = %e, "Worker loop error");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }

        debug!(worker_id = self.id, "Worker stopped");
    }

    /// Wait for the next job, bounded by the dequeue timeout and shutdown.
    async fn next_job(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<Option<QueuedJob>, QueueError> {
        let timeout = Duration::from_millis(self.config.dequeue_timeout_ms);

        let mut receiver = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(None),
            receiver = self.receiver.lock() => receiver,
        };

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => Ok(None),
            received = tokio::time::timeout(timeout, receiver.recv()) => match received {
                Ok(Some(job)) => {
                    let depth = self.queued.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
                    QUEUE_DEPTH.set(depth as i64);
                    Ok(Some(job))
                }
                Ok(None) => Err(QueueError::ChannelClosed),
                Err(_) => Ok(None),
            },
        }
    }

    async fn process(
        &self,
        queued: QueuedJob,
        shutdown: &CancellationToken,
    ) -> Result<(), QueueError> {
        let Some(job) = self.store.get(queued.job_id)? else {
            warn!(worker_id = self.id, job_id = queued.job_id, "Queued job no longer exists");
            return Ok(());
        };
        if job.status.is_terminal() {
            info!(
                worker_id = self.id,
                job_id = job.id,
                status = %job.status,
                "Skipping job already in terminal status"
            );
            return Ok(());
        }

        // Stopped after the job was taken; leave it PENDING for recovery.
        if shutdown.is_cancelled() {
            info!(
                worker_id = self.id,
                job_id = job.id,
                "Pool stopping, leaving job pending"
            );
            return Ok(());
        }

        let token = shutdown.child_token();
        let _guard = ActiveJobGuard::register(&self.active, job.id, token.clone());

        info!(
            worker_id = self.id,
            job_id = job.id,
            source_url = %queued.source_url,
            "Worker picked up job"
        );

        let runner = PipelineRunner::new(
            &job,
            Arc::clone(&self.store),
            Arc::clone(&self.hub),
            self.stages.clone(),
            token,
        )
        .with_shutdown(shutdown.clone());
        match tokio::spawn(runner.run()).await {
            Ok(outcome) => {
                debug!(
                    worker_id = self.id,
                    job_id = job.id,
                    outcome = outcome.label(),
                    "Worker finished job"
                );
            }
            Err(e) => {
                error!(
                    worker_id = self.id,
                    job_id = job.id,
                    error = %e,
                    "Pipeline task panicked"
                );
            }
        }

        Ok(())
    }
}
