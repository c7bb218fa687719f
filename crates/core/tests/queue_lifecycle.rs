//! Queue lifecycle integration tests.
//!
//! These tests verify the worker pool with mock stages:
//! - Concurrency bound under load
//! - Graceful shutdown of in-flight jobs
//! - Restart after stop and startup recovery
//! - Log replay followed by live entries

use std::sync::Arc;
use std::time::Duration;

use distillery_core::{
    hub::BroadcastHub,
    job::{JobFilter, JobStatus, JobStore, JobUpdate, LogLevel, SqliteJobStore},
    queue::{QueueConfig, QueueManager},
    service::JobService,
    stage::StageSet,
    testing::{sample_url, wait_until, MockStages, StageGate},
};

struct TestPool {
    service: JobService,
    queue: Arc<QueueManager>,
    store: Arc<dyn JobStore>,
    hub: Arc<BroadcastHub>,
    stages: Arc<MockStages>,
}

impl TestPool {
    fn new(stages: MockStages) -> Self {
        let store: Arc<dyn JobStore> =
            Arc::new(SqliteJobStore::in_memory().expect("Failed to create job store"));
        Self::with_store(store, stages)
    }

    fn with_store(store: Arc<dyn JobStore>, stages: MockStages) -> Self {
        let hub = Arc::new(BroadcastHub::new());
        let stages = Arc::new(stages);
        let queue = Arc::new(QueueManager::new(
            QueueConfig {
                dequeue_timeout_ms: 25,
                error_backoff_ms: 25,
                ..Default::default()
            },
            Arc::clone(&store),
            Arc::clone(&hub),
            StageSet::from_shared(Arc::clone(&stages)),
        ));
        let service = JobService::new(Arc::clone(&store), Arc::clone(&hub), Arc::clone(&queue));

        Self {
            service,
            queue,
            store,
            hub,
            stages,
        }
    }

    fn status_of(&self, job_id: i64) -> JobStatus {
        self.store.get(job_id).unwrap().unwrap().status
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_bounds_concurrent_jobs() {
    let pool = TestPool::new(MockStages::new().with_delay(Duration::from_millis(10)));
    pool.queue.start(2);

    let jobs: Vec<i64> = (0..6)
        .map(|n| pool.service.submit(&sample_url(n)).unwrap().id)
        .collect();

    let mut max_active = 0;
    let all_done = wait_until(Duration::from_secs(20), || {
        let active = pool
            .store
            .list(&JobFilter::new())
            .unwrap()
            .iter()
            .filter(|job| job.status.is_active())
            .count();
        max_active = max_active.max(active);
        jobs.iter().all(|id| pool.status_of(*id).is_terminal())
    })
    .await;

    assert!(all_done);
    assert!(max_active <= 2, "saw {} active jobs", max_active);
    assert!(pool.stages.max_in_flight() <= 2);
    assert!(pool.stages.max_in_flight() >= 1);
    for id in &jobs {
        assert_eq!(pool.status_of(*id), JobStatus::Completed);
    }

    pool.queue.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_interrupts_running_jobs_and_keeps_queued_ones() {
    let gate = StageGate::new();
    let pool = TestPool::new(MockStages::new().with_gate(Arc::clone(&gate)));
    let mut status = pool.service.subscribe_status();
    pool.queue.start(2);

    let first = pool.service.submit(&sample_url(1)).unwrap();
    let second = pool.service.submit(&sample_url(2)).unwrap();
    let third = pool.service.submit(&sample_url(3)).unwrap();
    assert!(wait_until(Duration::from_secs(5), || gate.waiting() == 2).await);
    assert_eq!(pool.queue.status().active_jobs.len(), 2);

    tokio::time::timeout(Duration::from_secs(10), pool.queue.stop())
        .await
        .expect("stop did not finish");

    for job in [&first, &second] {
        let stored = pool.store.get(job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Cancelled);
        assert!(stored.cancelled);
        let logs = pool.store.logs(job.id, 0, 100).unwrap();
        assert_eq!(logs.last().unwrap().message, "Job interrupted by shutdown");
    }
    assert_eq!(pool.status_of(third.id), JobStatus::Pending);

    let queue_status = pool.queue.status();
    assert!(!queue_status.running);
    assert!(queue_status.active_jobs.is_empty());
    assert_eq!(queue_status.queued, 1);

    let mut cancelled = 0;
    while let Ok(event) = status.events.try_recv() {
        if event.status == JobStatus::Cancelled {
            cancelled += 1;
        }
    }
    assert_eq!(cancelled, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restart_after_stop_drains_queue() {
    let pool = TestPool::new(MockStages::new());
    pool.queue.start(1);
    pool.queue.stop().await;

    let job = pool.service.submit(&sample_url(1)).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pool.status_of(job.id), JobStatus::Pending);

    pool.queue.start(1);
    assert!(
        wait_until(Duration::from_secs(5), || pool.status_of(job.id)
            == JobStatus::Completed)
        .await
    );
    pool.queue.stop().await;
}

#[tokio::test]
async fn test_queue_cancel_signals_only_active_job() {
    let gate = StageGate::new();
    let pool = TestPool::new(MockStages::new().with_gate(Arc::clone(&gate)));
    pool.queue.start(1);

    let running = pool.service.submit(&sample_url(1)).unwrap();
    let waiting = pool.service.submit(&sample_url(2)).unwrap();
    assert!(wait_until(Duration::from_secs(5), || gate.waiting() == 1).await);

    assert!(!pool.queue.cancel(waiting.id));
    assert!(pool.queue.cancel(running.id));

    gate.open();
    assert!(
        wait_until(Duration::from_secs(5), || pool.status_of(waiting.id)
            == JobStatus::Completed)
        .await
    );
    assert_eq!(pool.status_of(running.id), JobStatus::Cancelled);

    // A queue cancel is not a shutdown.
    let messages: Vec<String> = pool
        .store
        .logs(running.id, 0, 100)
        .unwrap()
        .into_iter()
        .map(|entry| entry.message)
        .collect();
    assert_eq!(messages.last().map(String::as_str), Some("Job cancelled by user"));
    assert!(!messages.iter().any(|m| m == "Job interrupted by shutdown"));

    pool.queue.stop().await;
}

#[tokio::test]
async fn test_recovery_requeues_pending_and_fails_interrupted() {
    let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::in_memory().unwrap());

    // State left behind by a previous process.
    let previous = TestPool::with_store(Arc::clone(&store), MockStages::new());
    let pending = previous.service.submit(&sample_url(1)).unwrap();
    let interrupted = previous.service.submit(&sample_url(2)).unwrap();
    for (status, progress) in [(JobStatus::Downloading, 10), (JobStatus::Transcribing, 25)] {
        store
            .update_status(
                interrupted.id,
                JobUpdate::status(status).with_progress(progress),
            )
            .unwrap();
    }
    drop(previous);

    let pool = TestPool::with_store(Arc::clone(&store), MockStages::new());
    let report = tokio_test::assert_ok!(pool.service.recover_on_startup(true));
    assert_eq!(report.requeued, 1);
    assert_eq!(report.failed, 1);

    pool.queue.start(1);
    assert!(
        wait_until(Duration::from_secs(5), || pool.status_of(pending.id)
            == JobStatus::Completed)
        .await
    );

    let failed = store.get(interrupted.id).unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.progress, 25);
    assert_eq!(
        failed.error_message.as_deref(),
        Some("Interrupted by service restart")
    );
    assert!(pool.stages.calls_for(interrupted.id).is_empty());

    pool.queue.stop().await;
}

#[tokio::test]
async fn test_log_replay_then_live() {
    let pool = TestPool::new(MockStages::new());
    let job = pool.service.submit(&sample_url(1)).unwrap();

    pool.hub
        .publish_log(job.id, || {
            pool.store
                .append_log(job.id, LogLevel::Info, Some("downloading"), "A")
        })
        .unwrap();

    let (_, mut subscription) = pool.service.subscribe_logs(&job.uuid).unwrap();

    pool.hub
        .publish_log(job.id, || {
            pool.store
                .append_log(job.id, LogLevel::Info, Some("downloading"), "B")
        })
        .unwrap();

    let first = subscription.events.recv().await.unwrap();
    let second = subscription.events.recv().await.unwrap();
    assert_eq!(first.message, "A");
    assert_eq!(second.message, "B");
    assert!(subscription.events.try_recv().is_err());
}
