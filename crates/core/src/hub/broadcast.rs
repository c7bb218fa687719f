//! Broadcast hub implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::debug;

use super::types::{LogEvent, ObserverId, StatusEvent, Subscription};
use crate::job::{Job, LogEntry};
use crate::metrics::HUB_OBSERVERS;

type Observers<T> = HashMap<ObserverId, mpsc::UnboundedSender<T>>;

/// Fans status and log events out to connected observers.
///
/// Observer collections are guarded by plain mutexes. Sends are unbounded
/// and never block, so no lock is held across an await point.
#[derive(Debug, Default)]
pub struct BroadcastHub {
    next_id: AtomicU64,
    /// Serializes status writes with their broadcast.
    status_order: Mutex<()>,
    status_observers: Mutex<Observers<StatusEvent>>,
    log_observers: Mutex<HashMap<i64, Observers<LogEvent>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_observer_id(&self) -> ObserverId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    // =========================================================================
    // Status channel
    // =========================================================================

    /// Register a status observer.
    pub fn connect_status(&self) -> Subscription<StatusEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_observer_id();

        let mut observers = lock(&self.status_observers);
        observers.insert(id, tx);
        HUB_OBSERVERS
            .with_label_values(&["status"])
            .set(observers.len() as i64);
        debug!(observer_id = id, total = observers.len(), "Status observer connected");

        Subscription { id, events: rx }
    }

    /// Remove a status observer. Returns false if it was already gone.
    pub fn disconnect_status(&self, id: ObserverId) -> bool {
        let mut observers = lock(&self.status_observers);
        let removed = observers.remove(&id).is_some();
        HUB_OBSERVERS
            .with_label_values(&["status"])
            .set(observers.len() as i64);
        if removed {
            debug!(observer_id = id, total = observers.len(), "Status observer disconnected");
        }
        removed
    }

    /// Send an event to every status observer.
    ///
    /// Observers whose receiver has been dropped are removed once the pass
    /// is over. Returns the number of observers that received the event.
    pub fn broadcast_status(&self, event: StatusEvent) -> usize {
        let snapshot: Vec<(ObserverId, mpsc::UnboundedSender<StatusEvent>)> =
            lock(&self.status_observers)
                .iter()
                .map(|(id, tx)| (*id, tx.clone()))
                .collect();

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, tx) in snapshot {
            if tx.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(id);
            }
        }

        if !dead.is_empty() {
            let mut observers = lock(&self.status_observers);
            for id in &dead {
                observers.remove(id);
            }
            HUB_OBSERVERS
                .with_label_values(&["status"])
                .set(observers.len() as i64);
            debug!(removed = dead.len(), "Dropped disconnected status observers");
        }

        delivered
    }

    /// Persist a status change and broadcast it as one step.
    ///
    /// Every status write that goes through here is announced before the
    /// next one is made, so observers see a job's statuses in the order
    /// they were stored.
    pub fn publish_status<E>(
        &self,
        write: impl FnOnce() -> Result<Job, E>,
    ) -> Result<Job, E> {
        let _order = lock(&self.status_order);
        let job = write()?;
        self.broadcast_status(StatusEvent::from_job(&job));
        Ok(job)
    }

    pub fn status_observer_count(&self) -> usize {
        lock(&self.status_observers).len()
    }

    // =========================================================================
    // Log channel
    // =========================================================================

    /// Register a log observer for a job, replaying its history first.
    ///
    /// `history` runs while the log channel is locked, and
    /// [`publish_log`](Self::publish_log) appends under the same lock, so
    /// every entry reaches the new observer exactly once: either in the
    /// replay or live.
    pub fn connect_logs<E>(
        &self,
        job_id: i64,
        history: impl FnOnce() -> Result<Vec<LogEntry>, E>,
    ) -> Result<Subscription<LogEvent>, E> {
        let mut channels = lock(&self.log_observers);
        let entries = history()?;

        let (tx, rx) = mpsc::unbounded_channel();
        for entry in &entries {
            // The receiver is still in hand, so this cannot fail.
            let _ = tx.send(LogEvent::from(entry));
        }

        let id = self.next_observer_id();
        channels.entry(job_id).or_default().insert(id, tx);
        HUB_OBSERVERS
            .with_label_values(&["logs"])
            .set(channels.values().map(HashMap::len).sum::<usize>() as i64);
        debug!(
            job_id,
            observer_id = id,
            replayed = entries.len(),
            "Log observer connected"
        );

        Ok(Subscription { id, events: rx })
    }

    /// Remove one log observer. Returns false if it was already gone.
    pub fn disconnect_logs(&self, job_id: i64, id: ObserverId) -> bool {
        let mut channels = lock(&self.log_observers);
        let removed = match channels.get_mut(&job_id) {
            Some(observers) => {
                let removed = observers.remove(&id).is_some();
                if observers.is_empty() {
                    channels.remove(&job_id);
                }
                removed
            }
            None => false,
        };
        HUB_OBSERVERS
            .with_label_values(&["logs"])
            .set(channels.values().map(HashMap::len).sum::<usize>() as i64);
        removed
    }

    /// Persist a log entry and deliver it to the job's observers atomically
    /// with respect to [`connect_logs`](Self::connect_logs).
    pub fn publish_log<E>(
        &self,
        job_id: i64,
        append: impl FnOnce() -> Result<LogEntry, E>,
    ) -> Result<LogEntry, E> {
        let mut channels = lock(&self.log_observers);
        let entry = append()?;
        Self::fan_out_logs(&mut channels, job_id, LogEvent::from(&entry));
        Ok(entry)
    }

    /// Deliver a log event to the job's current observers.
    ///
    /// Returns the number of observers that received it.
    pub fn send_log(&self, job_id: i64, event: LogEvent) -> usize {
        let mut channels = lock(&self.log_observers);
        Self::fan_out_logs(&mut channels, job_id, event)
    }

    pub fn log_observer_count(&self, job_id: i64) -> usize {
        lock(&self.log_observers)
            .get(&job_id)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    /// Number of jobs that currently have at least one log observer.
    pub fn watched_job_count(&self) -> usize {
        lock(&self.log_observers).len()
    }

    fn fan_out_logs(
        channels: &mut HashMap<i64, Observers<LogEvent>>,
        job_id: i64,
        event: LogEvent,
    ) -> usize {
        let Some(observers) = channels.get_mut(&job_id) else {
            return 0;
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, tx) in observers.iter() {
            if tx.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                dead.push(*id);
            }
        }

        if !dead.is_empty() {
            for id in &dead {
                observers.remove(id);
            }
            if observers.is_empty() {
                channels.remove(&job_id);
            }
            HUB_OBSERVERS
                .with_label_values(&["logs"])
                .set(channels.values().map(HashMap::len).sum::<usize>() as i64);
            debug!(job_id, removed = dead.len(), "Dropped disconnected log observers");
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{
        CreateJobRequest, JobError, JobStatus, JobStore, JobUpdate, LogLevel, SqliteJobStore,
    };
    use chrono::Utc;
    use std::convert::Infallible;
    use std::sync::Arc;
    use uuid::Uuid;

    fn status_event(status: JobStatus, progress: u8) -> StatusEvent {
        StatusEvent {
            job_uuid: Uuid::new_v4(),
            status,
            progress,
            stage: status.stage_label().to_string(),
            timestamp: Utc::now(),
            error: None,
        }
    }

    fn log_entry(id: i64, job_id: i64, message: &str) -> LogEntry {
        LogEntry {
            id,
            job_id,
            timestamp: Utc::now(),
            level: LogLevel::Info,
            stage: Some("downloading".to_string()),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_broadcast_to_all_status_observers() {
        let hub = BroadcastHub::new();
        let mut a = hub.connect_status();
        let mut b = hub.connect_status();

        let event = status_event(JobStatus::Downloading, 10);
        assert_eq!(hub.broadcast_status(event.clone()), 2);

        assert_eq!(a.events.try_recv().unwrap(), event);
        assert_eq!(b.events.try_recv().unwrap(), event);
    }

    #[test]
    fn test_broadcast_removes_failed_observer_and_delivers_rest() {
        let hub = BroadcastHub::new();
        let mut subs: Vec<_> = (0..5).map(|_| hub.connect_status()).collect();

        let dropped = subs.remove(2);
        drop(dropped);

        let event = status_event(JobStatus::Transcribing, 25);
        assert_eq!(hub.broadcast_status(event.clone()), 4);
        assert_eq!(hub.status_observer_count(), 4);

        for sub in &mut subs {
            assert_eq!(sub.events.try_recv().unwrap(), event);
        }
    }

    fn stored_job(store: &SqliteJobStore) -> Job {
        store
            .create(CreateJobRequest {
                source_url: "https://example.com/watch?v=AAAAAAAAAAA".to_string(),
                video_id: Some("AAAAAAAAAAA".to_string()),
            })
            .unwrap()
    }

    #[test]
    fn test_publish_status_broadcasts_written_job() {
        let store = SqliteJobStore::in_memory().unwrap();
        let job = stored_job(&store);
        let hub = BroadcastHub::new();
        let mut sub = hub.connect_status();

        let written = hub
            .publish_status(|| {
                store.update_status(
                    job.id,
                    JobUpdate::status(JobStatus::Downloading).with_progress(10),
                )
            })
            .unwrap();
        assert_eq!(written.status, JobStatus::Downloading);

        let event = sub.events.try_recv().unwrap();
        assert_eq!(event.job_uuid, job.uuid);
        assert_eq!(event.status, JobStatus::Downloading);
        assert_eq!(event.progress, 10);
    }

    #[test]
    fn test_publish_status_error_sends_nothing() {
        let store = SqliteJobStore::in_memory().unwrap();
        let job = stored_job(&store);
        store.cancel(job.id).unwrap();
        let hub = BroadcastHub::new();
        let mut sub = hub.connect_status();

        let result = hub.publish_status(|| {
            store.update_status(job.id, JobUpdate::status(JobStatus::Downloading))
        });
        assert!(matches!(result, Err(JobError::InvalidTransition { .. })));
        assert!(sub.events.try_recv().is_err());
    }

    #[test]
    fn test_status_written_first_is_announced_first() {
        let store = Arc::new(SqliteJobStore::in_memory().unwrap());
        let job = stored_job(&store);
        let hub = Arc::new(BroadcastHub::new());
        let mut sub = hub.connect_status();
        let (written_tx, written_rx) = std::sync::mpsc::channel();

        let first = {
            let (store, hub) = (Arc::clone(&store), Arc::clone(&hub));
            std::thread::spawn(move || {
                hub.publish_status(|| {
                    let job = store.update_status(
                        job.id,
                        JobUpdate::status(JobStatus::Downloading).with_progress(10),
                    )?;
                    written_tx.send(()).unwrap();
                    std::thread::sleep(std::time::Duration::from_millis(100));
                    Ok::<_, JobError>(job)
                })
            })
        };

        // Cancel lands after the first write but before its broadcast.
        written_rx.recv().unwrap();
        let cancelled = hub.publish_status(|| store.cancel(job.id)).unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        first.join().unwrap().unwrap();

        let statuses: Vec<_> = std::iter::from_fn(|| sub.events.try_recv().ok())
            .map(|event| event.status)
            .collect();
        assert_eq!(statuses, vec![JobStatus::Downloading, JobStatus::Cancelled]);
    }

    #[test]
    fn test_disconnect_status() {
        let hub = BroadcastHub::new();
        let sub = hub.connect_status();
        assert!(hub.disconnect_status(sub.id));
        assert!(!hub.disconnect_status(sub.id));
        assert_eq!(hub.broadcast_status(status_event(JobStatus::Failed, 0)), 0);
    }

    #[test]
    fn test_observer_ids_are_unique() {
        let hub = BroadcastHub::new();
        let a = hub.connect_status();
        let b = hub.connect_status();
        let c = hub
            .connect_logs(1, || Ok::<_, Infallible>(vec![]))
            .unwrap();
        assert_ne!(a.id, b.id);
        assert_ne!(b.id, c.id);
    }

    #[test]
    fn test_connect_logs_replays_history_then_live() {
        let hub = BroadcastHub::new();
        let history = vec![log_entry(1, 7, "first"), log_entry(2, 7, "second")];

        let mut sub = hub
            .connect_logs(7, || Ok::<_, Infallible>(history.clone()))
            .unwrap();
        hub.publish_log(7, || Ok::<_, Infallible>(log_entry(3, 7, "third")))
            .unwrap();

        let messages: Vec<_> = std::iter::from_fn(|| sub.events.try_recv().ok())
            .map(|e| e.message)
            .collect();
        assert_eq!(messages, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_connect_logs_history_error_registers_nothing() {
        let hub = BroadcastHub::new();
        let result = hub.connect_logs(3, || Err::<Vec<LogEntry>, _>("store down"));
        assert_eq!(result.unwrap_err(), "store down");
        assert_eq!(hub.log_observer_count(3), 0);
        assert_eq!(hub.watched_job_count(), 0);
    }

    #[test]
    fn test_send_log_only_reaches_that_job() {
        let hub = BroadcastHub::new();
        let mut job1 = hub.connect_logs(1, || Ok::<_, Infallible>(vec![])).unwrap();
        let mut job2 = hub.connect_logs(2, || Ok::<_, Infallible>(vec![])).unwrap();

        let delivered = hub.send_log(1, LogEvent::from(&log_entry(1, 1, "for job 1")));
        assert_eq!(delivered, 1);
        assert_eq!(job1.events.try_recv().unwrap().message, "for job 1");
        assert!(job2.events.try_recv().is_err());

        assert_eq!(hub.send_log(99, LogEvent::from(&log_entry(2, 99, "nobody"))), 0);
    }

    #[test]
    fn test_empty_log_channels_are_collected() {
        let hub = BroadcastHub::new();
        let a = hub.connect_logs(5, || Ok::<_, Infallible>(vec![])).unwrap();
        let b = hub.connect_logs(5, || Ok::<_, Infallible>(vec![])).unwrap();
        assert_eq!(hub.log_observer_count(5), 2);

        assert!(hub.disconnect_logs(5, a.id));
        assert_eq!(hub.watched_job_count(), 1);

        drop(b);
        hub.send_log(5, LogEvent::from(&log_entry(1, 5, "gone")));
        assert_eq!(hub.log_observer_count(5), 0);
        assert_eq!(hub.watched_job_count(), 0);
    }

    #[test]
    fn test_publish_log_error_sends_nothing() {
        let hub = BroadcastHub::new();
        let mut sub = hub.connect_logs(4, || Ok::<_, Infallible>(vec![])).unwrap();
        let result = hub.publish_log(4, || Err::<LogEntry, _>("write failed"));
        assert!(result.is_err());
        assert!(sub.events.try_recv().is_err());
    }

    #[test]
    fn test_concurrent_connect_and_broadcast() {
        let hub = Arc::new(BroadcastHub::new());
        let mut kept = Vec::new();
        for _ in 0..10 {
            kept.push(hub.connect_status());
        }

        let broadcaster = {
            let hub = Arc::clone(&hub);
            std::thread::spawn(move || {
                for i in 0..100u8 {
                    hub.broadcast_status(status_event(JobStatus::Downloading, i));
                }
            })
        };
        let churner = {
            let hub = Arc::clone(&hub);
            std::thread::spawn(move || {
                for _ in 0..100 {
                    let sub = hub.connect_status();
                    hub.disconnect_status(sub.id);
                }
            })
        };
        broadcaster.join().unwrap();
        churner.join().unwrap();

        for sub in &mut kept {
            let received = std::iter::from_fn(|| sub.events.try_recv().ok()).count();
            assert_eq!(received, 100);
        }
        assert_eq!(hub.status_observer_count(), 10);
    }
}
