//! Lock-free asynchronous job queue.
//!
//! Producers call [`JobQueue::enqueue`] with a job type and a JSON payload;
//! the job is pushed onto a [`crossbeam::queue::SegQueue`] and a background
//! tokio worker hands it to the [`JobHandler`] registered for that type.
//!
//! Enqueueing never waits for the job to run.  Every dequeued job executes on
//! its own tokio task, so a slow job never holds up the jobs behind it and
//! there is no global execution lock.
//!
//! # Job lifecycle
//!
//! ```text
//! Queued  -->  Running  -->  Completed
//!                       \->  Failed
//! ```
//!
//! Jobs whose type has no registered handler go straight to `Failed`.
//!
//! Finished jobs stay queryable until more than the retention limit
//! ([`DEFAULT_FINISHED_RETENTION`] unless configured) have finished; the
//! oldest are then evicted.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{KernelError, Result};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Finished jobs kept for [`JobQueue::status`] by default.
pub const DEFAULT_FINISHED_RETENTION: usize = 256;

/// Unique, time-ordered job identifier (UUID v7).
pub type JobId = Uuid;

/// Lifecycle state of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for the worker to pick it up.
    Queued,
    /// Handed to its handler.
    Running,
    /// The handler returned `Ok`.
    Completed,
    /// The handler returned an error, or no handler was registered.
    Failed,
}

/// Metadata snapshot of a job visible to external callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: JobId,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Consumer of one job type.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Process one job.  An `Err` marks the job failed with that message.
    async fn handle(&self, job_id: JobId, payload: serde_json::Value)
    -> std::result::Result<(), String>;
}

/// Internal representation of a job that lives on the queue.
struct QueuedJob {
    id: JobId,
    job_type: String,
    payload: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Lock-free job queue with per-type handlers.
///
/// The queue is cheaply cloneable (`Arc`-backed) and safe to share across
/// threads and async tasks.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    pending: SegQueue<QueuedJob>,

    /// Authoritative job metadata.
    jobs: DashMap<JobId, JobInfo>,

    handlers: DashMap<String, Arc<dyn JobHandler>>,

    /// Wakes the background worker when new work arrives.
    notify: Notify,

    /// When `true` the queue will not accept new work.
    shutdown: AtomicBool,

    started: AtomicBool,

    /// Upper bound on `Completed` + `Failed` entries in `jobs`.
    finished_retention: usize,
}

impl JobQueue {
    /// Create a new queue **without** starting the background worker.
    ///
    /// Jobs enqueued before [`JobQueue::start`] stay `Queued` until the
    /// worker runs.
    #[must_use]
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_FINISHED_RETENTION)
    }

    /// Like [`JobQueue::new`], keeping at most `finished_retention` finished
    /// jobs.
    #[must_use]
    pub fn with_retention(finished_retention: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                pending: SegQueue::new(),
                jobs: DashMap::new(),
                handlers: DashMap::new(),
                notify: Notify::new(),
                shutdown: AtomicBool::new(false),
                started: AtomicBool::new(false),
                finished_retention,
            }),
        }
    }

    /// Register the handler for `job_type`, replacing any previous one.
    pub fn register_handler(&self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        let job_type = job_type.into();
        tracing::info!(job_type = %job_type, "job handler registered");
        self.inner.handlers.insert(job_type, handler);
    }

    /// Enqueue a job and return its id immediately.
    pub fn enqueue(&self, job_type: &str, payload: serde_json::Value) -> Result<JobId> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(KernelError::QueueShutdown);
        }

        let id = Uuid::now_v7();
        self.inner.jobs.insert(
            id,
            JobInfo {
                id,
                job_type: job_type.to_string(),
                payload: payload.clone(),
                status: JobStatus::Queued,
                enqueued_at: Utc::now(),
                started_at: None,
                completed_at: None,
                error: None,
            },
        );
        self.inner.pending.push(QueuedJob {
            id,
            job_type: job_type.to_string(),
            payload,
        });
        self.inner.notify.notify_one();

        tracing::debug!(job_id = %id, job_type = %job_type, "job enqueued");
        Ok(id)
    }

    /// Query the current status of a job.
    pub fn status(&self, job_id: JobId) -> Result<JobInfo> {
        self.inner
            .jobs
            .get(&job_id)
            .map(|entry| entry.clone())
            .ok_or(KernelError::JobNotFound { job_id })
    }

    /// Return a snapshot of all known jobs keyed by their id.
    pub fn all_jobs(&self) -> HashMap<JobId, JobInfo> {
        self.inner
            .jobs
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Snapshot of the jobs of one type, oldest first.
    pub fn jobs_of_type(&self, job_type: &str) -> Vec<JobInfo> {
        let mut jobs: Vec<JobInfo> = self
            .inner
            .jobs
            .iter()
            .filter(|e| e.value().job_type == job_type)
            .map(|e| e.value().clone())
            .collect();
        jobs.sort_by_key(|j| j.id);
        jobs
    }

    /// Number of jobs still waiting for the worker.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Spawn the background worker that drains the queue.
    ///
    /// Returns a [`JoinHandle`] that resolves once [`JobQueue::shutdown`] has
    /// been called and the pending queue is empty.
    pub fn start(&self) -> Result<JoinHandle<()>> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(KernelError::WorkerAlreadyStarted);
        }
        let inner = Arc::clone(&self.inner);
        Ok(tokio::spawn(async move {
            tracing::info!("job queue worker started");
            Self::worker_loop(inner).await;
            tracing::info!("job queue worker stopped");
        }))
    }

    /// Stop accepting new work.  The worker exits once the queue drains;
    /// jobs already running finish on their own tasks.
    pub fn shutdown(&self) {
        tracing::info!("job queue shutdown requested");
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.notify.notify_one();
    }

    // -- Private helpers ----------------------------------------------------

    async fn worker_loop(inner: Arc<QueueInner>) {
        loop {
            match inner.pending.pop() {
                Some(job) => Self::dispatch(&inner, job),
                None => {
                    if inner.shutdown.load(Ordering::Acquire) {
                        break;
                    }
                    // Park until notified of new work or shutdown.
                    inner.notify.notified().await;
                }
            }
        }
    }

    fn dispatch(inner: &Arc<QueueInner>, job: QueuedJob) {
        let handler = inner
            .handlers
            .get(&job.job_type)
            .map(|h| Arc::clone(h.value()));

        let Some(handler) = handler else {
            tracing::error!(job_id = %job.id, job_type = %job.job_type, "no handler registered for job type");
            Self::finish(
                inner,
                job.id,
                Err(format!("no handler registered for job type `{}`", job.job_type)),
            );
            return;
        };

        if let Some(mut entry) = inner.jobs.get_mut(&job.id) {
            entry.status = JobStatus::Running;
            entry.started_at = Some(Utc::now());
        }
        tracing::debug!(job_id = %job.id, job_type = %job.job_type, "job running");

        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            let result = handler.handle(job.id, job.payload).await;
            Self::finish(&inner, job.id, result);
        });
    }

    fn finish(inner: &QueueInner, job_id: JobId, result: std::result::Result<(), String>) {
        // the entry guard must be released before pruning iterates the map
        if let Some(mut entry) = inner.jobs.get_mut(&job_id) {
            entry.completed_at = Some(Utc::now());
            match result {
                Ok(()) => {
                    entry.status = JobStatus::Completed;
                    tracing::debug!(job_id = %job_id, "job completed");
                }
                Err(err) => {
                    tracing::warn!(job_id = %job_id, error = %err, "job failed");
                    entry.status = JobStatus::Failed;
                    entry.error = Some(err);
                }
            }
        }
        Self::prune_finished(inner);
    }

    /// Evict the oldest finished jobs beyond the retention limit.
    fn prune_finished(inner: &QueueInner) {
        let mut finished: Vec<(Option<DateTime<Utc>>, JobId)> = inner
            .jobs
            .iter()
            .filter(|e| matches!(e.value().status, JobStatus::Completed | JobStatus::Failed))
            .map(|e| (e.value().completed_at, *e.key()))
            .collect();
        if finished.len() <= inner.finished_retention {
            return;
        }
        finished.sort_unstable();
        let excess = finished.len() - inner.finished_retention;
        for (_, id) in finished.into_iter().take(excess) {
            inner.jobs.remove(&id);
        }
        tracing::debug!(evicted = excess, "finished jobs pruned");
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use super::*;

    struct CountingHandler {
        count: Arc<AtomicU32>,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn handle(
            &self,
            _job_id: JobId,
            payload: serde_json::Value,
        ) -> std::result::Result<(), String> {
            if payload["fail"].as_bool().unwrap_or(false) {
                return Err("asked to fail".into());
            }
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn enqueue_without_worker_stays_queued() {
        let queue = JobQueue::new();
        let id = queue.enqueue("noop", serde_json::json!({"a": 1})).unwrap();

        let info = queue.status(id).unwrap();
        assert_eq!(info.status, JobStatus::Queued);
        assert_eq!(info.payload["a"], 1);
        assert_eq!(queue.pending_count(), 1);
        assert_eq!(queue.jobs_of_type("noop").len(), 1);
    }

    #[tokio::test]
    async fn worker_dispatches_to_handler() {
        let queue = JobQueue::new();
        let count = Arc::new(AtomicU32::new(0));
        queue.register_handler(
            "count",
            Arc::new(CountingHandler {
                count: Arc::clone(&count),
            }),
        );
        let handle = queue.start().unwrap();

        let ok = queue.enqueue("count", serde_json::json!({})).unwrap();
        let bad = queue.enqueue("count", serde_json::json!({"fail": true})).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(queue.status(ok).unwrap().status, JobStatus::Completed);
        let failed = queue.status(bad).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("asked to fail"));

        queue.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn unknown_job_type_fails() {
        let queue = JobQueue::new();
        let handle = queue.start().unwrap();
        let id = queue.enqueue("mystery", serde_json::Value::Null).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let info = queue.status(id).unwrap();
        assert_eq!(info.status, JobStatus::Failed);
        assert!(info.error.unwrap().contains("mystery"));

        queue.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_rejects_new_jobs() {
        let queue = JobQueue::new();
        queue.shutdown();
        assert!(matches!(
            queue.enqueue("x", serde_json::Value::Null),
            Err(KernelError::QueueShutdown)
        ));
    }

    #[tokio::test]
    async fn worker_cannot_start_twice() {
        let queue = JobQueue::new();
        let handle = queue.start().unwrap();
        assert!(matches!(
            queue.start(),
            Err(KernelError::WorkerAlreadyStarted)
        ));
        queue.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn finished_jobs_are_evicted_beyond_retention() {
        let queue = JobQueue::with_retention(3);
        let count = Arc::new(AtomicU32::new(0));
        queue.register_handler(
            "count",
            Arc::new(CountingHandler {
                count: Arc::clone(&count),
            }),
        );
        let handle = queue.start().unwrap();

        let ids: Vec<JobId> = (0..10)
            .map(|_| queue.enqueue("count", serde_json::json!({})).unwrap())
            .collect();
        for _ in 0..100 {
            if count.load(Ordering::SeqCst) == 10 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(count.load(Ordering::SeqCst), 10);
        let retained = queue.all_jobs();
        assert_eq!(retained.len(), 3);
        assert!(
            retained
                .values()
                .all(|j| j.status == JobStatus::Completed)
        );
        let evicted = ids.iter().filter(|id| queue.status(**id).is_err()).count();
        assert_eq!(evicted, 7);

        queue.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn zero_retention_keeps_only_unfinished_jobs() {
        let queue = JobQueue::with_retention(0);
        let handle = queue.start().unwrap();
        let failed = queue.enqueue("mystery", serde_json::Value::Null).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(queue.status(failed).is_err());

        queue.shutdown();
        handle.await.unwrap();

        let stopped = JobQueue::with_retention(0);
        let waiting = stopped.enqueue("count", serde_json::json!({})).unwrap();
        assert_eq!(stopped.status(waiting).unwrap().status, JobStatus::Queued);
    }

    #[test]
    fn status_of_unknown_job() {
        let queue = JobQueue::new();
        assert!(matches!(
            queue.status(Uuid::now_v7()),
            Err(KernelError::JobNotFound { .. })
        ));
    }
}
