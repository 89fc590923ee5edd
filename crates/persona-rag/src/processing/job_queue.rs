//! Job queue: submission, retry, cancellation, and staleness recovery
//!
//! Durable job state lives in the store; the queue adds the in-flight
//! machinery around it: the worker feed channel, cooperative cancel flags,
//! and the staleness sweep that fails jobs whose worker died.

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::JobsConfig;
use crate::error::{Error, Result};
use crate::providers::{DocumentStore, JobFilter};
use crate::types::{IngestionJob, JobPayload, JobProgress, JobStatus};

use super::progress::{JobEvent, ProgressHub};

/// Queue front-end shared by the HTTP layer and the workers
pub struct JobQueue {
    store: Arc<dyn DocumentStore>,
    hub: Arc<ProgressHub>,
    sender: mpsc::Sender<Uuid>,
    cancel_flags: DashMap<Uuid, Arc<AtomicBool>>,
    max_attempts: u32,
    stale_after: ChronoDuration,
}

impl JobQueue {
    /// Build the queue and the receiver end workers consume from
    pub fn new(
        store: Arc<dyn DocumentStore>,
        hub: Arc<ProgressHub>,
        config: &JobsConfig,
    ) -> (Arc<Self>, mpsc::Receiver<Uuid>) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let queue = Arc::new(Self {
            store,
            hub,
            sender,
            cancel_flags: DashMap::new(),
            max_attempts: config.max_attempts,
            stale_after: ChronoDuration::seconds(config.stale_after_secs as i64),
        });
        (queue, receiver)
    }

    /// Validate and enqueue a job; returns its id
    pub async fn submit(&self, payload: JobPayload) -> Result<Uuid> {
        if let JobPayload::Batch { documents } = &payload {
            if documents.is_empty() {
                return Err(Error::Validation(
                    "batch contains no documents".to_string(),
                ));
            }
        }
        let job = IngestionJob::new(payload);
        self.store.create_job(&job)?;
        self.cancel_flags
            .insert(job.id, Arc::new(AtomicBool::new(false)));
        self.sender
            .send(job.id)
            .await
            .map_err(|_| Error::internal("job queue is shut down"))?;
        info!("Queued {} job {}", job.payload.job_type(), job.id);
        Ok(job.id)
    }

    pub fn get(&self, id: Uuid) -> Result<IngestionJob> {
        self.store
            .get_job(id)?
            .ok_or_else(|| Error::NotFound(format!("job {}", id)))
    }

    pub fn list(&self, filter: &JobFilter) -> Result<Vec<IngestionJob>> {
        self.store.list_jobs(filter)
    }

    /// Re-enqueue a failed job
    ///
    /// Only `failed` jobs can be retried, and only while attempts remain.
    /// The payload is reused; progress restarts for the new attempt.
    pub async fn retry(&self, id: Uuid) -> Result<IngestionJob> {
        let mut job = self.get(id)?;
        if job.status != JobStatus::Failed {
            return Err(Error::Validation(format!(
                "only failed jobs can be retried, job is {}",
                job.status.as_str()
            )));
        }
        if job.attempts >= self.max_attempts {
            return Err(Error::Validation(format!(
                "job has used all {} attempts",
                self.max_attempts
            )));
        }
        job.status = JobStatus::Pending;
        job.attempts += 1;
        job.error = None;
        job.result = None;
        job.progress = JobProgress::new(job.progress.total);
        job.completed_at = None;
        job.updated_at = Utc::now();
        self.store.update_job(&job)?;
        self.cancel_flags
            .insert(job.id, Arc::new(AtomicBool::new(false)));
        self.sender
            .send(job.id)
            .await
            .map_err(|_| Error::internal("job queue is shut down"))?;
        info!("Retrying job {} (attempt {})", job.id, job.attempts);
        Ok(job)
    }

    /// Cancel a job
    ///
    /// Pending jobs are deleted outright (no side effects exist yet; the
    /// worker skips the tombstoned id). Processing jobs get their cancel
    /// flag raised and finish the in-flight stage before failing with
    /// "cancelled".
    pub fn cancel(&self, id: Uuid) -> Result<IngestionJob> {
        let job = self.get(id)?;
        match job.status {
            JobStatus::Pending => {
                self.store.delete_job(id)?;
                self.cancel_flags.remove(&id);
                info!("Cancelled pending job {}", id);
                Ok(job)
            }
            JobStatus::Processing => {
                if let Some(flag) = self.cancel_flags.get(&id) {
                    flag.store(true, Ordering::SeqCst);
                }
                info!("Requested cancellation of processing job {}", id);
                Ok(job)
            }
            status => Err(Error::Validation(format!(
                "cannot cancel a {} job",
                status.as_str()
            ))),
        }
    }

    /// The cooperative cancel flag for a job, created on demand
    pub fn cancel_flag(&self, id: Uuid) -> Arc<AtomicBool> {
        self.cancel_flags
            .entry(id)
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    }

    /// Drop in-flight bookkeeping once a job reaches a terminal state
    pub fn finish(&self, id: Uuid) {
        self.cancel_flags.remove(&id);
        self.hub.remove(id);
    }

    /// Fail `processing` rows left over from a previous run
    ///
    /// Called once at startup. A processing row without a live worker can
    /// never complete; re-running it silently could double-apply side
    /// effects, so it is failed and left to explicit retry.
    pub fn recover_stale_jobs(&self) -> Result<usize> {
        let stale = self.fail_processing_older_than(ChronoDuration::zero(), "stalled")?;
        if stale > 0 {
            warn!("Failed {} orphaned processing job(s) from a previous run", stale);
        }
        Ok(stale)
    }

    /// Periodically fail processing jobs that outlived the staleness window
    pub fn spawn_staleness_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(self);
        let period = Duration::from_secs((queue.stale_after.num_seconds() as u64 / 4).max(30));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // First tick is immediate
            loop {
                interval.tick().await;
                match queue.fail_processing_older_than(queue.stale_after, "stalled") {
                    Ok(0) => {}
                    Ok(count) => warn!("Staleness sweep failed {} stalled job(s)", count),
                    Err(e) => warn!("Staleness sweep error: {}", e),
                }
            }
        })
    }

    fn fail_processing_older_than(
        &self,
        age: ChronoDuration,
        reason: &str,
    ) -> Result<usize> {
        let cutoff = Utc::now() - age;
        let processing = self.store.list_jobs(&JobFilter {
            status: Some(JobStatus::Processing),
            ..JobFilter::default()
        })?;
        let mut failed = 0;
        for mut job in processing {
            if job.updated_at > cutoff {
                continue;
            }
            job.status = JobStatus::Failed;
            job.error = Some(reason.to_string());
            job.updated_at = Utc::now();
            job.completed_at = Some(job.updated_at);
            self.store.update_job(&job)?;
            self.hub.publish(JobEvent::from_job(&job));
            self.finish(job.id);
            failed += 1;
        }
        Ok(failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::types::{DocumentSource, SourceKind};

    fn setup(config: &JobsConfig) -> (Arc<JobQueue>, mpsc::Receiver<Uuid>, Arc<dyn DocumentStore>) {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let hub = Arc::new(ProgressHub::new());
        let (queue, receiver) = JobQueue::new(Arc::clone(&store), hub, config);
        (queue, receiver, store)
    }

    fn payload() -> JobPayload {
        JobPayload::SingleDocument {
            document: DocumentSource {
                name: "a.md".to_string(),
                persona: "david".to_string(),
                kind: SourceKind::Markdown,
                data: b"# hi".to_vec(),
            },
        }
    }

    #[tokio::test]
    async fn test_submit_persists_and_enqueues() {
        let (queue, mut receiver, _) = setup(&JobsConfig::default());
        let id = queue.submit(payload()).await.unwrap();
        assert_eq!(receiver.recv().await, Some(id));
        assert_eq!(queue.get(id).unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_empty_batch_rejected() {
        let (queue, _receiver, _) = setup(&JobsConfig::default());
        let err = queue
            .submit(JobPayload::Batch { documents: vec![] })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_retry_only_failed_and_bounded() {
        let (queue, _receiver, store) = setup(&JobsConfig {
            max_attempts: 2,
            ..JobsConfig::default()
        });
        let id = queue.submit(payload()).await.unwrap();

        // Pending jobs cannot be retried
        assert!(queue.retry(id).await.is_err());

        let mut job = queue.get(id).unwrap();
        job.status = JobStatus::Failed;
        job.error = Some("boom".to_string());
        store.update_job(&job).unwrap();

        let retried = queue.retry(id).await.unwrap();
        assert_eq!(retried.status, JobStatus::Pending);
        assert_eq!(retried.attempts, 2);

        let mut job = queue.get(id).unwrap();
        job.status = JobStatus::Failed;
        store.update_job(&job).unwrap();
        // Attempt budget exhausted
        assert!(queue.retry(id).await.is_err());
    }

    #[tokio::test]
    async fn test_cancel_pending_deletes() {
        let (queue, _receiver, _) = setup(&JobsConfig::default());
        let id = queue.submit(payload()).await.unwrap();
        queue.cancel(id).unwrap();
        assert!(matches!(queue.get(id), Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_cancel_processing_raises_flag() {
        let (queue, _receiver, store) = setup(&JobsConfig::default());
        let id = queue.submit(payload()).await.unwrap();
        let mut job = queue.get(id).unwrap();
        job.status = JobStatus::Processing;
        store.update_job(&job).unwrap();

        let flag = queue.cancel_flag(id);
        assert!(!flag.load(Ordering::SeqCst));
        queue.cancel(id).unwrap();
        assert!(flag.load(Ordering::SeqCst));
        // Still present: the worker finishes the stage and fails it
        assert_eq!(queue.get(id).unwrap().status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn test_completed_jobs_cannot_be_cancelled() {
        let (queue, _receiver, store) = setup(&JobsConfig::default());
        let id = queue.submit(payload()).await.unwrap();
        let mut job = queue.get(id).unwrap();
        job.status = JobStatus::Completed;
        store.update_job(&job).unwrap();
        assert!(queue.cancel(id).is_err());
    }

    #[tokio::test]
    async fn test_startup_recovery_fails_orphaned_processing_jobs() {
        let (queue, _receiver, store) = setup(&JobsConfig::default());
        let id = queue.submit(payload()).await.unwrap();
        let mut job = queue.get(id).unwrap();
        job.status = JobStatus::Processing;
        store.update_job(&job).unwrap();

        assert_eq!(queue.recover_stale_jobs().unwrap(), 1);
        let job = queue.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("stalled"));
    }
}
