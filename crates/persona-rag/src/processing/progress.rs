//! Live progress fan-out
//!
//! An explicit registry of broadcast channels, one per job, injected where
//! needed instead of living in a global. Publishing is fire-and-forget: a
//! job with no subscribers is the common case and must cost nothing.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::types::{IngestionJob, JobProgress, JobStatus};

const CHANNEL_CAPACITY: usize = 64;

/// A progress snapshot pushed to subscribers
#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    pub fn from_job(job: &IngestionJob) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            progress: job.progress.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Per-job broadcast channel registry
#[derive(Default)]
pub struct ProgressHub {
    channels: DashMap<Uuid, broadcast::Sender<JobEvent>>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a job's progress events, creating the channel on demand
    pub fn subscribe(&self, job_id: Uuid) -> broadcast::Receiver<JobEvent> {
        self.channels
            .entry(job_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Push an event to any subscribers; lagging or absent receivers are
    /// ignored
    pub fn publish(&self, event: JobEvent) {
        if let Some(sender) = self.channels.get(&event.job_id) {
            let _ = sender.send(event);
        }
    }

    /// Drop a finished job's channel
    pub fn remove(&self, job_id: Uuid) {
        self.channels.remove(&job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobPayload;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let hub = ProgressHub::new();
        let job = IngestionJob::new(JobPayload::KgExtract {
            document_id: Uuid::new_v4(),
        });
        let mut receiver = hub.subscribe(job.id);

        hub.publish(JobEvent::from_job(&job));
        let event = receiver.recv().await.unwrap();
        assert_eq!(event.job_id, job.id);
        assert_eq!(event.status, JobStatus::Pending);
    }

    #[test]
    fn test_publish_without_subscribers_is_a_no_op() {
        let hub = ProgressHub::new();
        let job = IngestionJob::new(JobPayload::KgExtract {
            document_id: Uuid::new_v4(),
        });
        // No channel exists yet; publish must not create one
        hub.publish(JobEvent::from_job(&job));
        assert!(hub.channels.is_empty());
    }
}
