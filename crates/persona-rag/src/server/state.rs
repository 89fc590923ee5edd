//! Shared application state and pipeline wiring

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::config::{RagConfig, StorageBackend};
use crate::error::Result;
use crate::graph::KnowledgeGraphBuilder;
use crate::ingestion::{Chunker, ContentExtractor};
use crate::processing::{IngestWorker, JobQueue, ProgressHub};
use crate::providers::{
    DocumentStore, HttpDocumentStructure, HttpGraphExtractor, HttpStructuredExtractor,
};
use crate::storage::{MemoryStore, SqliteStore};

/// Everything the handlers share; cheap to clone
#[derive(Clone)]
pub struct AppState {
    config: Arc<RagConfig>,
    store: Arc<dyn DocumentStore>,
    queue: Arc<JobQueue>,
    hub: Arc<ProgressHub>,
}

impl AppState {
    /// Build the full pipeline and spawn the worker pool
    pub async fn new(config: RagConfig) -> Result<Self> {
        config.chunking.validate()?;

        let store: Arc<dyn DocumentStore> = match config.storage.backend {
            StorageBackend::Sqlite => Arc::new(SqliteStore::new(&config.storage.path)?),
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
        };

        let hub = Arc::new(ProgressHub::new());
        let (queue, receiver) = JobQueue::new(Arc::clone(&store), Arc::clone(&hub), &config.jobs);
        queue.recover_stale_jobs()?;
        queue.spawn_staleness_sweeper();

        let extractor = Arc::new(ContentExtractor::new(
            Arc::new(HttpStructuredExtractor::new(&config.extraction)),
            Arc::new(HttpDocumentStructure::new(&config.extraction)),
            &config.personas,
            &config.extraction,
        ));
        let chunker = Arc::new(Chunker::new(config.chunking.clone())?);
        let builder = Arc::new(KnowledgeGraphBuilder::new(
            Arc::new(HttpGraphExtractor::new(&config.graph)),
            config.graph.clone(),
        ));

        let worker_count = config.jobs.effective_workers();
        let receiver = Arc::new(Mutex::new(receiver));
        for worker_id in 0..worker_count {
            let worker = IngestWorker::new(
                worker_id,
                Arc::clone(&queue),
                Arc::clone(&store),
                Arc::clone(&hub),
                Arc::clone(&extractor),
                Arc::clone(&chunker),
                Arc::clone(&builder),
            );
            let receiver = Arc::clone(&receiver);
            tokio::spawn(worker.run(receiver));
        }
        info!("Started {} ingestion worker(s)", worker_count);

        Ok(Self {
            config: Arc::new(config),
            store,
            queue,
            hub,
        })
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn hub(&self) -> &ProgressHub {
        &self.hub
    }

    pub fn is_ready(&self) -> bool {
        // Storage is opened and workers are spawned during construction
        true
    }

    /// Subscribe to a job's live progress events
    pub fn subscribe(
        &self,
        job_id: Uuid,
    ) -> tokio::sync::broadcast::Receiver<crate::processing::JobEvent> {
        self.hub.subscribe(job_id)
    }
}
