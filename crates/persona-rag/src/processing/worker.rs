//! Ingestion worker: drives documents through the five-stage pipeline
//!
//! Stages per document run strictly in order: extract, chunk, persist
//! chunks, graph extract, persist graph. Progress is written to the store
//! and broadcast after every stage, and the cancel flag is checked between
//! stages so a cancelled job stops at the next stage boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::graph::KnowledgeGraphBuilder;
use crate::ingestion::{Chunker, ContentExtractor};
use crate::providers::DocumentStore;
use crate::types::{
    DocumentFailure, DocumentOutcome, DocumentSource, IngestionJob, JobPayload, JobResult,
    JobStatus,
};

use super::job_queue::JobQueue;
use super::progress::{JobEvent, ProgressHub};

/// Stages per document: extract, chunk, persist chunks, graph extract,
/// persist graph
const STAGES_PER_DOCUMENT: u32 = 5;

/// One worker task pulling job ids off the shared receiver
pub struct IngestWorker {
    id: usize,
    queue: Arc<JobQueue>,
    store: Arc<dyn DocumentStore>,
    hub: Arc<ProgressHub>,
    extractor: Arc<ContentExtractor>,
    chunker: Arc<Chunker>,
    builder: Arc<KnowledgeGraphBuilder>,
}

impl IngestWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        queue: Arc<JobQueue>,
        store: Arc<dyn DocumentStore>,
        hub: Arc<ProgressHub>,
        extractor: Arc<ContentExtractor>,
        chunker: Arc<Chunker>,
        builder: Arc<KnowledgeGraphBuilder>,
    ) -> Self {
        Self {
            id,
            queue,
            store,
            hub,
            extractor,
            chunker,
            builder,
        }
    }

    /// Worker loop; exits when the submission channel closes
    pub async fn run(self, receiver: Arc<Mutex<mpsc::Receiver<Uuid>>>) {
        loop {
            let job_id = {
                let mut receiver = receiver.lock().await;
                receiver.recv().await
            };
            let Some(job_id) = job_id else {
                info!("Worker {} shutting down", self.id);
                break;
            };
            // A missing row is a cancelled-while-pending tombstone
            let job = match self.store.get_job(job_id) {
                Ok(Some(job)) if job.status == JobStatus::Pending => job,
                Ok(Some(job)) => {
                    warn!(
                        "Worker {} skipping job {} in state {}",
                        self.id,
                        job_id,
                        job.status.as_str()
                    );
                    continue;
                }
                Ok(None) => continue,
                Err(e) => {
                    error!("Worker {} failed to load job {}: {}", self.id, job_id, e);
                    continue;
                }
            };
            self.process_job(job).await;
        }
    }

    async fn process_job(&self, mut job: IngestionJob) {
        info!(
            "Worker {} processing {} job {}",
            self.id,
            job.payload.job_type(),
            job.id
        );
        job.status = JobStatus::Processing;
        let current = job.progress.current;
        self.push_update(&mut job, current, "processing");

        let cancel = self.queue.cancel_flag(job.id);
        let payload = job.payload.clone();
        let outcome = match payload {
            JobPayload::SingleDocument { document } => {
                self.run_single(&mut job, &document, None, &cancel).await
            }
            JobPayload::Batch { documents } => {
                self.run_batch(&mut job, &documents, &cancel).await
            }
            JobPayload::Reingest {
                document_id,
                document,
            } => {
                self.run_single(&mut job, &document, Some(document_id), &cancel)
                    .await
            }
            JobPayload::KgExtract { document_id } => {
                self.run_kg_extract(&mut job, document_id, &cancel).await
            }
        };

        match outcome {
            Ok(result) => {
                job.status = JobStatus::Completed;
                job.progress.message = result.summary();
                job.result = Some(result);
                job.completed_at = Some(chrono::Utc::now());
                let total = job.progress.total;
                self.push_update(&mut job, total, "");
                info!("Worker {} completed job {}", self.id, job.id);
            }
            Err(e) => {
                let message = match e {
                    Error::Cancelled => "cancelled".to_string(),
                    other => other.to_string(),
                };
                job.status = JobStatus::Failed;
                job.error = Some(message.clone());
                job.completed_at = Some(chrono::Utc::now());
                let current = job.progress.current;
                self.push_update(&mut job, current, &message);
                warn!("Worker {} failed job {}: {}", self.id, job.id, message);
            }
        }
        self.queue.finish(job.id);
    }

    async fn run_single(
        &self,
        job: &mut IngestionJob,
        source: &DocumentSource,
        reingest_id: Option<Uuid>,
        cancel: &AtomicBool,
    ) -> Result<JobResult> {
        let outcome = self
            .process_document(job, 0, source, reingest_id, cancel)
            .await?;
        let mut result = JobResult::default();
        result.succeeded.push(outcome);
        Ok(result)
    }

    /// Batch documents are isolated: one failure is recorded and the loop
    /// continues. Only cancellation aborts the whole batch.
    async fn run_batch(
        &self,
        job: &mut IngestionJob,
        documents: &[DocumentSource],
        cancel: &AtomicBool,
    ) -> Result<JobResult> {
        if documents.is_empty() {
            return Err(Error::Validation(
                "batch contains no documents".to_string(),
            ));
        }
        let mut result = JobResult::default();
        for (index, source) in documents.iter().enumerate() {
            let stage_base = index as u32 * STAGES_PER_DOCUMENT;
            match self
                .process_document(job, stage_base, source, None, cancel)
                .await
            {
                Ok(outcome) => result.succeeded.push(outcome),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!("Document '{}' failed in batch {}: {}", source.name, job.id, e);
                    result.failed.push(DocumentFailure {
                        name: source.name.clone(),
                        error: e.to_string(),
                    });
                    // Skip this document's remaining stages in the count
                    self.push_update(
                        job,
                        stage_base + STAGES_PER_DOCUMENT,
                        &format!("'{}' failed", source.name),
                    );
                }
            }
        }
        Ok(result)
    }

    /// Graph-only job over already-persisted chunks
    async fn run_kg_extract(
        &self,
        job: &mut IngestionJob,
        document_id: Uuid,
        cancel: &AtomicBool,
    ) -> Result<JobResult> {
        let document = self
            .store
            .get_document(document_id)?
            .ok_or_else(|| Error::NotFound(format!("document {}", document_id)))?;
        let chunks = self.store.chunks_for_document(document_id)?;
        if chunks.is_empty() {
            return Err(Error::Validation(format!(
                "document {} has no chunks to extract from",
                document_id
            )));
        }
        // The first three stages have no work to do here
        self.push_update(job, 3, "chunks loaded");

        check_cancelled(cancel)?;
        let (graphs, warnings) = self.builder.extract_for_document(&chunks).await;
        self.push_update(job, 4, "graph extracted");

        check_cancelled(cancel)?;
        let batch = self.builder.merge_chunk_graphs(&graphs);
        let counts = self
            .builder
            .persist(&batch, self.store.as_ref(), &document.persona, document.id)?;
        self.push_update(job, 5, "graph persisted");

        let mut result = JobResult::default();
        result.succeeded.push(DocumentOutcome {
            name: document.title.clone(),
            document_id: document.id,
            chunks: chunks.len(),
            entities: counts.entities,
            relations: counts.relations,
            skipped: false,
            warnings,
        });
        Ok(result)
    }

    /// The five-stage pipeline for one document
    async fn process_document(
        &self,
        job: &mut IngestionJob,
        stage_base: u32,
        source: &DocumentSource,
        reingest_id: Option<Uuid>,
        cancel: &AtomicBool,
    ) -> Result<DocumentOutcome> {
        // Stage 1: extract
        check_cancelled(cancel)?;
        let mut extracted = self.extractor.extract(source).await?;
        if let Some(id) = reingest_id {
            extracted.document.id = id;
        }
        let mut document = extracted.document;
        let mut warnings = extracted.warnings;
        self.push_update(job, stage_base + 1, &format!("extracted '{}'", source.name));

        // Unchanged content short-circuits the rest of the pipeline, except
        // for explicit re-ingestion.
        if reingest_id.is_none() {
            if let Some(existing) = self.store.get_document(document.id)? {
                if existing.content_hash == document.content_hash {
                    info!(
                        "Document '{}' unchanged ({}), skipping",
                        source.name, document.id
                    );
                    self.push_update(
                        job,
                        stage_base + STAGES_PER_DOCUMENT,
                        &format!("'{}' unchanged, skipped", source.name),
                    );
                    let chunks = self.store.chunks_for_document(document.id)?;
                    return Ok(DocumentOutcome {
                        name: source.name.clone(),
                        document_id: document.id,
                        chunks: chunks.len(),
                        entities: 0,
                        relations: 0,
                        skipped: true,
                        warnings,
                    });
                }
            }
        }

        // Stage 2: chunk
        check_cancelled(cancel)?;
        let chunk_outcome = self.chunker.chunk(&document)?;
        if chunk_outcome.truncated {
            warn!(
                "Document '{}' hit the chunk ceiling, flagging for review",
                source.name
            );
            document.needs_review = true;
            warnings.push("chunk ceiling reached, document truncated".to_string());
        }
        self.push_update(
            job,
            stage_base + 2,
            &format!("chunked '{}' into {} chunk(s)", source.name, chunk_outcome.chunks.len()),
        );

        // Stage 3: persist document + chunks
        check_cancelled(cancel)?;
        self.store.upsert_document(&document)?;
        self.store.replace_chunks(document.id, &chunk_outcome.chunks)?;
        self.push_update(job, stage_base + 3, &format!("persisted '{}'", source.name));

        // Stage 4: graph extract
        check_cancelled(cancel)?;
        let (graphs, graph_warnings) = self.builder.extract_for_document(&chunk_outcome.chunks).await;
        warnings.extend(graph_warnings);
        self.push_update(job, stage_base + 4, &format!("graph extracted for '{}'", source.name));

        // Stage 5: persist graph
        check_cancelled(cancel)?;
        let batch = self.builder.merge_chunk_graphs(&graphs);
        let counts = self
            .builder
            .persist(&batch, self.store.as_ref(), &document.persona, document.id)?;
        self.push_update(job, stage_base + 5, &format!("finished '{}'", source.name));

        Ok(DocumentOutcome {
            name: source.name.clone(),
            document_id: document.id,
            chunks: chunk_outcome.chunks.len(),
            entities: counts.entities,
            relations: counts.relations,
            skipped: false,
            warnings,
        })
    }

    /// Persist and broadcast a progress update; `current` never decreases
    fn push_update(&self, job: &mut IngestionJob, current: u32, message: &str) {
        job.progress.current = job.progress.current.max(current.min(job.progress.total));
        if !message.is_empty() {
            job.progress.message = message.to_string();
        }
        job.updated_at = chrono::Utc::now();
        if let Err(e) = self.store.update_job(job) {
            warn!("Failed to persist progress for job {}: {}", job.id, e);
        }
        self.hub.publish(JobEvent::from_job(job));
    }
}

fn check_cancelled(cancel: &AtomicBool) -> Result<()> {
    if cancel.load(Ordering::SeqCst) {
        return Err(Error::Cancelled);
    }
    Ok(())
}
