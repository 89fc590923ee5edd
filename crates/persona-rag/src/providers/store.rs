//! Persistence service contract
//!
//! The store is the only shared mutable resource. Entity and relation
//! upserts are conditional insert-or-merge operations, never read-then-write
//! from application memory, so concurrent chunks referencing the same entity
//! cannot lose updates.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{
    CanonicalDocument, Chunk, Entity, EntityType, EntityUpsert, IngestionJob, JobStatus, Relation,
    RelationStatus, RelationUpsert,
};

const DEFAULT_PAGE_LIMIT: usize = 100;
const MAX_PAGE_LIMIT: usize = 1000;

fn effective_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_PAGE_LIMIT).min(MAX_PAGE_LIMIT)
}

/// Entity query filter
///
/// `limit`/`offset` are direct fields so the filters deserialize from query
/// strings; query-string deserialization cannot see through `flatten`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntityFilter {
    pub persona: Option<String>,
    pub entity_type: Option<EntityType>,
    pub min_confidence: Option<f32>,
    pub needs_review: Option<bool>,
    /// Case-insensitive substring match over canonical name and aliases
    pub search: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl EntityFilter {
    pub fn limit(&self) -> usize {
        effective_limit(self.limit)
    }

    pub fn offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }
}

/// Relation query filter
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelationFilter {
    pub persona: Option<String>,
    pub relation_type: Option<String>,
    pub status: Option<RelationStatus>,
    pub min_confidence: Option<f32>,
    pub needs_review: Option<bool>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl RelationFilter {
    pub fn limit(&self) -> usize {
        effective_limit(self.limit)
    }

    pub fn offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }
}

/// Job query filter
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl JobFilter {
    pub fn limit(&self) -> usize {
        effective_limit(self.limit)
    }

    pub fn offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }
}

/// Persistence service: documents, chunks, graph records, and jobs
///
/// Implementations provide per-call success/failure and conditional-upsert
/// semantics; multi-table transactions are not assumed.
pub trait DocumentStore: Send + Sync {
    // Documents
    fn upsert_document(&self, document: &CanonicalDocument) -> Result<()>;
    fn get_document(&self, id: Uuid) -> Result<Option<CanonicalDocument>>;
    fn list_documents(&self, persona: Option<&str>) -> Result<Vec<CanonicalDocument>>;

    // Chunks: replaced wholesale on re-ingestion, never mutated in place
    fn replace_chunks(&self, document_id: Uuid, chunks: &[Chunk]) -> Result<()>;
    fn chunks_for_document(&self, document_id: Uuid) -> Result<Vec<Chunk>>;

    // Knowledge graph
    /// Atomic insert-or-merge keyed by (persona, name-or-alias, type)
    fn upsert_entity(&self, candidate: &EntityUpsert) -> Result<Entity>;
    /// Deduplicated by (source, target, type); repeats raise confidence
    fn upsert_relation(&self, candidate: &RelationUpsert) -> Result<Relation>;
    /// Pending -> approved | rejected only
    fn update_relation_status(&self, id: Uuid, status: RelationStatus) -> Result<Relation>;
    /// Explicit admin merge: absorb's aliases and mentions fold into keep,
    /// absorb's relations are re-pointed, absorb is deleted
    fn merge_entities(&self, keep: Uuid, absorb: Uuid) -> Result<Entity>;
    fn list_entities(&self, filter: &EntityFilter) -> Result<Vec<Entity>>;
    fn list_relations(&self, filter: &RelationFilter) -> Result<Vec<Relation>>;

    // Jobs
    fn create_job(&self, job: &IngestionJob) -> Result<()>;
    fn update_job(&self, job: &IngestionJob) -> Result<()>;
    fn get_job(&self, id: Uuid) -> Result<Option<IngestionJob>>;
    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<IngestionJob>>;
    fn delete_job(&self, id: Uuid) -> Result<()>;
}
