//! In-memory document store
//!
//! Same contract as the SQLite backend, backed by maps behind one mutex so
//! conditional upserts stay atomic. Used by tests and
//! `storage.backend = "memory"` deployments.

use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::providers::{DocumentStore, EntityFilter, JobFilter, RelationFilter};
use crate::types::{
    combine_confidence, normalize_name, CanonicalDocument, Chunk, Entity, EntityUpsert,
    IngestionJob, Relation, RelationStatus, RelationUpsert,
};

#[derive(Default)]
struct Inner {
    documents: HashMap<Uuid, CanonicalDocument>,
    chunks: HashMap<Uuid, Vec<Chunk>>,
    entities: HashMap<Uuid, Entity>,
    relations: HashMap<Uuid, Relation>,
    jobs: HashMap<Uuid, IngestionJob>,
}

/// Map-backed persistence, for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for MemoryStore {
    fn upsert_document(&self, document: &CanonicalDocument) -> Result<()> {
        self.inner
            .lock()
            .documents
            .insert(document.id, document.clone());
        Ok(())
    }

    fn get_document(&self, id: Uuid) -> Result<Option<CanonicalDocument>> {
        Ok(self.inner.lock().documents.get(&id).cloned())
    }

    fn list_documents(&self, persona: Option<&str>) -> Result<Vec<CanonicalDocument>> {
        let inner = self.inner.lock();
        let mut documents: Vec<CanonicalDocument> = inner
            .documents
            .values()
            .filter(|d| persona.map_or(true, |p| d.persona == p))
            .cloned()
            .collect();
        documents.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(documents)
    }

    fn replace_chunks(&self, document_id: Uuid, chunks: &[Chunk]) -> Result<()> {
        self.inner.lock().chunks.insert(document_id, chunks.to_vec());
        Ok(())
    }

    fn chunks_for_document(&self, document_id: Uuid) -> Result<Vec<Chunk>> {
        Ok(self
            .inner
            .lock()
            .chunks
            .get(&document_id)
            .cloned()
            .unwrap_or_default())
    }

    fn upsert_entity(&self, candidate: &EntityUpsert) -> Result<Entity> {
        let mut inner = self.inner.lock();
        let existing = inner
            .entities
            .values_mut()
            .find(|e| e.persona == candidate.persona && e.matches(candidate));
        match existing {
            Some(entity) => {
                entity.absorb(candidate);
                Ok(entity.clone())
            }
            None => {
                let now = chrono::Utc::now();
                let entity = Entity {
                    id: Uuid::new_v4(),
                    persona: candidate.persona.clone(),
                    canonical_name: candidate.canonical_name.clone(),
                    entity_type: candidate.entity_type,
                    aliases: candidate.aliases.clone(),
                    confidence: candidate.confidence,
                    mention_count: candidate.mention_count,
                    needs_review: candidate.needs_review,
                    created_at: now,
                    updated_at: now,
                };
                inner.entities.insert(entity.id, entity.clone());
                Ok(entity)
            }
        }
    }

    fn upsert_relation(&self, candidate: &RelationUpsert) -> Result<Relation> {
        let mut inner = self.inner.lock();
        let existing = inner.relations.values_mut().find(|r| {
            r.persona == candidate.persona
                && r.source_entity_id == candidate.source_entity_id
                && r.target_entity_id == candidate.target_entity_id
                && r.relation_type == candidate.relation_type
        });
        match existing {
            Some(relation) => {
                relation.confidence =
                    combine_confidence(relation.confidence, candidate.confidence);
                relation.needs_review = relation.needs_review && candidate.needs_review;
                relation.updated_at = chrono::Utc::now();
                Ok(relation.clone())
            }
            None => {
                let now = chrono::Utc::now();
                let relation = Relation {
                    id: Uuid::new_v4(),
                    persona: candidate.persona.clone(),
                    source_entity_id: candidate.source_entity_id,
                    target_entity_id: candidate.target_entity_id,
                    relation_type: candidate.relation_type.clone(),
                    confidence: candidate.confidence,
                    status: RelationStatus::Pending,
                    needs_review: candidate.needs_review,
                    source_document_id: candidate.source_document_id,
                    source_chunk_id: candidate.source_chunk_id,
                    created_at: now,
                    updated_at: now,
                };
                inner.relations.insert(relation.id, relation.clone());
                Ok(relation)
            }
        }
    }

    fn update_relation_status(&self, id: Uuid, status: RelationStatus) -> Result<Relation> {
        let mut inner = self.inner.lock();
        let relation = inner
            .relations
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("relation {}", id)))?;
        if !relation.status.can_transition_to(status) {
            return Err(Error::Validation(format!(
                "cannot transition relation from {} to {}",
                relation.status.as_str(),
                status.as_str()
            )));
        }
        relation.status = status;
        relation.needs_review = false;
        relation.updated_at = chrono::Utc::now();
        Ok(relation.clone())
    }

    fn merge_entities(&self, keep: Uuid, absorb: Uuid) -> Result<Entity> {
        if keep == absorb {
            return Err(Error::Validation(
                "cannot merge an entity into itself".to_string(),
            ));
        }
        let mut inner = self.inner.lock();
        let absorbed = inner
            .entities
            .get(&absorb)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("entity {}", absorb)))?;
        let kept = inner
            .entities
            .get_mut(&keep)
            .ok_or_else(|| Error::NotFound(format!("entity {}", keep)))?;
        if kept.persona != absorbed.persona {
            return Err(Error::Validation(
                "cannot merge entities across persona scopes".to_string(),
            ));
        }
        kept.absorb(&EntityUpsert {
            persona: absorbed.persona.clone(),
            canonical_name: absorbed.canonical_name.clone(),
            entity_type: absorbed.entity_type,
            aliases: absorbed.aliases.clone(),
            confidence: absorbed.confidence,
            mention_count: absorbed.mention_count,
            needs_review: absorbed.needs_review,
        });
        let kept = kept.clone();

        for relation in inner.relations.values_mut() {
            if relation.source_entity_id == absorb {
                relation.source_entity_id = keep;
            }
            if relation.target_entity_id == absorb {
                relation.target_entity_id = keep;
            }
        }
        // Drop self-loops created by repointing, then dedup repointed triples
        inner
            .relations
            .retain(|_, r| r.source_entity_id != r.target_entity_id);
        let mut seen: HashMap<(String, Uuid, Uuid, String), Uuid> = HashMap::new();
        let mut duplicates = Vec::new();
        for relation in inner.relations.values() {
            let key = (
                relation.persona.clone(),
                relation.source_entity_id,
                relation.target_entity_id,
                relation.relation_type.clone(),
            );
            if seen.insert(key, relation.id).is_some() {
                duplicates.push(relation.id);
            }
        }
        for id in duplicates {
            inner.relations.remove(&id);
        }
        inner.entities.remove(&absorb);
        Ok(kept)
    }

    fn list_entities(&self, filter: &EntityFilter) -> Result<Vec<Entity>> {
        let inner = self.inner.lock();
        let search = filter.search.as_deref().map(str::to_lowercase);
        let mut entities: Vec<Entity> = inner
            .entities
            .values()
            .filter(|e| filter.persona.as_deref().map_or(true, |p| e.persona == p))
            .filter(|e| filter.entity_type.map_or(true, |t| e.entity_type == t))
            .filter(|e| filter.min_confidence.map_or(true, |m| e.confidence >= m))
            .filter(|e| filter.needs_review.map_or(true, |n| e.needs_review == n))
            .filter(|e| {
                search.as_deref().map_or(true, |needle| {
                    normalize_name(&e.canonical_name).contains(needle)
                        || e.aliases.iter().any(|a| normalize_name(a).contains(needle))
                })
            })
            .cloned()
            .collect();
        entities.sort_by(|a, b| {
            b.mention_count
                .cmp(&a.mention_count)
                .then_with(|| a.canonical_name.cmp(&b.canonical_name))
        });
        Ok(entities
            .into_iter()
            .skip(filter.offset())
            .take(filter.limit())
            .collect())
    }

    fn list_relations(&self, filter: &RelationFilter) -> Result<Vec<Relation>> {
        let inner = self.inner.lock();
        let mut relations: Vec<Relation> = inner
            .relations
            .values()
            .filter(|r| filter.persona.as_deref().map_or(true, |p| r.persona == p))
            .filter(|r| {
                filter
                    .relation_type
                    .as_deref()
                    .map_or(true, |t| r.relation_type == t)
            })
            .filter(|r| filter.status.map_or(true, |s| r.status == s))
            .filter(|r| filter.min_confidence.map_or(true, |m| r.confidence >= m))
            .filter(|r| filter.needs_review.map_or(true, |n| r.needs_review == n))
            .cloned()
            .collect();
        relations.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(relations
            .into_iter()
            .skip(filter.offset())
            .take(filter.limit())
            .collect())
    }

    fn create_job(&self, job: &IngestionJob) -> Result<()> {
        self.inner.lock().jobs.insert(job.id, job.clone());
        Ok(())
    }

    fn update_job(&self, job: &IngestionJob) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.jobs.contains_key(&job.id) {
            return Err(Error::NotFound(format!("job {}", job.id)));
        }
        inner.jobs.insert(job.id, job.clone());
        Ok(())
    }

    fn get_job(&self, id: Uuid) -> Result<Option<IngestionJob>> {
        Ok(self.inner.lock().jobs.get(&id).cloned())
    }

    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<IngestionJob>> {
        let inner = self.inner.lock();
        let mut jobs: Vec<IngestionJob> = inner
            .jobs
            .values()
            .filter(|j| filter.status.map_or(true, |s| j.status == s))
            .filter(|j| {
                filter
                    .job_type
                    .as_deref()
                    .map_or(true, |t| j.payload.job_type() == t)
            })
            .filter(|j| filter.since.map_or(true, |s| j.created_at >= s))
            .filter(|j| filter.until.map_or(true, |u| j.created_at <= u))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs
            .into_iter()
            .skip(filter.offset())
            .take(filter.limit())
            .collect())
    }

    fn delete_job(&self, id: Uuid) -> Result<()> {
        self.inner
            .lock()
            .jobs
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("job {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityType;

    fn candidate(name: &str, confidence: f32) -> EntityUpsert {
        EntityUpsert {
            persona: "david".to_string(),
            canonical_name: name.to_string(),
            entity_type: EntityType::Concept,
            aliases: Vec::new(),
            confidence,
            mention_count: 1,
            needs_review: false,
        }
    }

    #[test]
    fn test_entity_upsert_matches_by_alias() {
        let store = MemoryStore::new();
        let mut first = candidate("Leia Inc", 0.8);
        first.aliases.push("Leia".to_string());
        let created = store.upsert_entity(&first).unwrap();

        let merged = store.upsert_entity(&candidate("leia", 0.4)).unwrap();
        assert_eq!(created.id, merged.id);
        assert_eq!(merged.mention_count, 2);
    }

    #[test]
    fn test_merge_dedups_repointed_relations() {
        let store = MemoryStore::new();
        let keep = store.upsert_entity(&candidate("A", 0.9)).unwrap();
        let absorb = store.upsert_entity(&candidate("A-prime", 0.5)).unwrap();
        let other = store.upsert_entity(&candidate("B", 0.9)).unwrap();

        let relation = |source: Uuid| RelationUpsert {
            persona: "david".to_string(),
            source_entity_id: source,
            target_entity_id: other.id,
            relation_type: "related_to".to_string(),
            confidence: 0.6,
            needs_review: false,
            source_document_id: None,
            source_chunk_id: None,
        };
        store.upsert_relation(&relation(keep.id)).unwrap();
        store.upsert_relation(&relation(absorb.id)).unwrap();

        store.merge_entities(keep.id, absorb.id).unwrap();
        let relations = store.list_relations(&RelationFilter::default()).unwrap();
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].source_entity_id, keep.id);
    }

    #[test]
    fn test_job_listing_filters_by_type() {
        let store = MemoryStore::new();
        let job = IngestionJob::new(crate::types::JobPayload::KgExtract {
            document_id: Uuid::new_v4(),
        });
        store.create_job(&job).unwrap();

        let filter = JobFilter {
            job_type: Some("batch".to_string()),
            ..JobFilter::default()
        };
        assert!(store.list_jobs(&filter).unwrap().is_empty());

        let filter = JobFilter {
            job_type: Some("kg-extract".to_string()),
            ..JobFilter::default()
        };
        assert_eq!(store.list_jobs(&filter).unwrap().len(), 1);
    }
}
