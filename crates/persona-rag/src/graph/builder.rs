//! Per-chunk extraction fan-out and deterministic graph merging

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::GraphConfig;
use crate::error::Result;
use crate::providers::{DocumentStore, GraphExtractor};
use crate::types::{
    combine_confidence, normalize_name, normalize_relation_type, Chunk, ChunkType, EntityUpsert,
    RelationUpsert,
};

use super::schema::ChunkGraph;

/// A relation candidate whose endpoints are indices into a merged entity list
#[derive(Debug, Clone)]
pub struct RelationDraft {
    pub source: usize,
    pub target: usize,
    pub relation_type: String,
    pub confidence: f32,
    pub needs_review: bool,
    /// First chunk this triple was seen in
    pub source_chunk_id: Uuid,
}

/// Merged output of all per-chunk extractions for one document
#[derive(Debug, Default)]
pub struct GraphBatch {
    pub entities: Vec<EntityUpsert>,
    pub relations: Vec<RelationDraft>,
}

/// Counts reported back to the ingestion pipeline
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphCounts {
    pub entities: usize,
    pub relations: usize,
}

/// Drives per-chunk extraction and folds the results into one batch
pub struct KnowledgeGraphBuilder {
    extractor: Arc<dyn GraphExtractor>,
    config: GraphConfig,
}

impl KnowledgeGraphBuilder {
    pub fn new(extractor: Arc<dyn GraphExtractor>, config: GraphConfig) -> Self {
        Self { extractor, config }
    }

    /// Extract candidate graphs from every content chunk of a document
    ///
    /// Chunks run concurrently up to the configured limit. A failed chunk
    /// produces a warning and is skipped; the rest of the document still
    /// contributes. Results are re-sorted into chunk order so downstream
    /// merging is deterministic regardless of completion order.
    pub async fn extract_for_document(
        &self,
        chunks: &[Chunk],
    ) -> (Vec<(Uuid, ChunkGraph)>, Vec<String>) {
        // Futures own their input so the stream stays Send across spawns
        let content_chunks: Vec<(u32, Uuid, String)> = chunks
            .iter()
            .filter(|c| c.chunk_type == ChunkType::Content)
            .map(|c| (c.chunk_index, c.id, c.content.clone()))
            .collect();

        let mut results: Vec<(u32, Uuid, std::result::Result<ChunkGraph, String>)> =
            stream::iter(content_chunks.into_iter().map(|(index, chunk_id, content)| {
                let extractor = Arc::clone(&self.extractor);
                async move {
                    let outcome = extractor
                        .extract_graph(&content)
                        .await
                        .map_err(|e| e.to_string());
                    (index, chunk_id, outcome)
                }
            }))
            .buffer_unordered(self.config.chunk_concurrency.max(1))
            .collect()
            .await;
        results.sort_by_key(|(index, _, _)| *index);

        let mut graphs = Vec::new();
        let mut warnings = Vec::new();
        for (index, chunk_id, outcome) in results {
            match outcome {
                Ok(graph) => {
                    debug!(
                        "Chunk {} extracted {} entities, {} relations",
                        index,
                        graph.entities.len(),
                        graph.relations.len()
                    );
                    graphs.push((chunk_id, graph));
                }
                Err(message) => {
                    warn!("Graph extraction failed for chunk {}: {}", index, message);
                    warnings.push(format!("graph extraction failed for chunk {}: {}", index, message));
                }
            }
        }
        (graphs, warnings)
    }

    /// Fold per-chunk graphs into a single deduplicated batch
    ///
    /// Entity candidates that match by normalized name or alias (within the
    /// same type) are merged with the same rule the store uses, so the result
    /// is independent of chunk order. Relations are resolved to entity
    /// indices, self-loops dropped, and repeats of a (source, target, type)
    /// triple combined with noisy-or confidence.
    pub fn merge_chunk_graphs(&self, graphs: &[(Uuid, ChunkGraph)]) -> GraphBatch {
        let mut entities: Vec<EntityUpsert> = Vec::new();

        for (_, graph) in graphs {
            for candidate in &graph.entities {
                if normalize_name(&candidate.name).is_empty() {
                    continue;
                }
                let incoming = EntityUpsert {
                    persona: String::new(),
                    canonical_name: candidate.name.trim().to_string(),
                    entity_type: candidate.entity_type,
                    aliases: candidate
                        .aliases
                        .iter()
                        .map(|a| a.trim().to_string())
                        .filter(|a| !a.is_empty())
                        .collect(),
                    confidence: candidate.confidence.clamp(0.0, 1.0),
                    mention_count: 1,
                    needs_review: false,
                };
                match entities.iter_mut().find(|e| e.matches(&incoming)) {
                    Some(existing) => existing.absorb(&incoming),
                    None => entities.push(incoming),
                }
            }
        }
        for entity in &mut entities {
            entity.needs_review = entity.confidence < self.config.confidence_threshold;
        }

        // Name-or-alias lookup over the merged set
        let mut by_name: HashMap<String, usize> = HashMap::new();
        for (index, entity) in entities.iter().enumerate() {
            by_name
                .entry(normalize_name(&entity.canonical_name))
                .or_insert(index);
            for alias in &entity.aliases {
                by_name.entry(normalize_name(alias)).or_insert(index);
            }
        }

        let mut relations: Vec<RelationDraft> = Vec::new();
        let mut by_triple: HashMap<(usize, usize, String), usize> = HashMap::new();
        for (chunk_id, graph) in graphs {
            for candidate in &graph.relations {
                let source = by_name.get(&normalize_name(&candidate.source));
                let target = by_name.get(&normalize_name(&candidate.target));
                let (Some(&source), Some(&target)) = (source, target) else {
                    debug!(
                        "Dropping relation with unresolved endpoint: {} -> {}",
                        candidate.source, candidate.target
                    );
                    continue;
                };
                if source == target {
                    continue;
                }
                let relation_type = normalize_relation_type(&candidate.relation_type);
                if relation_type.is_empty() {
                    continue;
                }
                let confidence = candidate.confidence.clamp(0.0, 1.0);
                match by_triple.get(&(source, target, relation_type.clone())) {
                    Some(&index) => {
                        let existing = &mut relations[index];
                        existing.confidence =
                            combine_confidence(existing.confidence, confidence);
                    }
                    None => {
                        by_triple.insert(
                            (source, target, relation_type.clone()),
                            relations.len(),
                        );
                        relations.push(RelationDraft {
                            source,
                            target,
                            relation_type,
                            confidence,
                            needs_review: false,
                            source_chunk_id: *chunk_id,
                        });
                    }
                }
            }
        }
        for relation in &mut relations {
            relation.needs_review = relation.confidence < self.config.confidence_threshold;
        }

        GraphBatch { entities, relations }
    }

    /// Upsert a merged batch through the store, resolving draft indices to
    /// persisted entity ids
    pub fn persist(
        &self,
        batch: &GraphBatch,
        store: &dyn DocumentStore,
        persona: &str,
        document_id: Uuid,
    ) -> Result<GraphCounts> {
        let mut entity_ids = Vec::with_capacity(batch.entities.len());
        for entity in &batch.entities {
            let candidate = EntityUpsert {
                persona: persona.to_string(),
                ..entity.clone()
            };
            let persisted = store.upsert_entity(&candidate)?;
            entity_ids.push(persisted.id);
        }

        let mut relation_count = 0;
        for draft in &batch.relations {
            let source_entity_id = entity_ids[draft.source];
            let target_entity_id = entity_ids[draft.target];
            // Endpoint candidates can merge into the same stored entity
            if source_entity_id == target_entity_id {
                continue;
            }
            store.upsert_relation(&RelationUpsert {
                persona: persona.to_string(),
                source_entity_id,
                target_entity_id,
                relation_type: draft.relation_type.clone(),
                confidence: draft.confidence,
                needs_review: draft.needs_review,
                source_document_id: Some(document_id),
                source_chunk_id: Some(draft.source_chunk_id),
            })?;
            relation_count += 1;
        }

        Ok(GraphCounts {
            entities: entity_ids.len(),
            relations: relation_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::schema::{EntityCandidate, RelationCandidate};
    use crate::types::EntityType;
    use async_trait::async_trait;

    struct StaticExtractor;

    #[async_trait]
    impl GraphExtractor for StaticExtractor {
        async fn extract_graph(&self, _content: &str) -> Result<ChunkGraph> {
            Ok(ChunkGraph::default())
        }
    }

    fn builder() -> KnowledgeGraphBuilder {
        KnowledgeGraphBuilder::new(Arc::new(StaticExtractor), GraphConfig::default())
    }

    fn entity(name: &str, entity_type: EntityType, confidence: f32) -> EntityCandidate {
        EntityCandidate {
            name: name.to_string(),
            entity_type,
            aliases: Vec::new(),
            confidence,
        }
    }

    fn relation(source: &str, target: &str, kind: &str, confidence: f32) -> RelationCandidate {
        RelationCandidate {
            source: source.to_string(),
            target: target.to_string(),
            relation_type: kind.to_string(),
            confidence,
        }
    }

    #[test]
    fn test_merge_unions_matching_entities() {
        let b = builder();
        let chunk_a = Uuid::new_v4();
        let chunk_b = Uuid::new_v4();
        let graphs = vec![
            (
                chunk_a,
                ChunkGraph {
                    entities: vec![entity("Lightfield Display", EntityType::Technology, 0.9)],
                    relations: vec![],
                },
            ),
            (
                chunk_b,
                ChunkGraph {
                    entities: vec![entity("lightfield display", EntityType::Technology, 0.6)],
                    relations: vec![],
                },
            ),
        ];
        let batch = b.merge_chunk_graphs(&graphs);
        assert_eq!(batch.entities.len(), 1);
        assert_eq!(batch.entities[0].canonical_name, "Lightfield Display");
        assert_eq!(batch.entities[0].mention_count, 2);
        assert_eq!(batch.entities[0].confidence, 0.9);
    }

    #[test]
    fn test_merge_is_order_independent() {
        let b = builder();
        let id_a = Uuid::new_v4();
        let id_b = Uuid::new_v4();
        let graph_a = ChunkGraph {
            entities: vec![
                entity("Leia Inc", EntityType::Organization, 0.8),
                entity("David Fattal", EntityType::Person, 0.9),
            ],
            relations: vec![relation("David Fattal", "Leia Inc", "founded", 0.7)],
        };
        let graph_b = ChunkGraph {
            entities: vec![entity("leia inc", EntityType::Organization, 0.95)],
            relations: vec![relation("David Fattal", "leia inc", "founded", 0.5)],
        };

        let forward = b.merge_chunk_graphs(&[(id_a, graph_a.clone()), (id_b, graph_b.clone())]);
        let reverse = b.merge_chunk_graphs(&[(id_b, graph_b), (id_a, graph_a)]);

        let mut forward_names: Vec<(String, f32, u64)> = forward
            .entities
            .iter()
            .map(|e| (normalize_name(&e.canonical_name), e.confidence, e.mention_count))
            .collect();
        let mut reverse_names: Vec<(String, f32, u64)> = reverse
            .entities
            .iter()
            .map(|e| (normalize_name(&e.canonical_name), e.confidence, e.mention_count))
            .collect();
        forward_names.sort_by(|a, b| a.0.cmp(&b.0));
        reverse_names.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(forward_names, reverse_names);

        assert_eq!(forward.relations.len(), 1);
        assert_eq!(reverse.relations.len(), 1);
        assert!((forward.relations[0].confidence - reverse.relations[0].confidence).abs() < 1e-6);
    }

    #[test]
    fn test_relation_repeats_raise_confidence() {
        let b = builder();
        let graphs = vec![(
            Uuid::new_v4(),
            ChunkGraph {
                entities: vec![
                    entity("A", EntityType::Concept, 0.9),
                    entity("B", EntityType::Concept, 0.9),
                ],
                relations: vec![
                    relation("A", "B", "related to", 0.6),
                    relation("A", "B", "Related To", 0.5),
                ],
            },
        )];
        let batch = b.merge_chunk_graphs(&graphs);
        assert_eq!(batch.relations.len(), 1);
        assert_eq!(batch.relations[0].relation_type, "related_to");
        assert!((batch.relations[0].confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_self_loops_and_unresolved_endpoints_dropped() {
        let b = builder();
        let graphs = vec![(
            Uuid::new_v4(),
            ChunkGraph {
                entities: vec![entity("A", EntityType::Concept, 0.9)],
                relations: vec![
                    relation("A", "A", "references", 0.9),
                    relation("A", "Unknown", "references", 0.9),
                ],
            },
        )];
        let batch = b.merge_chunk_graphs(&graphs);
        assert!(batch.relations.is_empty());
    }

    #[test]
    fn test_low_confidence_flags_for_review() {
        let b = builder();
        let graphs = vec![(
            Uuid::new_v4(),
            ChunkGraph {
                entities: vec![
                    entity("A", EntityType::Concept, 0.3),
                    entity("B", EntityType::Concept, 0.9),
                ],
                relations: vec![relation("A", "B", "related_to", 0.2)],
            },
        )];
        let batch = b.merge_chunk_graphs(&graphs);
        assert!(batch.entities.iter().any(|e| e.needs_review));
        assert!(batch.entities.iter().any(|e| !e.needs_review));
        assert!(batch.relations[0].needs_review);
    }
}
