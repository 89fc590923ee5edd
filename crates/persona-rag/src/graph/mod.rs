//! Knowledge-graph extraction and merging

pub mod builder;
pub mod schema;

pub use builder::{GraphBatch, KnowledgeGraphBuilder};
pub use schema::{ChunkGraph, EntityCandidate, RelationCandidate};
