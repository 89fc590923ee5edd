//! Core data model: documents, chunks, knowledge-graph records, and jobs

pub mod chunk;
pub mod document;
pub mod graph;
pub mod job;

pub use chunk::{Chunk, ChunkType};
pub use document::{
    CanonicalDocument, DocType, DocumentMetadata, Section, SectionKind, SourceKind,
};
pub use graph::{
    combine_confidence, normalize_name, normalize_relation_type, Entity, EntityType, EntityUpsert,
    Relation, RelationStatus, RelationUpsert,
};
pub use job::{
    DocumentFailure, DocumentOutcome, DocumentSource, IngestionJob, JobPayload, JobProgress,
    JobResult, JobStatus,
};

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Namespace for deterministic (v5) document and chunk ids
///
/// Deriving ids from content keeps re-ingestion and repeated chunking
/// byte-stable.
pub const ID_NAMESPACE: Uuid = Uuid::from_u128(0x9f3a1c2e5d4b4a6f8e7d0c1b2a394857);

/// Hex-encoded SHA-256 of arbitrary bytes, used for content dedup
pub fn content_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_stable() {
        assert_eq!(content_hash(b"hello"), content_hash(b"hello"));
        assert_ne!(content_hash(b"hello"), content_hash(b"world"));
    }
}
