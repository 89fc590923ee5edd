//! Token-bounded chunk types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ID_NAMESPACE;

/// What kind of content a chunk carries
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    /// Body content
    #[default]
    Content,
    /// Bibliography / citation material
    Reference,
    /// Metadata rendered as text
    Metadata,
}

/// A token-bounded slice of a canonical document
///
/// Never mutated after creation; re-ingestion deletes and regenerates the
/// whole chunk set for a document id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic id derived from document id, index, and content hash
    pub id: Uuid,
    /// Owning document
    pub document_id: Uuid,
    /// 0-based stable ordering within the document
    pub chunk_index: u32,
    /// Chunk text
    pub content: String,
    /// Estimated token count
    pub token_count: usize,
    /// SHA-256 of the content, for exact-duplicate detection
    pub content_hash: String,
    /// Chunk kind
    pub chunk_type: ChunkType,
    /// Start offset in the normalized document text
    pub char_start: usize,
    /// End offset in the normalized document text
    pub char_end: usize,
    /// How many times identical content appeared in the document
    ///
    /// Exact duplicates (repeated headers/footers) are collapsed into one
    /// stored chunk with this count incremented.
    pub occurrence_count: u32,
}

impl Chunk {
    /// Create a chunk with a deterministic id
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        document_id: Uuid,
        chunk_index: u32,
        content: String,
        token_count: usize,
        content_hash: String,
        chunk_type: ChunkType,
        char_start: usize,
        char_end: usize,
    ) -> Self {
        let id = Self::derive_id(document_id, chunk_index, &content_hash);
        Self {
            id,
            document_id,
            chunk_index,
            content,
            token_count,
            content_hash,
            chunk_type,
            char_start,
            char_end,
            occurrence_count: 1,
        }
    }

    /// Deterministic chunk id
    pub fn derive_id(document_id: Uuid, chunk_index: u32, content_hash: &str) -> Uuid {
        let name = format!("{}:{}:{}", document_id, chunk_index, content_hash);
        Uuid::new_v5(&ID_NAMESPACE, name.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_is_deterministic() {
        let doc = Uuid::new_v4();
        let a = Chunk::derive_id(doc, 0, "hash");
        let b = Chunk::derive_id(doc, 0, "hash");
        let c = Chunk::derive_id(doc, 1, "hash");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
