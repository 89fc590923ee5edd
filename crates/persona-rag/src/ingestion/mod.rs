//! Document ingestion: extraction, frontmatter, and token-bounded chunking

pub mod chunker;
pub mod extractor;
pub mod frontmatter;
pub mod markdown;

pub use chunker::{ChunkOutcome, Chunker};
pub use extractor::{ContentExtractor, ExtractedDocument};
pub use frontmatter::{FrontmatterOutcome, FrontmatterParser};
