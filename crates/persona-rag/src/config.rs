//! Configuration for the ingestion backend

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Chunking configuration
    pub chunking: ChunkingConfig,
    /// External extraction service configuration
    pub extraction: ExtractionConfig,
    /// Knowledge-graph configuration
    pub graph: GraphConfig,
    /// Job queue configuration
    pub jobs: JobsConfig,
    /// Storage configuration
    pub storage: StorageConfig,
    /// Known persona slugs documents may be assigned to
    pub personas: PersonaConfig,
}

impl RagConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("Invalid config file: {}", e)))
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum upload size in bytes
    pub max_upload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            enable_cors: true,
            max_upload_size: 50 * 1024 * 1024, // 50MB
        }
    }
}

/// Token-bounded chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Target chunk size in estimated tokens
    pub target_tokens: usize,
    /// Minimum chunk size; an undersized tail is merged into the previous chunk
    pub min_chunk_tokens: usize,
    /// Hard upper bound on chunk size in estimated tokens
    pub max_chunk_tokens: usize,
    /// Overlap between consecutive chunks as a percentage of target_tokens
    pub overlap_percent: f32,
    /// Per-document chunk-count ceiling; exceeding it flags the document for review
    pub max_chunks_per_document: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_tokens: 800,
            min_chunk_tokens: 100,
            max_chunk_tokens: 1200,
            overlap_percent: 17.5,
            max_chunks_per_document: 500,
        }
    }
}

impl ChunkingConfig {
    /// Validate bounds the chunker relies on
    ///
    /// `min + target <= max` guarantees the tail-merge step never pushes a
    /// chunk past the upper bound.
    pub fn validate(&self) -> Result<()> {
        if self.target_tokens == 0 {
            return Err(Error::Config("chunking.target_tokens must be > 0".into()));
        }
        if self.min_chunk_tokens > self.target_tokens {
            return Err(Error::Config(
                "chunking.min_chunk_tokens must not exceed target_tokens".into(),
            ));
        }
        if self.min_chunk_tokens + self.target_tokens > self.max_chunk_tokens {
            return Err(Error::Config(
                "chunking requires min_chunk_tokens + target_tokens <= max_chunk_tokens".into(),
            ));
        }
        if !(0.0..=50.0).contains(&self.overlap_percent) {
            return Err(Error::Config(
                "chunking.overlap_percent must be between 0 and 50".into(),
            ));
        }
        if self.max_chunks_per_document == 0 {
            return Err(Error::Config(
                "chunking.max_chunks_per_document must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// External extraction service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Base URL of the structured-extraction service (HTML/URL sources)
    pub structured_url: String,
    /// Base URL of the document-structure service (PDF sources)
    pub document_structure_url: String,
    /// Maximum raw source size in bytes
    pub max_source_bytes: usize,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            structured_url: "http://localhost:9090".to_string(),
            document_structure_url: "http://localhost:9091".to_string(),
            max_source_bytes: 20 * 1024 * 1024, // 20MB
            timeout_secs: 120,
        }
    }
}

/// Knowledge-graph builder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Base URL of the entity/relation extraction service
    pub extractor_url: String,
    /// Candidates below this confidence are kept but flagged for review
    pub confidence_threshold: f32,
    /// Maximum concurrent per-chunk extraction calls per document
    pub chunk_concurrency: usize,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            extractor_url: "http://localhost:9092".to_string(),
            confidence_threshold: 0.5,
            chunk_concurrency: 4,
            timeout_secs: 120,
        }
    }
}

/// Job queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Number of worker tasks (default: CPU count, max 4)
    pub worker_count: Option<usize>,
    /// Maximum attempts per job including retries
    pub max_attempts: u32,
    /// A processing job older than this is considered stalled
    pub stale_after_secs: u64,
    /// Submission channel capacity
    pub queue_capacity: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            worker_count: None,
            max_attempts: 3,
            stale_after_secs: 1800, // 30 minutes
            queue_capacity: 1000,
        }
    }
}

impl JobsConfig {
    /// Effective worker count
    pub fn effective_workers(&self) -> usize {
        self.worker_count
            .unwrap_or_else(|| num_cpus::get().min(4))
            .max(1)
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// SQLite on disk
    #[default]
    Sqlite,
    /// In-memory (tests and ephemeral deployments)
    Memory,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend selection
    pub backend: StorageBackend,
    /// SQLite database path
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            path: PathBuf::from("persona-rag.db"),
        }
    }
}

/// Persona scope configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    /// Known persona slugs; frontmatter referencing an unknown slug is rejected
    pub known: Vec<String>,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            known: vec!["david".to_string()],
        }
    }
}

impl PersonaConfig {
    /// Check whether a persona slug is known
    pub fn is_known(&self, slug: &str) -> bool {
        self.known.iter().any(|p| p == slug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RagConfig::default();
        assert!(config.chunking.validate().is_ok());
        assert_eq!(config.chunking.target_tokens, 800);
        assert_eq!(config.chunking.max_chunk_tokens, 1200);
    }

    #[test]
    fn test_chunking_bounds_rejected() {
        let config = ChunkingConfig {
            target_tokens: 1000,
            min_chunk_tokens: 800,
            max_chunk_tokens: 1200,
            ..ChunkingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_parses_from_toml() {
        let raw = r#"
            [server]
            port = 9000

            [chunking]
            target_tokens = 1000

            [personas]
            known = ["david", "ada"]
        "#;
        let config: RagConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.chunking.target_tokens, 1000);
        assert!(config.personas.is_known("ada"));
        // Unspecified sections fall back to defaults
        assert_eq!(config.jobs.max_attempts, 3);
    }
}
