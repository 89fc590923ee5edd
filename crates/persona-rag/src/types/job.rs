//! Ingestion job types
//!
//! Payloads are a tagged union over job type so the worker loop can dispatch
//! with an exhaustive match instead of poking at loosely-typed input data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::document::SourceKind;

/// Job lifecycle status
///
/// Monotonic except for explicit retry (failed -> pending). There is no
/// processing -> pending transition; a crashed processing job is detected by
/// a staleness timeout and explicitly failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A raw document handed to the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSource {
    /// Display name (filename or URL)
    pub name: String,
    /// Persona scope to ingest into
    pub persona: String,
    /// Source kind
    pub kind: SourceKind,
    /// Raw bytes, base64 in JSON
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Typed job payload, tagged by job type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum JobPayload {
    /// Ingest one document end to end
    SingleDocument { document: DocumentSource },
    /// Ingest several documents independently; one failure does not abort the rest
    Batch { documents: Vec<DocumentSource> },
    /// Delete-then-recreate the chunk set for an existing document id
    Reingest {
        document_id: Uuid,
        document: DocumentSource,
    },
    /// Run only the knowledge-graph stages over already-persisted chunks
    KgExtract { document_id: Uuid },
}

impl JobPayload {
    /// Job type tag, used for filtering
    pub fn job_type(&self) -> &'static str {
        match self {
            Self::SingleDocument { .. } => "single-document",
            Self::Batch { .. } => "batch",
            Self::Reingest { .. } => "reingest",
            Self::KgExtract { .. } => "kg-extract",
        }
    }

    /// Number of documents this payload covers, for progress sizing
    pub fn document_count(&self) -> usize {
        match self {
            Self::SingleDocument { .. } | Self::Reingest { .. } | Self::KgExtract { .. } => 1,
            Self::Batch { documents } => documents.len(),
        }
    }
}

/// Progress of a running job
///
/// `current` never decreases within a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobProgress {
    pub current: u32,
    pub total: u32,
    pub message: String,
}

impl JobProgress {
    pub fn new(total: u32) -> Self {
        Self {
            current: 0,
            total,
            message: "queued".to_string(),
        }
    }
}

/// Outcome of one successfully processed document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentOutcome {
    pub name: String,
    pub document_id: Uuid,
    pub chunks: usize,
    pub entities: usize,
    pub relations: usize,
    /// True when unchanged content short-circuited the pipeline
    #[serde(default)]
    pub skipped: bool,
    /// Non-fatal degradations (partial graph coverage, chunk ceiling hit)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// One document that failed within a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFailure {
    pub name: String,
    pub error: String,
}

/// Per-document result summary of a finished job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobResult {
    pub succeeded: Vec<DocumentOutcome>,
    pub failed: Vec<DocumentFailure>,
}

impl JobResult {
    /// Human-readable summary distinguishing full, partial, and failed outcomes
    pub fn summary(&self) -> String {
        match (self.succeeded.len(), self.failed.len()) {
            (s, 0) => format!("{} document(s) processed", s),
            (0, f) => format!("all {} document(s) failed", f),
            (s, f) => format!("{} document(s) processed, {} failed", s, f),
        }
    }
}

/// The unit of asynchronous ingestion work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionJob {
    pub id: Uuid,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    /// Attempts so far, capped by the configured retry maximum
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl IngestionJob {
    /// Create a new pending job
    pub fn new(payload: JobPayload) -> Self {
        let now = Utc::now();
        // Five pipeline stages per document
        let total = (payload.document_count() as u32).max(1) * 5;
        Self {
            id: Uuid::new_v4(),
            payload,
            status: JobStatus::Pending,
            progress: JobProgress::new(total),
            result: None,
            error: None,
            attempts: 1,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Serde helper: Vec<u8> as base64 text in JSON
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
