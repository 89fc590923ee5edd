//! Canonical document types produced by the content extractor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::ID_NAMESPACE;

/// Kind of raw source handed to the extractor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Raw PDF bytes
    Pdf,
    /// HTML page content
    Html,
    /// Markdown with optional YAML frontmatter
    Markdown,
}

impl SourceKind {
    /// Detect source kind from a filename extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "html" | "htm" => Some(Self::Html),
            "md" | "markdown" => Some(Self::Markdown),
            _ => None,
        }
    }
}

/// Document type classification
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DocType {
    Patent,
    Article,
    Paper,
    Note,
    ReleaseNotes,
    #[default]
    #[serde(other)]
    Other,
}

impl DocType {
    /// Parse a doc-type string, falling back to `Other`
    pub fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "patent" => Self::Patent,
            "article" => Self::Article,
            "paper" => Self::Paper,
            "note" => Self::Note,
            "release-notes" | "release_notes" => Self::ReleaseNotes,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Patent => "patent",
            Self::Article => "article",
            Self::Paper => "paper",
            Self::Note => "note",
            Self::ReleaseNotes => "release-notes",
            Self::Other => "other",
        }
    }
}

/// What a section contributes to retrieval
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SectionKind {
    /// Body content
    #[default]
    Content,
    /// Bibliography / citation lists, kept separate so chunking can deprioritize them
    References,
    /// Structured metadata rendered as text
    Metadata,
}

/// An ordered slice of the extracted body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    /// Heading, if the source had one
    pub heading: Option<String>,
    /// Section text
    pub text: String,
    /// Section kind
    #[serde(default)]
    pub kind: SectionKind,
}

impl Section {
    pub fn content(heading: Option<String>, text: impl Into<String>) -> Self {
        Self {
            heading,
            text: text.into(),
            kind: SectionKind::Content,
        }
    }

    pub fn references(text: impl Into<String>) -> Self {
        Self {
            heading: Some("References".to_string()),
            text: text.into(),
            kind: SectionKind::References,
        }
    }
}

/// Structured metadata attached to a document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Stable identifier from frontmatter, when present
    pub frontmatter_id: Option<String>,
    /// External identifiers (patent numbers, DOIs, ...)
    #[serde(default)]
    pub identifiers: HashMap<String, String>,
    /// Named dates (published, filed, ...)
    #[serde(default)]
    pub dates: HashMap<String, String>,
    /// Authors
    #[serde(default)]
    pub authors: Vec<String>,
    /// Personas this document is assigned to
    #[serde(default)]
    pub personas: Vec<String>,
    /// Short summary
    pub summary: Option<String>,
    /// Key terms for retrieval
    #[serde(default)]
    pub key_terms: Vec<String>,
    /// Topic tags
    #[serde(default)]
    pub topics: Vec<String>,
}

/// The normalized, extractor-independent representation of an ingested source
///
/// Immutable once chunking begins; re-ingestion supersedes rather than
/// mutates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalDocument {
    /// Stable id, derived from persona scope + frontmatter id or content hash
    pub id: Uuid,
    /// Persona scope this document belongs to
    pub persona: String,
    /// Document title
    pub title: String,
    /// Document type
    pub doc_type: DocType,
    /// Full extracted body
    pub raw_text: String,
    /// Ordered sections; their concatenation reconstructs raw_text modulo whitespace
    pub sections: Vec<Section>,
    /// Structured metadata
    pub metadata: DocumentMetadata,
    /// SHA-256 of the source bytes, for unchanged-content detection
    pub content_hash: String,
    /// Set when chunking hit the per-document ceiling or extraction looked degenerate
    #[serde(default)]
    pub needs_review: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CanonicalDocument {
    /// Derive the stable document id for a persona scope
    ///
    /// Frontmatter ids win over content hashes so a re-ingested document with
    /// edited content keeps its identity.
    pub fn derive_id(persona: &str, frontmatter_id: Option<&str>, content_hash: &str) -> Uuid {
        let name = match frontmatter_id {
            Some(fid) => format!("{}:{}", persona, fid),
            None => format!("{}:{}", persona, content_hash),
        };
        Uuid::new_v5(&ID_NAMESPACE, name.as_bytes())
    }
}
