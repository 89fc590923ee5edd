//! Content-extraction provider traits and HTTP implementations
//!
//! Both services are black-box collaborators. Their responses are decoded
//! against a fixed schema; any deviation is an extraction error, never
//! best-effort substring surgery on the raw response.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ExtractionConfig;
use crate::error::{Error, Result};

/// Fixed schema the structured-extraction service must return
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StructuredDocument {
    pub title: String,
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,
    pub content: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_terms: Vec<String>,
}

impl StructuredDocument {
    /// Semantic checks beyond shape: a schema-shaped but empty response is
    /// still invalid
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::Validation(
                "structured extraction returned an empty title".to_string(),
            ));
        }
        if self.content.trim().is_empty() {
            return Err(Error::Validation(
                "structured extraction returned empty content".to_string(),
            ));
        }
        Ok(())
    }
}

/// Separate text streams the document-structure service returns for a PDF
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfStructure {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,
    pub body: String,
    #[serde(default)]
    pub references: String,
}

/// Structured extraction over text content (HTML/URL sources)
#[async_trait]
pub trait StructuredExtractor: Send + Sync {
    async fn extract_structured(&self, text: &str) -> Result<StructuredDocument>;
}

/// Document-structure extraction over raw bytes (PDF sources)
#[async_trait]
pub trait DocumentStructureProvider: Send + Sync {
    async fn extract_structure(&self, data: &[u8]) -> Result<PdfStructure>;
}

/// HTTP client for the structured-extraction service
pub struct HttpStructuredExtractor {
    client: reqwest::Client,
    base_url: String,
}

impl HttpStructuredExtractor {
    pub fn new(config: &ExtractionConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: config.structured_url.trim_end_matches('/').to_string(),
        }
    }

    async fn request(&self, text: &str) -> Result<StructuredDocument> {
        let response = self
            .client
            .post(format!("{}/extract", self.base_url))
            .json(&serde_json::json!({
                "text": text,
                "schema": structured_document_schema(),
            }))
            .send()
            .await?
            .error_for_status()?;

        // Schema-validated decode; unknown fields are a schema violation
        let document: StructuredDocument = response.json().await.map_err(|e| {
            Error::Validation(format!("structured extraction response violated schema: {}", e))
        })?;
        document.validate()?;
        Ok(document)
    }
}

#[async_trait]
impl StructuredExtractor for HttpStructuredExtractor {
    /// Retry-once-then-fail on schema validation failures
    async fn extract_structured(&self, text: &str) -> Result<StructuredDocument> {
        match self.request(text).await {
            Ok(document) => Ok(document),
            Err(Error::Validation(first)) => {
                tracing::warn!("Structured extraction schema failure, retrying once: {}", first);
                self.request(text).await
            }
            Err(e) => Err(e),
        }
    }
}

/// HTTP client for the document-structure service
pub struct HttpDocumentStructure {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDocumentStructure {
    pub fn new(config: &ExtractionConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: config.document_structure_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl DocumentStructureProvider for HttpDocumentStructure {
    async fn extract_structure(&self, data: &[u8]) -> Result<PdfStructure> {
        let response = self
            .client
            .post(format!("{}/structure", self.base_url))
            .header("content-type", "application/pdf")
            .body(data.to_vec())
            .send()
            .await?
            .error_for_status()?;

        let structure: PdfStructure = response.json().await.map_err(|e| {
            Error::Validation(format!("document structure response violated schema: {}", e))
        })?;
        if structure.body.trim().is_empty() {
            return Err(Error::Validation(
                "document structure returned an empty body".to_string(),
            ));
        }
        Ok(structure)
    }
}

/// JSON schema sent alongside structured-extraction requests
pub fn structured_document_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "required": ["title", "content"],
        "additionalProperties": false,
        "properties": {
            "title": { "type": "string" },
            "abstract": { "type": "string" },
            "content": { "type": "string" },
            "authors": { "type": "array", "items": { "type": "string" } },
            "summary": { "type": "string" },
            "key_terms": { "type": "array", "items": { "type": "string" } },
        }
    })
}

/// Cheap byte-level analysis of a candidate PDF before calling the service
#[derive(Debug, Clone, Copy)]
pub struct PdfAnalysis {
    pub looks_like_pdf: bool,
    pub encrypted: bool,
    pub approximate_pages: usize,
}

/// Sniff PDF bytes for the magic header, encryption marker, and page count
pub fn analyze_pdf(data: &[u8]) -> PdfAnalysis {
    let looks_like_pdf = data.starts_with(b"%PDF-");
    let encrypted = contains(data, b"/Encrypt");
    let approximate_pages = count_occurrences(data, b"/Type /Page").max(
        // Some producers omit the space
        count_occurrences(data, b"/Type/Page"),
    );
    PdfAnalysis {
        looks_like_pdf,
        encrypted,
        approximate_pages,
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn count_occurrences(haystack: &[u8], needle: &[u8]) -> usize {
    if needle.is_empty() || haystack.len() < needle.len() {
        return 0;
    }
    haystack.windows(needle.len()).filter(|w| *w == needle).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_document_schema_decode() {
        let raw = serde_json::json!({
            "title": "Lightfield Displays",
            "abstract": "An overview.",
            "content": "Body text.",
            "authors": ["D. Fattal"],
            "summary": "Short summary",
            "key_terms": ["lightfield"],
        });
        let document: StructuredDocument = serde_json::from_value(raw).unwrap();
        assert!(document.validate().is_ok());
        assert_eq!(document.abstract_text, "An overview.");
    }

    #[test]
    fn test_unknown_fields_are_schema_violations() {
        let raw = serde_json::json!({
            "title": "T",
            "content": "C",
            "hallucinated_field": true,
        });
        assert!(serde_json::from_value::<StructuredDocument>(raw).is_err());
    }

    #[test]
    fn test_empty_content_fails_validation() {
        let document = StructuredDocument {
            title: "T".into(),
            abstract_text: String::new(),
            content: "   ".into(),
            authors: Vec::new(),
            summary: String::new(),
            key_terms: Vec::new(),
        };
        assert!(document.validate().is_err());
    }

    #[test]
    fn test_pdf_sniffing() {
        let pdf = b"%PDF-1.7\n/Type /Page\n/Type /Page\ntrailer";
        let analysis = analyze_pdf(pdf);
        assert!(analysis.looks_like_pdf);
        assert!(!analysis.encrypted);
        assert_eq!(analysis.approximate_pages, 2);

        let encrypted = b"%PDF-1.4\n/Encrypt 12 0 R";
        assert!(analyze_pdf(encrypted).encrypted);

        assert!(!analyze_pdf(b"<html></html>").looks_like_pdf);
    }
}
