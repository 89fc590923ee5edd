//! Content extraction: raw source bytes to a canonical document
//!
//! The extractor is the only component that knows source formats. Everything
//! downstream (chunking, graph building, storage) sees `CanonicalDocument`
//! and never raw bytes. Extraction is pure given the same input bytes: ids
//! are derived from content, never from clocks.

use std::sync::Arc;

use chrono::Utc;
use scraper::{ElementRef, Html};
use tracing::{debug, warn};

use crate::config::{ExtractionConfig, PersonaConfig};
use crate::error::{Error, Result};
use crate::providers::{
    extraction::analyze_pdf, DocumentStructureProvider, StructuredExtractor,
};
use crate::types::{
    content_hash, CanonicalDocument, DocType, DocumentMetadata, DocumentSource, Section,
    SourceKind,
};

use super::frontmatter::FrontmatterParser;
use super::markdown::{sections_from_markdown, split_frontmatter};

/// Extraction output: the canonical document plus non-fatal degradations
#[derive(Debug)]
pub struct ExtractedDocument {
    pub document: CanonicalDocument,
    pub warnings: Vec<String>,
}

/// Turns raw document sources into canonical documents
pub struct ContentExtractor {
    structured: Arc<dyn StructuredExtractor>,
    document_structure: Arc<dyn DocumentStructureProvider>,
    frontmatter: FrontmatterParser,
    max_source_bytes: usize,
}

impl ContentExtractor {
    pub fn new(
        structured: Arc<dyn StructuredExtractor>,
        document_structure: Arc<dyn DocumentStructureProvider>,
        personas: &PersonaConfig,
        extraction: &ExtractionConfig,
    ) -> Self {
        Self {
            structured,
            document_structure,
            frontmatter: FrontmatterParser::new(personas.known.clone()),
            max_source_bytes: extraction.max_source_bytes,
        }
    }

    /// Extract a canonical document from raw source bytes
    pub async fn extract(&self, source: &DocumentSource) -> Result<ExtractedDocument> {
        if source.data.is_empty() {
            return Err(Error::extraction(&source.name, "source is empty"));
        }
        if source.data.len() > self.max_source_bytes {
            return Err(Error::extraction(
                &source.name,
                format!(
                    "source is {} bytes, limit is {}",
                    source.data.len(),
                    self.max_source_bytes
                ),
            ));
        }

        let hash = content_hash(&source.data);
        let mut extracted = match source.kind {
            SourceKind::Pdf => self.extract_pdf(source, &hash).await?,
            SourceKind::Html => self.extract_html(source, &hash).await?,
            SourceKind::Markdown => self.extract_markdown(source, &hash)?,
        };

        if extracted.document.raw_text.trim().is_empty() {
            return Err(Error::extraction(
                &source.name,
                "extraction produced no text",
            ));
        }
        if !extracted.document.metadata.personas.contains(&source.persona) {
            extracted.document.metadata.personas.push(source.persona.clone());
        }
        debug!(
            "Extracted '{}' as {} ({} sections, {} bytes of text)",
            source.name,
            extracted.document.doc_type.as_str(),
            extracted.document.sections.len(),
            extracted.document.raw_text.len()
        );
        Ok(extracted)
    }

    async fn extract_pdf(&self, source: &DocumentSource, hash: &str) -> Result<ExtractedDocument> {
        let analysis = analyze_pdf(&source.data);
        if !analysis.looks_like_pdf {
            return Err(Error::extraction(
                &source.name,
                "missing %PDF- header, not a PDF",
            ));
        }
        if analysis.encrypted {
            return Err(Error::extraction(&source.name, "PDF is encrypted"));
        }
        debug!(
            "PDF '{}' looks well-formed, ~{} pages",
            source.name, analysis.approximate_pages
        );

        let structure = self.document_structure.extract_structure(&source.data).await?;

        let mut sections = Vec::new();
        if !structure.abstract_text.trim().is_empty() {
            sections.push(Section::content(
                Some("Abstract".to_string()),
                structure.abstract_text.trim(),
            ));
        }
        sections.push(Section::content(None, structure.body.trim()));
        if !structure.references.trim().is_empty() {
            sections.push(Section::references(structure.references.trim()));
        }

        let title = non_empty(&structure.title).unwrap_or_else(|| source.name.clone());
        let metadata = DocumentMetadata {
            authors: structure.authors.clone(),
            ..DocumentMetadata::default()
        };
        Ok(self.assemble(source, title, DocType::Paper, sections, metadata, hash, Vec::new()))
    }

    async fn extract_html(&self, source: &DocumentSource, hash: &str) -> Result<ExtractedDocument> {
        let html = String::from_utf8_lossy(&source.data);
        let text = html_to_text(&html);
        if text.trim().is_empty() {
            return Err(Error::extraction(
                &source.name,
                "HTML contained no text content",
            ));
        }

        let structured = self.structured.extract_structured(&text).await?;

        let mut sections = Vec::new();
        if !structured.abstract_text.trim().is_empty() {
            sections.push(Section::content(
                Some("Abstract".to_string()),
                structured.abstract_text.trim(),
            ));
        }
        sections.push(Section::content(None, structured.content.trim()));

        let title = non_empty(&structured.title).unwrap_or_else(|| source.name.clone());
        let metadata = DocumentMetadata {
            authors: structured.authors.clone(),
            summary: non_empty(&structured.summary),
            key_terms: structured.key_terms.clone(),
            ..DocumentMetadata::default()
        };
        Ok(self.assemble(source, title, DocType::Article, sections, metadata, hash, Vec::new()))
    }

    fn extract_markdown(&self, source: &DocumentSource, hash: &str) -> Result<ExtractedDocument> {
        let input = std::str::from_utf8(&source.data)
            .map_err(|_| Error::extraction(&source.name, "markdown is not valid UTF-8"))?;

        let (yaml, body) = split_frontmatter(input);
        let mut warnings = Vec::new();
        let (metadata, doc_type, frontmatter_title) = match yaml {
            Some(yaml) => {
                let outcome = self.frontmatter.parse(yaml);
                if !outcome.is_valid() {
                    return Err(Error::Validation(format!(
                        "frontmatter of '{}': {}",
                        source.name,
                        outcome.errors.join("; ")
                    )));
                }
                for warning in &outcome.warnings {
                    warn!("Frontmatter of '{}': {}", source.name, warning);
                }
                warnings.extend(
                    outcome
                        .warnings
                        .iter()
                        .map(|w| format!("frontmatter: {}", w)),
                );
                let metadata = outcome.metadata.unwrap_or_default();
                if !metadata.personas.contains(&source.persona) {
                    warnings.push(format!(
                        "frontmatter personas do not include scope '{}'",
                        source.persona
                    ));
                }
                (metadata, outcome.doc_type, outcome.title)
            }
            None => {
                warnings.push("no frontmatter block".to_string());
                (DocumentMetadata::default(), DocType::Note, None)
            }
        };

        let (body_title, sections) = sections_from_markdown(body);
        let title = frontmatter_title
            .or(body_title)
            .unwrap_or_else(|| source.name.clone());
        Ok(self.assemble(source, title, doc_type, sections, metadata, hash, warnings))
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        source: &DocumentSource,
        title: String,
        doc_type: DocType,
        sections: Vec<Section>,
        metadata: DocumentMetadata,
        hash: &str,
        warnings: Vec<String>,
    ) -> ExtractedDocument {
        let raw_text = sections
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let id = CanonicalDocument::derive_id(
            &source.persona,
            metadata.frontmatter_id.as_deref(),
            hash,
        );
        let now = Utc::now();
        ExtractedDocument {
            document: CanonicalDocument {
                id,
                persona: source.persona.clone(),
                title,
                doc_type,
                raw_text,
                sections,
                metadata,
                content_hash: hash.to_string(),
                needs_review: false,
                created_at: now,
                updated_at: now,
            },
            warnings,
        }
    }
}

/// Flatten an HTML document to text, skipping non-content subtrees
fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut out = String::new();
    collect_text(document.root_element(), &mut out);
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn collect_text(element: ElementRef, out: &mut String) {
    const SKIP: &[&str] = &["script", "style", "noscript", "head", "template"];
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
            out.push(' ');
        } else if let Some(child) = ElementRef::wrap(child) {
            if SKIP.contains(&child.value().name()) {
                continue;
            }
            collect_text(child, out);
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
