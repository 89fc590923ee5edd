//! YAML frontmatter parsing and validation

use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;

use crate::types::{DocType, DocumentMetadata};

/// Raw frontmatter shape; every field optional so validation can report all
/// problems at once instead of failing on the first missing key
#[derive(Debug, Default, Deserialize)]
struct RawFrontmatter {
    id: Option<String>,
    title: Option<String>,
    #[serde(default)]
    personas: Vec<String>,
    summary: Option<String>,
    doc_type: Option<String>,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    dates: HashMap<String, String>,
    #[serde(default)]
    authors: Vec<String>,
    #[serde(default)]
    identifiers: HashMap<String, String>,
    #[serde(default)]
    key_terms: Vec<String>,
}

/// Result of parsing a frontmatter block
///
/// `metadata` is populated only when no fatal errors were found.
#[derive(Debug, Default)]
pub struct FrontmatterOutcome {
    pub metadata: Option<DocumentMetadata>,
    pub title: Option<String>,
    pub doc_type: DocType,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl FrontmatterOutcome {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Frontmatter parser with persona-slug validation
pub struct FrontmatterParser {
    known_personas: Vec<String>,
    id_pattern: Regex,
}

impl FrontmatterParser {
    pub fn new(known_personas: Vec<String>) -> Self {
        Self {
            known_personas,
            // Lowercase slug: letters/digits, then letters/digits/hyphen/underscore
            id_pattern: Regex::new(r"^[a-z0-9][a-z0-9_-]*$").expect("valid id pattern"),
        }
    }

    /// Parse and validate a raw YAML block
    ///
    /// Fatal errors: malformed YAML, missing/invalid `id`, missing `title` or
    /// `summary`, empty `personas`, or a persona slug that is not configured.
    /// Missing `topics` and `dates` are warnings only.
    pub fn parse(&self, raw_yaml: &str) -> FrontmatterOutcome {
        let mut outcome = FrontmatterOutcome::default();

        let raw: RawFrontmatter = match serde_yaml::from_str(raw_yaml) {
            Ok(raw) => raw,
            Err(e) => {
                outcome.errors.push(format!("malformed YAML: {}", e));
                return outcome;
            }
        };

        match raw.id.as_deref().map(str::trim) {
            None | Some("") => outcome.errors.push("missing required field 'id'".to_string()),
            Some(id) if !self.id_pattern.is_match(id) => outcome
                .errors
                .push(format!("invalid id '{}': must be a lowercase slug", id)),
            Some(_) => {}
        }

        if raw.title.as_deref().map(str::trim).unwrap_or("").is_empty() {
            outcome
                .errors
                .push("missing required field 'title'".to_string());
        }

        if raw.personas.is_empty() {
            outcome
                .errors
                .push("missing required field 'personas'".to_string());
        } else {
            for persona in &raw.personas {
                if !self.known_personas.iter().any(|p| p == persona) {
                    outcome
                        .errors
                        .push(format!("unknown persona slug '{}'", persona));
                }
            }
        }

        if raw.summary.as_deref().map(str::trim).unwrap_or("").is_empty() {
            outcome
                .errors
                .push("missing required field 'summary'".to_string());
        }

        if raw.topics.is_empty() {
            outcome.warnings.push("missing 'topics'".to_string());
        }
        if raw.dates.is_empty() {
            outcome.warnings.push("missing 'dates'".to_string());
        }

        outcome.title = raw
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from);
        outcome.doc_type = raw
            .doc_type
            .as_deref()
            .map(DocType::parse)
            .unwrap_or(DocType::Note);

        if outcome.errors.is_empty() {
            outcome.metadata = Some(DocumentMetadata {
                frontmatter_id: raw.id.map(|id| id.trim().to_string()),
                identifiers: raw.identifiers,
                dates: raw.dates,
                authors: raw.authors,
                personas: raw.personas,
                summary: raw.summary,
                key_terms: raw.key_terms,
                topics: raw.topics,
            });
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> FrontmatterParser {
        FrontmatterParser::new(vec!["david".to_string(), "ada".to_string()])
    }

    const VALID: &str = r#"
id: patent-2019-lightfield
title: Lightfield Display Patent
personas: [david]
summary: Core lightfield display patent.
topics: [displays, optics]
dates:
  filed: "2019-03-01"
"#;

    #[test]
    fn test_valid_frontmatter() {
        let outcome = parser().parse(VALID);
        assert!(outcome.is_valid(), "errors: {:?}", outcome.errors);
        assert!(outcome.warnings.is_empty());
        let metadata = outcome.metadata.unwrap();
        assert_eq!(
            metadata.frontmatter_id.as_deref(),
            Some("patent-2019-lightfield")
        );
        assert_eq!(metadata.personas, vec!["david"]);
    }

    #[test]
    fn test_missing_id_is_fatal() {
        let outcome = parser().parse("title: T\npersonas: [david]\nsummary: S\n");
        assert!(!outcome.is_valid());
        assert!(outcome.errors.iter().any(|e| e.contains("'id'")));
        assert!(outcome.metadata.is_none());
    }

    #[test]
    fn test_invalid_id_slug_is_fatal() {
        let outcome =
            parser().parse("id: \"Not A Slug\"\ntitle: T\npersonas: [david]\nsummary: S\n");
        assert!(outcome.errors.iter().any(|e| e.contains("lowercase slug")));
    }

    #[test]
    fn test_unknown_persona_is_fatal() {
        let outcome = parser().parse("id: x\ntitle: T\npersonas: [nobody]\nsummary: S\n");
        assert!(outcome
            .errors
            .iter()
            .any(|e| e.contains("unknown persona slug 'nobody'")));
    }

    #[test]
    fn test_malformed_yaml_is_fatal() {
        let outcome = parser().parse("id: [unclosed\n");
        assert!(!outcome.is_valid());
        assert!(outcome.errors[0].contains("malformed YAML"));
    }

    #[test]
    fn test_missing_topics_and_dates_warn_only() {
        let outcome = parser().parse("id: x\ntitle: T\npersonas: [david]\nsummary: S\n");
        assert!(outcome.is_valid());
        assert_eq!(outcome.warnings.len(), 2);
    }

    #[test]
    fn test_doc_type_parsed_with_note_default() {
        let outcome = parser().parse(VALID);
        assert_eq!(outcome.doc_type, DocType::Note);

        let with_type = format!("{}doc_type: patent\n", VALID);
        let outcome = parser().parse(&with_type);
        assert_eq!(outcome.doc_type, DocType::Patent);
    }
}
