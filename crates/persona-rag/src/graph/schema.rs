//! Extraction schema and candidate types for per-chunk graph extraction

use serde::{Deserialize, Serialize};

use crate::types::EntityType;

/// An entity candidate as extracted from one chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityCandidate {
    pub name: String,
    #[serde(rename = "type", default)]
    pub entity_type: EntityType,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

/// A relation candidate as extracted from one chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationCandidate {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub relation_type: String,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

/// Entities and relations extracted from one chunk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkGraph {
    #[serde(default)]
    pub entities: Vec<EntityCandidate>,
    #[serde(default)]
    pub relations: Vec<RelationCandidate>,
}

fn default_confidence() -> f32 {
    0.5
}

/// JSON schema sent alongside graph-extraction requests
pub fn graph_extraction_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "entities": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["name"],
                    "properties": {
                        "name": { "type": "string" },
                        "type": {
                            "type": "string",
                            "enum": [
                                "person", "organization", "technology", "product",
                                "concept", "patent", "publication", "event",
                                "location", "other"
                            ]
                        },
                        "aliases": { "type": "array", "items": { "type": "string" } },
                        "confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
                    }
                }
            },
            "relations": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["source", "target", "type"],
                    "properties": {
                        "source": { "type": "string" },
                        "target": { "type": "string" },
                        "type": { "type": "string" },
                        "confidence": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_graph_decodes_with_defaults() {
        let raw = serde_json::json!({
            "entities": [
                { "name": "Leia Inc", "type": "organization" },
                { "name": "lightfield", "type": "something-unlisted", "confidence": 0.9 },
            ],
            "relations": [
                { "source": "David Fattal", "target": "Leia Inc", "type": "founded" },
            ]
        });
        let graph: ChunkGraph = serde_json::from_value(raw).unwrap();
        assert_eq!(graph.entities.len(), 2);
        assert_eq!(graph.entities[0].confidence, 0.5);
        // Unlisted types fall back to `other`
        assert_eq!(graph.entities[1].entity_type, EntityType::Other);
        assert_eq!(graph.relations[0].relation_type, "founded");
    }
}
