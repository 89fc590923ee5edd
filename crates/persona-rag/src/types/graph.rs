//! Knowledge-graph record types: entities and relations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Domain-specific entity classification
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Person,
    Organization,
    Technology,
    Product,
    Concept,
    Patent,
    Publication,
    Event,
    Location,
    #[default]
    #[serde(other)]
    Other,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Organization => "organization",
            Self::Technology => "technology",
            Self::Product => "product",
            Self::Concept => "concept",
            Self::Patent => "patent",
            Self::Publication => "publication",
            Self::Event => "event",
            Self::Location => "location",
            Self::Other => "other",
        }
    }

    /// Parse an entity-type string, falling back to `Other`
    pub fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "person" => Self::Person,
            "organization" => Self::Organization,
            "technology" => Self::Technology,
            "product" => Self::Product,
            "concept" => Self::Concept,
            "patent" => Self::Patent,
            "publication" => Self::Publication,
            "event" => Self::Event,
            "location" => Self::Location,
            _ => Self::Other,
        }
    }
}

/// Normalize an entity name for matching: lowercase, collapsed whitespace
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// A deduplicated named concept
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    /// Persona scope
    pub persona: String,
    /// Display name; unique with entity_type within a persona scope
    pub canonical_name: String,
    pub entity_type: EntityType,
    /// Alternate names, set semantics
    pub aliases: Vec<String>,
    /// Extraction confidence, 0..=1
    pub confidence: f32,
    /// Total mentions across chunks and documents
    pub mention_count: u64,
    /// Below-threshold candidates are kept but flagged for human curation
    pub needs_review: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Candidate entity handed to the store's conditional upsert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityUpsert {
    pub persona: String,
    pub canonical_name: String,
    pub entity_type: EntityType,
    pub aliases: Vec<String>,
    pub confidence: f32,
    pub mention_count: u64,
    pub needs_review: bool,
}

impl Entity {
    /// Check whether a candidate refers to this entity
    ///
    /// Names match case-insensitively after normalization, or when one side's
    /// name appears in the other's alias set.
    pub fn matches(&self, candidate: &EntityUpsert) -> bool {
        if self.entity_type != candidate.entity_type {
            return false;
        }
        let own = normalize_name(&self.canonical_name);
        let other = normalize_name(&candidate.canonical_name);
        if own == other {
            return true;
        }
        self.aliases.iter().any(|a| normalize_name(a) == other)
            || candidate.aliases.iter().any(|a| normalize_name(a) == own)
    }

    /// Merge a matching candidate into this entity
    ///
    /// Unions alias sets, sums mention counts, keeps max confidence, and
    /// keeps the higher-confidence name as canonical.
    pub fn absorb(&mut self, candidate: &EntityUpsert) {
        if candidate.confidence > self.confidence {
            // The losing name becomes an alias
            let old = std::mem::replace(&mut self.canonical_name, candidate.canonical_name.clone());
            push_alias(&mut self.aliases, old);
            self.confidence = candidate.confidence;
        } else {
            push_alias(&mut self.aliases, candidate.canonical_name.clone());
        }
        for alias in &candidate.aliases {
            push_alias(&mut self.aliases, alias.clone());
        }
        // The canonical name itself is not an alias
        let canonical = normalize_name(&self.canonical_name);
        self.aliases.retain(|a| normalize_name(a) != canonical);
        self.mention_count += candidate.mention_count;
        self.needs_review = self.needs_review && candidate.needs_review;
        self.updated_at = Utc::now();
    }
}

impl EntityUpsert {
    /// Same matching rule as `Entity::matches`, between two candidates
    pub fn matches(&self, other: &EntityUpsert) -> bool {
        if self.entity_type != other.entity_type {
            return false;
        }
        let own = normalize_name(&self.canonical_name);
        let theirs = normalize_name(&other.canonical_name);
        if own == theirs {
            return true;
        }
        self.aliases.iter().any(|a| normalize_name(a) == theirs)
            || other.aliases.iter().any(|a| normalize_name(a) == own)
    }

    /// Same merge rule as `Entity::absorb`, between two candidates
    ///
    /// Commutative and associative on the final (name, aliases, confidence,
    /// mentions) output, so merge order across chunks does not matter.
    pub fn absorb(&mut self, other: &EntityUpsert) {
        if other.confidence > self.confidence {
            let old = std::mem::replace(&mut self.canonical_name, other.canonical_name.clone());
            push_alias(&mut self.aliases, old);
            self.confidence = other.confidence;
        } else {
            push_alias(&mut self.aliases, other.canonical_name.clone());
        }
        for alias in &other.aliases {
            push_alias(&mut self.aliases, alias.clone());
        }
        let canonical = normalize_name(&self.canonical_name);
        self.aliases.retain(|a| normalize_name(a) != canonical);
        self.mention_count += other.mention_count;
        self.needs_review = self.needs_review && other.needs_review;
    }
}

fn push_alias(aliases: &mut Vec<String>, alias: String) {
    let normalized = normalize_name(&alias);
    if normalized.is_empty() {
        return;
    }
    if !aliases.iter().any(|a| normalize_name(a) == normalized) {
        aliases.push(alias);
    }
}

/// Review status of a relation
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RelationStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl RelationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Status transitions are pending -> approved | rejected only
    pub fn can_transition_to(&self, next: RelationStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Approved) | (Self::Pending, Self::Rejected)
        )
    }
}

/// A typed edge between two entities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: Uuid,
    /// Persona scope
    pub persona: String,
    pub source_entity_id: Uuid,
    pub target_entity_id: Uuid,
    /// Normalized snake_case relation type
    pub relation_type: String,
    /// Extraction confidence, 0..=1
    pub confidence: f32,
    pub status: RelationStatus,
    pub needs_review: bool,
    /// Provenance
    pub source_document_id: Option<Uuid>,
    pub source_chunk_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Candidate relation handed to the store's conditional upsert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationUpsert {
    pub persona: String,
    pub source_entity_id: Uuid,
    pub target_entity_id: Uuid,
    pub relation_type: String,
    pub confidence: f32,
    pub needs_review: bool,
    pub source_document_id: Option<Uuid>,
    pub source_chunk_id: Option<Uuid>,
}

/// Combine confidences of repeated extractions of the same triple
///
/// Noisy-or keeps the result in 0..=1 and is commutative/associative, so
/// merge output does not depend on chunk completion order.
pub fn combine_confidence(a: f32, b: f32) -> f32 {
    (1.0 - (1.0 - a) * (1.0 - b)).clamp(0.0, 1.0)
}

/// Normalize a relation type to snake_case
pub fn normalize_relation_type(relation_type: &str) -> String {
    relation_type
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
        .replace('-', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(name: &str, confidence: f32) -> Entity {
        let now = Utc::now();
        Entity {
            id: Uuid::new_v4(),
            persona: "david".to_string(),
            canonical_name: name.to_string(),
            entity_type: EntityType::Technology,
            aliases: Vec::new(),
            confidence,
            mention_count: 1,
            needs_review: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn candidate(name: &str, confidence: f32) -> EntityUpsert {
        EntityUpsert {
            persona: "david".to_string(),
            canonical_name: name.to_string(),
            entity_type: EntityType::Technology,
            aliases: Vec::new(),
            confidence,
            mention_count: 1,
            needs_review: false,
        }
    }

    #[test]
    fn test_match_is_case_insensitive() {
        let e = entity("Lightfield Display", 0.9);
        assert!(e.matches(&candidate("lightfield   display", 0.5)));
        assert!(!e.matches(&candidate("holography", 0.5)));
    }

    #[test]
    fn test_match_through_alias_set() {
        let mut e = entity("Leia Inc", 0.9);
        e.aliases.push("Leia".to_string());
        assert!(e.matches(&candidate("leia", 0.4)));

        let mut c = candidate("Leia Incorporated", 0.4);
        c.aliases.push("Leia Inc".to_string());
        assert!(e.matches(&c));
    }

    #[test]
    fn test_absorb_keeps_higher_confidence_name() {
        let mut e = entity("lightfield", 0.5);
        e.absorb(&candidate("Lightfield Display", 0.9));
        assert_eq!(e.canonical_name, "Lightfield Display");
        assert_eq!(e.confidence, 0.9);
        assert_eq!(e.mention_count, 2);
        assert!(e.aliases.iter().any(|a| a == "lightfield"));
    }

    #[test]
    fn test_absorb_unions_aliases_without_duplicates() {
        let mut e = entity("Leia Inc", 0.9);
        e.aliases.push("Leia".to_string());
        let mut c = candidate("Leia Inc", 0.4);
        c.aliases = vec!["LEIA".to_string(), "Leia Display".to_string()];
        e.absorb(&c);
        assert_eq!(e.mention_count, 2);
        // "LEIA" normalizes to the existing "Leia" alias
        assert_eq!(e.aliases.len(), 2);
    }

    #[test]
    fn test_relation_status_transitions() {
        assert!(RelationStatus::Pending.can_transition_to(RelationStatus::Approved));
        assert!(RelationStatus::Pending.can_transition_to(RelationStatus::Rejected));
        assert!(!RelationStatus::Approved.can_transition_to(RelationStatus::Rejected));
        assert!(!RelationStatus::Rejected.can_transition_to(RelationStatus::Pending));
    }

    #[test]
    fn test_combine_confidence_bounded_and_commutative() {
        let combined = combine_confidence(0.8, 0.9);
        assert!(combined <= 1.0 && combined > 0.9);
        assert_eq!(combine_confidence(0.3, 0.7), combine_confidence(0.7, 0.3));
        assert_eq!(combine_confidence(1.0, 1.0), 1.0);
    }

    #[test]
    fn test_normalize_relation_type() {
        assert_eq!(normalize_relation_type("Invented By"), "invented_by");
        assert_eq!(normalize_relation_type("co-authored  with"), "co_authored_with");
    }
}
