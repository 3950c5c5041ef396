use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Hex SHA-256 of an entry's text. The universal identifier across all
/// three indices (invariant 1-3 in the data model).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn of(text: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 16 hex chars, used as the ANN record id (invariant 2).
    pub fn vector_id(&self) -> &str {
        &self.0[..16.min(self.0.len())]
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ContentHash {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The user-facing unit of writing. Created by `Service::save`; never
/// mutated afterward. Identity is `content_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub text: String,
    /// RFC-3339 timestamp at a fixed offset.
    pub timestamp: String,
    /// YYYY-MM-DD in the configured timezone, derived from `timestamp`.
    pub processing_date: String,
    /// YYYY-MM-DD; absent when the extractor could not infer one.
    pub event_date: Option<String>,
    pub mood: Option<String>,
    pub tags: Vec<String>,
    pub content_hash: ContentHash,
}

impl MemoryEntry {
    pub fn new(
        text: impl Into<String>,
        timestamp: impl Into<String>,
        processing_date: impl Into<String>,
        event_date: Option<String>,
        mood: Option<String>,
        tags: Vec<String>,
    ) -> Self {
        let text = text.into();
        let content_hash = ContentHash::of(&text);
        Self {
            text,
            timestamp: timestamp.into(),
            processing_date: processing_date.into(),
            event_date,
            mood,
            tags,
            content_hash,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Person,
    Place,
    Event,
    Emotion,
    Topic,
    Product,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityType::Person => "PERSON",
            EntityType::Place => "PLACE",
            EntityType::Event => "EVENT",
            EntityType::Emotion => "EMOTION",
            EntityType::Topic => "TOPIC",
            EntityType::Product => "PRODUCT",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseEntityTypeError;

impl fmt::Display for ParseEntityTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized entity type")
    }
}

impl FromStr for EntityType {
    type Err = ParseEntityTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PERSON" => Ok(EntityType::Person),
            "PLACE" => Ok(EntityType::Place),
            "EVENT" => Ok(EntityType::Event),
            "EMOTION" => Ok(EntityType::Emotion),
            "TOPIC" => Ok(EntityType::Topic),
            "PRODUCT" => Ok(EntityType::Product),
            _ => Err(ParseEntityTypeError),
        }
    }
}

/// A node in the knowledge graph. `name` is case-preserving but
/// case-insensitively compared (invariant 5); `mention_count`
/// monotonically increases; `last_seen` monotonically updates forward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub mention_count: u32,
    pub first_seen: String,
    pub last_seen: String,
}

impl Entity {
    pub fn first_mention(name: impl Into<String>, entity_type: EntityType, date: &str) -> Self {
        Self {
            name: name.into(),
            entity_type,
            mention_count: 1,
            first_seen: date.to_string(),
            last_seen: date.to_string(),
        }
    }

    pub fn name_key(&self) -> String {
        self.name.to_lowercase()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    Causal,
    Emotional,
    Temporal,
    Topical,
    Involves,
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelationshipType::Causal => "CAUSAL",
            RelationshipType::Emotional => "EMOTIONAL",
            RelationshipType::Temporal => "TEMPORAL",
            RelationshipType::Topical => "TOPICAL",
            RelationshipType::Involves => "INVOLVES",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for RelationshipType {
    type Err = ParseEntityTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CAUSAL" => Ok(RelationshipType::Causal),
            "EMOTIONAL" => Ok(RelationshipType::Emotional),
            "TEMPORAL" => Ok(RelationshipType::Temporal),
            "TOPICAL" => Ok(RelationshipType::Topical),
            "INVOLVES" => Ok(RelationshipType::Involves),
            _ => Err(ParseEntityTypeError),
        }
    }
}

/// A directed edge. Identity is `(source_name, target_name, rel_type)`.
/// On re-observation, `weight` is the mean of old and new; `evidence`,
/// `event_date`, `source_hash` are overwritten with the latest
/// observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source_name: String,
    pub target_name: String,
    pub rel_type: RelationshipType,
    pub weight: f32,
    pub evidence: String,
    pub event_date: Option<String>,
    pub source_hash: ContentHash,
}

impl Relationship {
    pub fn edge_key(&self) -> (String, String, RelationshipType) {
        (
            self.source_name.to_lowercase(),
            self.target_name.to_lowercase(),
            self.rel_type,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_vector_id_is_first_16_hex_chars() {
        let hash = ContentHash::of("hello");
        assert_eq!(hash.vector_id().len(), 16);
        assert!(hash.as_str().starts_with(hash.vector_id()));
    }

    #[test]
    fn entity_type_round_trips_through_display_and_from_str() {
        for t in [
            EntityType::Person,
            EntityType::Place,
            EntityType::Event,
            EntityType::Emotion,
            EntityType::Topic,
            EntityType::Product,
        ] {
            let parsed: EntityType = t.to_string().parse().unwrap();
            assert_eq!(parsed, t);
        }
    }

    #[test]
    fn entity_name_key_is_case_insensitive() {
        let a = Entity::first_mention("Hung", EntityType::Person, "2024-01-01");
        let b = Entity::first_mention("hung", EntityType::Person, "2024-01-02");
        assert_eq!(a.name_key(), b.name_key());
    }
}
