use async_trait::async_trait;
use kioku_core::model::{EntityType, RelationshipType};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedEntity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedRelationship {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub rel_type: RelationshipType,
    pub weight: f32,
    pub evidence: String,
}

/// Result of extracting structured knowledge from one entry's text. Empty
/// on failure — extraction failures degrade gracefully, never aborting
/// the write path (§4.1, §7).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ExtractionResult {
    pub entities: Vec<ExtractedEntity>,
    pub relationships: Vec<ExtractedRelationship>,
    /// YYYY-MM-DD, when the text refers to an event on a specific date
    /// distinct from when it was written.
    pub event_date: Option<String>,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, text: &str, context_entities: &[String]) -> ExtractionResult;
}

const EXTRACTION_PROMPT_TEMPLATE: &str = r#"Extract entities and relationships from the journal entry below.

Known entities (for disambiguation): {context_entities}

Entry:
{text}

Respond with a single JSON object:
{{"entities": [{{"name": "...", "type": "PERSON|PLACE|EVENT|EMOTION|TOPIC|PRODUCT"}}],
  "relationships": [{{"source": "...", "target": "...", "type": "CAUSAL|EMOTIONAL|TEMPORAL|TOPICAL|INVOLVES", "weight": 0.0-1.0, "evidence": "..."}}],
  "event_date": "YYYY-MM-DD or null"}}"#;

fn build_prompt(text: &str, context_entities: &[String]) -> String {
    EXTRACTION_PROMPT_TEMPLATE
        .replace("{text}", text)
        .replace("{context_entities}", &context_entities.join(", "))
}

/// Strips a fenced code block, if present, then locates the outermost
/// `{`/`}` pair before parsing — lenient the way a chat model's reply
/// tends to wrap JSON in prose or markdown fencing.
fn parse_extraction_response(raw: &str) -> Option<ExtractionResult> {
    let candidate = if let Some(fence_start) = raw.find("```") {
        let after = &raw[fence_start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        match after.find("```") {
            Some(fence_end) => after[..fence_end].trim(),
            None => after.trim(),
        }
    } else {
        raw.trim()
    };

    let start = candidate.find('{')?;
    let end = candidate.rfind('}')?;
    if end <= start {
        return None;
    }

    serde_json::from_str(&candidate[start..=end]).ok()
}

/// Calls a chat-completions-style HTTP endpoint (Anthropic Messages API
/// by default) and parses the structured JSON reply. Falls back to an
/// empty extraction on any transport or parse failure.
pub struct LlmExtractor {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl LlmExtractor {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl Extractor for LlmExtractor {
    async fn extract(&self, text: &str, context_entities: &[String]) -> ExtractionResult {
        let prompt = build_prompt(text, context_entities);

        let response = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&serde_json::json!({
                "model": self.model,
                "max_tokens": 1024,
                "messages": [{"role": "user", "content": prompt}],
            }))
            .send()
            .await;

        let body = match response {
            Ok(resp) => match resp.json::<serde_json::Value>().await {
                Ok(body) => body,
                Err(e) => {
                    warn!(error = %e, "extractor: failed to decode response body");
                    return ExtractionResult::default();
                }
            },
            Err(e) => {
                warn!(error = %e, "extractor: request failed");
                return ExtractionResult::default();
            }
        };

        let text_reply = body
            .get("content")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("text"))
            .and_then(|t| t.as_str())
            .unwrap_or("");

        parse_extraction_response(text_reply).unwrap_or_else(|| {
            warn!("extractor: could not parse a JSON extraction from the model reply");
            ExtractionResult::default()
        })
    }
}

const EMOTION_KEYWORDS: &[(&str, &str)] = &[
    ("happy", "joy"),
    ("sad", "sadness"),
    ("angry", "anger"),
    ("anxious", "anxiety"),
    ("excited", "excitement"),
    ("tired", "fatigue"),
    ("grateful", "gratitude"),
    ("stressed", "stress"),
];

fn stopwords() -> HashSet<&'static str> {
    [
        "The", "A", "An", "I", "My", "It", "This", "That", "We", "He", "She", "They", "You",
    ]
    .into_iter()
    .collect()
}

/// Deterministic, dependency-free stand-in for the LLM extractor: a
/// capitalized-word heuristic for person names plus a fixed emotion
/// keyword table, matching the original's `FakeExtractor`.
pub struct FakeExtractor;

#[async_trait]
impl Extractor for FakeExtractor {
    async fn extract(&self, text: &str, _context_entities: &[String]) -> ExtractionResult {
        let stop = stopwords();
        let mut entities = Vec::new();
        let mut seen_people = HashSet::new();

        for word in text.split_whitespace() {
            let cleaned: String = word.chars().filter(|c| c.is_alphanumeric()).collect();
            if cleaned.len() < 2 || stop.contains(cleaned.as_str()) {
                continue;
            }
            if cleaned.chars().next().map(|c| c.is_uppercase()).unwrap_or(false)
                && seen_people.insert(cleaned.clone())
            {
                entities.push(ExtractedEntity {
                    name: cleaned,
                    entity_type: EntityType::Person,
                });
            }
        }

        let lower = text.to_lowercase();
        let mut relationships = Vec::new();
        for (keyword, emotion) in EMOTION_KEYWORDS {
            if lower.contains(keyword) {
                entities.push(ExtractedEntity {
                    name: emotion.to_string(),
                    entity_type: EntityType::Emotion,
                });
                for person in &seen_people {
                    relationships.push(ExtractedRelationship {
                        source: person.clone(),
                        target: emotion.to_string(),
                        rel_type: RelationshipType::Emotional,
                        weight: 0.6,
                        evidence: text.chars().take(100).collect(),
                    });
                }
            }
        }

        ExtractionResult {
            entities,
            relationships,
            event_date: None,
        }
    }
}

/// Selects the extractor variant from configuration — a closed set, so a
/// plain constructor rather than a versioned registry (see DESIGN.md).
pub fn from_config(anthropic_api_key: Option<&str>, model: &str) -> Box<dyn Extractor> {
    match anthropic_api_key {
        Some(key) if !key.trim().is_empty() => Box::new(LlmExtractor::new(key, model)),
        _ => Box::new(FakeExtractor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_extractor_finds_capitalized_names_and_emotions() {
        let extractor = FakeExtractor;
        let result = extractor
            .extract("Alice felt happy after seeing Bob", &[])
            .await;

        assert!(result.entities.iter().any(|e| e.name == "Alice"));
        assert!(result.entities.iter().any(|e| e.name == "Bob"));
        assert!(result
            .entities
            .iter()
            .any(|e| e.entity_type == EntityType::Emotion && e.name == "joy"));
        assert!(!result.relationships.is_empty());
    }

    #[test]
    fn parse_extraction_response_handles_fenced_and_bare_json() {
        let fenced = "```json\n{\"entities\":[],\"relationships\":[],\"event_date\":null}\n```";
        assert!(parse_extraction_response(fenced).is_some());

        let bare = "Sure, here it is: {\"entities\":[],\"relationships\":[],\"event_date\":null} thanks";
        assert!(parse_extraction_response(bare).is_some());

        let garbage = "no json here at all";
        assert!(parse_extraction_response(garbage).is_none());
    }

    #[tokio::test]
    async fn from_config_falls_back_to_fake_without_api_key() {
        let extractor = from_config(None, "claude-haiku");
        let result = extractor.extract("hello", &[]).await;
        assert_eq!(result, ExtractionResult::default());
    }
}
