use kioku_core::model::Entity;
use std::collections::HashMap;
use storage::graph::GraphIndex;

/// A hit surfaced by the graph leg: `content` is the edge's evidence
/// text, `score` is its weight, `content_hash` is the edge's source hash
/// (used for cross-leg dedup/hydration by the fuser and `Engine`).
#[derive(Debug, Clone, PartialEq)]
pub struct GraphHit {
    pub content: String,
    pub score: f32,
    pub content_hash: String,
}

/// Vietnamese+English stopwords carried over verbatim from the original
/// (`search/graph.py::_STOPWORDS`) since this system's userbase writes
/// Vietnamese-language diary entries.
const STOPWORDS: &[&str] = &[
    "là", "và", "của", "có", "cho", "với", "được", "này", "đó", "các", "một", "những", "trong",
    "để", "từ", "theo", "về", "hay", "hoặc", "nhưng", "mà", "nếu", "khi", "thì", "đã", "sẽ",
    "đang", "rồi", "nào", "gì", "thế", "sao", "tại", "vì", "bị", "do", "qua", "lại", "như", "hơn",
    "nhất", "rất", "quá", "cũng", "vẫn", "còn", "chỉ", "tôi", "anh", "em", "bạn", "mình", "chúng",
    "họ", "ai", "the", "is", "are", "was", "were", "what", "who", "how", "why",
];

const MIN_TOKEN_LEN: usize = 2;
const SEEDS_PER_TOKEN: usize = 3;
const MAX_SEEDS: usize = 5;
const TRAVERSAL_HOPS: u8 = 2;

fn tokenize(query: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut buffer = String::new();
    for ch in query.chars() {
        if ch.is_alphanumeric() {
            buffer.extend(ch.to_lowercase());
        } else if !buffer.is_empty() {
            tokens.push(std::mem::take(&mut buffer));
        }
    }
    if !buffer.is_empty() {
        tokens.push(buffer);
    }
    tokens
}

/// Token-based entity-linking search over the knowledge graph (§4.6),
/// ported from `search/graph.py::graph_search`: tokenize, seed via
/// `search_entities` per token, rank seeds by `mention_count`, traverse
/// each seed to depth 2, dedupe edges by `source_hash`.
pub async fn graph_search(graph: &GraphIndex, query: &str, limit: usize) -> Vec<GraphHit> {
    let meaningful_tokens: Vec<String> = tokenize(query)
        .into_iter()
        .filter(|t| t.len() >= MIN_TOKEN_LEN && !STOPWORDS.contains(&t.as_str()))
        .collect();

    if meaningful_tokens.is_empty() {
        return Vec::new();
    }

    let seed_map = seed_from_tokens(graph, &meaningful_tokens).await;
    traverse_and_dedupe(graph, seed_map, limit).await
}

/// Graph leg seeded directly from caller-supplied entity names rather
/// than tokenizing a query (§4.2's `entities?` override).
pub async fn graph_search_with_seeds(graph: &GraphIndex, seed_names: &[String], limit: usize) -> Vec<GraphHit> {
    if seed_names.is_empty() {
        return Vec::new();
    }

    let seed_map = seed_from_tokens(graph, seed_names).await;
    traverse_and_dedupe(graph, seed_map, limit).await
}

async fn seed_from_tokens(graph: &GraphIndex, names: &[String]) -> HashMap<String, Entity> {
    let mut seed_map: HashMap<String, Entity> = HashMap::new();
    for name in names {
        for entity in graph.search_entities(name, SEEDS_PER_TOKEN).await {
            seed_map.entry(entity.name_key()).or_insert(entity);
        }
    }
    seed_map
}

async fn traverse_and_dedupe(graph: &GraphIndex, seed_map: HashMap<String, Entity>, limit: usize) -> Vec<GraphHit> {
    if seed_map.is_empty() {
        return Vec::new();
    }

    let mut ranked_seeds: Vec<_> = seed_map.into_values().collect();
    ranked_seeds.sort_by(|a, b| b.mention_count.cmp(&a.mention_count));
    ranked_seeds.truncate(MAX_SEEDS);

    let mut seen_hashes = std::collections::HashSet::new();
    let mut results = Vec::new();

    for entity in &ranked_seeds {
        let edges = graph.traverse(&entity.name, TRAVERSAL_HOPS).await;
        for edge in edges {
            let dedup_key = if edge.source_hash.as_str().is_empty() {
                edge.evidence.clone()
            } else {
                edge.source_hash.as_str().to_string()
            };
            if dedup_key.is_empty() || !seen_hashes.insert(dedup_key) {
                continue;
            }
            results.push(GraphHit {
                content: edge.evidence.clone(),
                score: edge.weight,
                content_hash: edge.source_hash.as_str().to_string(),
            });
        }
    }

    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(limit);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use kioku_core::model::{ContentHash, EntityType, Relationship, RelationshipType};

    async fn seeded_graph() -> GraphIndex {
        let dir = tempfile::tempdir().unwrap();
        let graph = GraphIndex::open(dir.path().join("g.wal")).await.unwrap();
        graph
            .upsert_entity("Hanoi", EntityType::Place, "2024-01-01")
            .await
            .unwrap();
        graph
            .upsert_entity("Linh", EntityType::Person, "2024-01-01")
            .await
            .unwrap();
        graph
            .upsert_relationship(Relationship {
                source_name: "Linh".to_string(),
                target_name: "Hanoi".to_string(),
                rel_type: RelationshipType::Topical,
                weight: 0.7,
                evidence: "Linh moved to Hanoi".to_string(),
                event_date: None,
                source_hash: ContentHash::of("Linh moved to Hanoi"),
            })
            .await
            .unwrap();
        graph
    }

    #[tokio::test]
    async fn graph_search_finds_entity_by_token_and_traverses() {
        let graph = seeded_graph().await;
        let results = graph_search(&graph, "Tell me about Hanoi", 10).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "Linh moved to Hanoi");
    }

    #[tokio::test]
    async fn stopword_only_query_returns_empty() {
        let graph = seeded_graph().await;
        let results = graph_search(&graph, "là và của", 10).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn duplicate_edges_are_deduped_by_source_hash() {
        let graph = seeded_graph().await;
        let first = graph_search(&graph, "Hanoi Linh", 10).await;
        assert_eq!(first.len(), 1);
    }

    #[tokio::test]
    async fn seeded_search_finds_entity_without_tokenizing_a_query() {
        let graph = seeded_graph().await;
        let results = graph_search_with_seeds(&graph, &["Linh".to_string()], 10).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "Linh moved to Hanoi");
    }

    #[tokio::test]
    async fn seeded_search_with_no_seeds_returns_empty() {
        let graph = seeded_graph().await;
        let results = graph_search_with_seeds(&graph, &[], 10).await;
        assert!(results.is_empty());
    }
}
