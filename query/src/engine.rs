use crate::dsl::{SearchRequest, SearchValidationError};
use crate::graphsearch::{graph_search, graph_search_with_seeds, GraphHit};
use kioku_core::audit::{AuditEvent, AuditOperation, AuditOutcome, AuditSink};
use kioku_core::embedding::deterministic_embedding;
use kioku_core::error::KiokuError;
use kioku_core::metrics::MetricsCollector;
use kioku_core::model::Entity;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use storage::fuser::{rrf_rerank, FusableResult};
use storage::graph::GraphIndex;
use storage::keyword::{KeywordIndex, TimelineSort};
use storage::vector::VectorIndex;

const RRF_K: u32 = 60;
const FAN_OUT_MULTIPLIER: usize = 3;
const METRICS_HISTORY: usize = 200;

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub content: String,
    pub date: Option<String>,
    pub mood: Option<String>,
    pub score: f32,
    pub source: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub count: usize,
    pub results: Vec<SearchHit>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityNode {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub mention_count: u32,
    pub first_seen: String,
    pub last_seen: String,
}

impl From<&Entity> for EntityNode {
    fn from(e: &Entity) -> Self {
        Self {
            name: e.name.clone(),
            entity_type: e.entity_type.to_string(),
            mention_count: e.mention_count,
            first_seen: e.first_seen.clone(),
            last_seen: e.last_seen.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RelationshipEdge {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub rel_type: String,
    pub weight: f32,
    pub evidence: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecallResponse {
    pub entity: String,
    pub connected_count: usize,
    pub nodes: Vec<EntityNode>,
    pub relationships: Vec<RelationshipEdge>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionEvidence {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub rel_type: String,
    pub evidence: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExplainResponse {
    pub from: String,
    pub to: String,
    pub connected: bool,
    pub paths: Vec<Vec<String>>,
    pub nodes: Vec<EntityNode>,
    pub evidence: Vec<ConnectionEvidence>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListDatesResponse {
    pub count: usize,
    pub dates: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListEntitiesResponse {
    pub count: usize,
    pub entities: Vec<EntityNode>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    pub content_hash: String,
    pub text: String,
    pub date: String,
    pub timestamp: String,
    pub mood: Option<String>,
    pub tags: Vec<String>,
    pub event_date: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineResponse {
    pub count: usize,
    pub timeline: Vec<TimelineEntry>,
    pub sort_by: TimelineSort,
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("invalid search request: {0}")]
    InvalidRequest(#[from] SearchValidationError),
    #[error(transparent)]
    Backend(#[from] KiokuError),
}

/// Fans a query out across the three indices and fuses the result with
/// Reciprocal Rank Fusion (§4.2, §4.7). Holds no state of its own beyond
/// the three index handles, the embedding identity used for the vector
/// leg, and the per-leg timeout budget (§5) — each leg degrades to an
/// empty result on timeout or error rather than failing the whole search.
pub struct Engine {
    keyword: Arc<KeywordIndex>,
    vector: Arc<VectorIndex>,
    graph: Arc<GraphIndex>,
    embedding_model_id: String,
    embedding_dims: usize,
    audit: Option<Arc<dyn AuditSink>>,
    keyword_timeout: Duration,
    vector_timeout: Duration,
    graph_timeout: Duration,
    metrics: Arc<MetricsCollector>,
}

impl Engine {
    pub fn new(
        keyword: Arc<KeywordIndex>,
        vector: Arc<VectorIndex>,
        graph: Arc<GraphIndex>,
        embedding_model_id: impl Into<String>,
        embedding_dims: usize,
    ) -> Self {
        Self {
            keyword,
            vector,
            graph,
            embedding_model_id: embedding_model_id.into(),
            embedding_dims,
            audit: None,
            keyword_timeout: Duration::from_millis(1_000),
            vector_timeout: Duration::from_millis(2_000),
            graph_timeout: Duration::from_millis(2_000),
            metrics: Arc::new(MetricsCollector::new(METRICS_HISTORY)),
        }
    }

    /// Latency percentiles and per-leg hit rates accumulated across every
    /// `search` call (§7's ambient metrics).
    pub fn metrics(&self) -> kioku_core::metrics::MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn with_timeouts(mut self, keyword: Duration, vector: Duration, graph: Duration) -> Self {
        self.keyword_timeout = keyword;
        self.vector_timeout = vector;
        self.graph_timeout = graph;
        self
    }

    fn record_search(&self, outcome: AuditOutcome) {
        if let Some(sink) = &self.audit {
            let mut event = AuditEvent::new(AuditOperation::Search, outcome);
            event.model_id = Some(self.embedding_model_id.clone());
            let _ = sink.record(event);
        }
    }

    /// Tri-hybrid search (§4.2): keyword, vector and graph legs run
    /// concurrently, each capped at its own timeout and fanned out to
    /// `limit * 3` candidates before fusion narrows back to `limit`. When
    /// `entities` is supplied, the graph leg seeds directly from them
    /// instead of tokenizing `query`, the keyword leg searches their
    /// space-joined names instead of the stripped query, and the vector
    /// leg is post-filtered to hits whose hydrated content contains one
    /// of them (case-insensitive) — §4.2's `entities?` override.
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse, QueryError> {
        request.validate()?;
        let started_at = Instant::now();

        let fan_out = request.limit * FAN_OUT_MULTIPLIER;
        let clean_query = match &request.entities {
            Some(entities) => entities.join(" "),
            None => strip_punctuation(&request.query),
        };
        let query_embedding =
            deterministic_embedding(&request.query, &self.embedding_model_id, self.embedding_dims);

        let (keyword_hits, vector_hits, graph_hits) = tokio::join!(
            timeout_or_empty(self.keyword_timeout, self.keyword.search(&clean_query, fan_out)),
            timeout_or_empty(self.vector_timeout, self.vector.search(&query_embedding, fan_out)),
            async {
                tokio::time::timeout(
                    self.graph_timeout,
                    graph_leg(&self.graph, &request.query, request.entities.as_deref(), fan_out),
                )
                .await
                .unwrap_or_default()
            },
        );

        self.metrics.record_legs(
            !keyword_hits.is_empty(),
            !vector_hits.is_empty(),
            !graph_hits.is_empty(),
        );

        let mut hydration: std::collections::HashMap<String, SearchHit> = std::collections::HashMap::new();
        let mut keyword_list = Vec::new();
        for hit in &keyword_hits {
            keyword_list.push(FusableResult {
                key: hit.content_hash.clone(),
                score: hit.score,
            });
            hydration.entry(hit.content_hash.clone()).or_insert(SearchHit {
                content: hit.text.clone(),
                date: Some(hit.date.clone()),
                mood: hit.mood.clone(),
                score: 0.0,
                source: "keyword",
            });
        }

        let mut vector_list = Vec::new();
        for hit in &vector_hits {
            if !hydration.contains_key(&hit.id) {
                if let Ok(Some(entry)) = self.keyword.get_by_hash(&hit.id).await {
                    hydration.insert(
                        hit.id.clone(),
                        SearchHit {
                            content: entry.text,
                            date: Some(entry.date),
                            mood: entry.mood,
                            score: 0.0,
                            source: "vector",
                        },
                    );
                }
            }

            if let Some(entities) = &request.entities {
                let matches = hydration
                    .get(&hit.id)
                    .map(|hydrated| {
                        let content = hydrated.content.to_lowercase();
                        entities.iter().any(|e| content.contains(&e.to_lowercase()))
                    })
                    .unwrap_or(false);
                if !matches {
                    continue;
                }
            }

            vector_list.push(FusableResult {
                key: hit.id.clone(),
                score: hit.similarity(),
            });
        }

        let mut graph_list = Vec::new();
        for hit in &graph_hits {
            graph_list.push(FusableResult {
                key: hit.content_hash.clone(),
                score: hit.score,
            });
            hydration.entry(hit.content_hash.clone()).or_insert(SearchHit {
                content: hit.content.clone(),
                date: None,
                mood: None,
                score: 0.0,
                source: "graph",
            });
        }

        let fused = rrf_rerank(&[keyword_list, vector_list, graph_list], RRF_K, request.limit);

        let mut results: Vec<SearchHit> = fused
            .into_iter()
            .filter_map(|(key, score)| {
                hydration.get(&key).map(|hit| SearchHit {
                    content: hit.content.clone(),
                    date: hit.date.clone(),
                    mood: hit.mood.clone(),
                    score,
                    source: hit.source,
                })
            })
            .collect();

        // A result with no known date passes the window unfiltered (§4.2
        // step 4): graph-leg hits have no date until hydrated, and not
        // every hit hydrates successfully.
        if request.date_from.is_some() || request.date_to.is_some() {
            results.retain(|hit| match &hit.date {
                Some(date) => {
                    request.date_from.as_ref().map_or(true, |from| date >= from)
                        && request.date_to.as_ref().map_or(true, |to| date <= to)
                }
                None => true,
            });
        }

        self.record_search(AuditOutcome::Succeeded);
        self.metrics.record_query(started_at.elapsed().as_micros() as u64);

        Ok(SearchResponse {
            query: request.query,
            count: results.len(),
            results,
        })
    }

    /// Everything connected to `entity` within `max_hops` (§4.5).
    pub async fn recall_related(&self, entity: &str, max_hops: u8, limit: usize) -> RecallResponse {
        let (mut nodes, mut relationships) = self.graph.traverse_with_entities(entity, max_hops).await;
        nodes.truncate(limit.max(1));
        relationships.truncate(limit.max(1) * FAN_OUT_MULTIPLIER);

        RecallResponse {
            entity: entity.to_string(),
            connected_count: nodes.len(),
            nodes: nodes.iter().map(EntityNode::from).collect(),
            relationships: relationships
                .iter()
                .map(|r| RelationshipEdge {
                    source: r.source_name.clone(),
                    target: r.target_name.clone(),
                    rel_type: r.rel_type.to_string(),
                    weight: r.weight,
                    evidence: r.evidence.clone(),
                })
                .collect(),
        }
    }

    /// Shortest path between two entities, directed-first with an
    /// undirected fallback (ported via `GraphIndex::find_path`).
    pub async fn explain_connection(&self, entity_a: &str, entity_b: &str) -> ExplainResponse {
        let path = self.graph.find_path(entity_a, entity_b).await;

        let (paths, nodes, evidence) = match &path {
            Some(edges) if !edges.is_empty() => {
                let mut chain = vec![edges[0].source_name.clone()];
                for edge in edges {
                    chain.push(edge.target_name.clone());
                }

                let mut seen = std::collections::HashSet::new();
                let mut nodes = Vec::new();
                for name in &chain {
                    if seen.insert(name.to_lowercase()) {
                        if let Some(entity) = self.graph.search_entities(name, 1).await.into_iter().next() {
                            nodes.push(EntityNode::from(&entity));
                        }
                    }
                }

                let evidence = edges
                    .iter()
                    .map(|e| ConnectionEvidence {
                        source: e.source_name.clone(),
                        target: e.target_name.clone(),
                        rel_type: e.rel_type.to_string(),
                        evidence: e.evidence.clone(),
                    })
                    .collect();

                (vec![chain], nodes, evidence)
            }
            _ => (Vec::new(), Vec::new(), Vec::new()),
        };

        ExplainResponse {
            from: entity_a.to_string(),
            to: entity_b.to_string(),
            connected: !paths.is_empty(),
            paths,
            nodes,
            evidence,
        }
    }

    /// Top canonical entities by `mention_count` (§4.2's `list_entities`).
    pub async fn list_entities(&self, limit: usize) -> ListEntitiesResponse {
        let entities = self.graph.get_canonical_entities(limit).await;
        ListEntitiesResponse {
            count: entities.len(),
            entities: entities.iter().map(EntityNode::from).collect(),
        }
    }

    pub async fn list_dates(&self) -> Result<ListDatesResponse, QueryError> {
        let dates = self.keyword.get_dates().await?;
        Ok(ListDatesResponse { count: dates.len(), dates })
    }

    pub async fn get_timeline(
        &self,
        start_date: Option<&str>,
        end_date: Option<&str>,
        limit: usize,
        sort_by: TimelineSort,
    ) -> Result<TimelineResponse, QueryError> {
        let entries = self.keyword.get_timeline(start_date, end_date, limit, sort_by).await?;
        let timeline = entries
            .into_iter()
            .map(|e| TimelineEntry {
                content_hash: e.content_hash,
                text: e.text,
                date: e.date,
                timestamp: e.timestamp,
                mood: e.mood,
                tags: e.tags,
                event_date: e.event_date,
            })
            .collect::<Vec<_>>();
        Ok(TimelineResponse { count: timeline.len(), timeline, sort_by })
    }
}

/// Dispatches the graph leg to the token-tokenized search or, when
/// `entities` is supplied, directly to the entity-seeded search (§4.2's
/// `entities?` override).
async fn graph_leg(graph: &GraphIndex, query: &str, entities: Option<&[String]>, limit: usize) -> Vec<GraphHit> {
    match entities {
        Some(entities) => graph_search_with_seeds(graph, entities, limit).await,
        None => graph_search(graph, query, limit).await,
    }
}

async fn timeout_or_empty<T, E>(
    duration: Duration,
    future: impl std::future::Future<Output = Result<Vec<T>, E>>,
) -> Vec<T> {
    match tokio::time::timeout(duration, future).await {
        Ok(Ok(hits)) => hits,
        Ok(Err(_)) | Err(_) => Vec::new(),
    }
}

/// Mirrors `service.py`'s `re.sub(r"[^\w\s]", " ", query)`: replaces
/// anything that isn't a word character or whitespace with a space, so
/// punctuation never confuses the FTS5 query parser.
fn strip_punctuation(query: &str) -> String {
    query
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() || c == '_' { c } else { ' ' })
        .collect()
}
