use chrono::{FixedOffset, Utc};
use kioku_core::audit::{AuditEvent, AuditOperation, AuditOutcome, AuditSink};
use kioku_core::config::{KiokuConfig, VectorMode};
use kioku_core::embedding::deterministic_embedding;
use kioku_core::error::KiokuError;
use kioku_core::model::{ContentHash, MemoryEntry, Relationship};
use query::{
    Engine, ExplainResponse, ListDatesResponse, ListEntitiesResponse, QueryError, RecallResponse,
    SearchRequest, SearchResponse, TimelineResponse, TimelineSort,
};
use serde::Serialize;
use slm::{from_config, Extractor};
use std::sync::Arc;
use storage::graph::GraphIndex;
use storage::keyword::KeywordIndex;
use storage::markdown::MarkdownLog;
use storage::vector::VectorIndex;
use thiserror::Error;
use tracing::{info, warn};

const EMBEDDING_MODEL_ID: &str = "embedding-default-v1";
const EMBEDDING_DIMS: usize = 256;
const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-haiku-20240307";
const EXTRACTION_CONTEXT_LIMIT: usize = 50;

/// Fixed `+07:00` offset, matching the original's `JST = timezone(timedelta(hours=7))`.
fn local_offset() -> FixedOffset {
    FixedOffset::east_opt(7 * 3600).expect("valid fixed offset")
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Backend(#[from] KiokuError),
    #[error(transparent)]
    Query(#[from] QueryError),
}

#[derive(Debug, Clone, Serialize)]
pub struct SaveResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub processing_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_date: Option<String>,
}

/// Single source of truth for Kioku's business logic, shared by any RPC
/// surface (MCP server, CLI) built on top of this crate. Construction
/// mirrors the original `KiokuService.__init__`'s fallback ladder: each
/// backend is probed and falls back to an in-process stand-in rather
/// than failing the whole service when an external dependency is
/// unavailable.
pub struct Service {
    memory_dir: std::path::PathBuf,
    markdown: MarkdownLog,
    keyword: Arc<KeywordIndex>,
    vector: Arc<VectorIndex>,
    graph: Arc<GraphIndex>,
    extractor: Box<dyn Extractor>,
    engine: Engine,
    audit: Option<Arc<dyn AuditSink>>,
    extractor_timeout: std::time::Duration,
}

impl Service {
    /// Builds every backend from `config`, falling back to the
    /// in-process variant wherever the real one isn't reachable (§7's
    /// fallback ladder). This crate has no HTTP Ollama client and no
    /// FalkorDB client, so the embedder and graph legs always resolve to
    /// their deterministic/in-process forms; only the vector store's
    /// server/embedded/auto dispatch and the extractor's Claude/fake
    /// choice vary with configuration.
    pub async fn new(config: &KiokuConfig) -> Result<Self, ServiceError> {
        config.ensure_dirs().map_err(|e| KiokuError::Backend(e.to_string()))?;

        let memory_dir = config
            .memory_dir
            .clone()
            .unwrap_or_else(|| std::path::PathBuf::from("."));
        let markdown = MarkdownLog::new(memory_dir.clone());

        let keyword = Arc::new(KeywordIndex::open(config.sqlite_path())?);

        let vector = Arc::new(match config.chroma_mode {
            VectorMode::Server => {
                info!("using remote vector store stub ({}:{})", config.chroma_host, config.chroma_port);
                VectorIndex::server_stub()
            }
            VectorMode::Embedded => {
                let dir = config
                    .chroma_persist_dir
                    .clone()
                    .unwrap_or_else(|| std::path::PathBuf::from("."));
                VectorIndex::embedded(dir).await?
            }
            VectorMode::Auto => {
                let dir = config
                    .chroma_persist_dir
                    .clone()
                    .unwrap_or_else(|| std::path::PathBuf::from("."));
                VectorIndex::open_auto(dir).await
            }
        });

        let data_dir = config
            .data_dir
            .clone()
            .unwrap_or_else(|| std::path::PathBuf::from("."));
        let graph = Arc::new(GraphIndex::open(data_dir.join(format!("{}.wal", config.falkordb_graph()))).await?);

        let extractor = match config.anthropic_api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => {
                info!("using Claude extractor for entity extraction");
                from_config(Some(key), DEFAULT_ANTHROPIC_MODEL)
            }
            _ => {
                warn!("no Anthropic API key, using rule-based extractor");
                from_config(None, DEFAULT_ANTHROPIC_MODEL)
            }
        };

        let engine = Engine::new(
            keyword.clone(),
            vector.clone(),
            graph.clone(),
            EMBEDDING_MODEL_ID,
            EMBEDDING_DIMS,
        )
        .with_timeouts(config.keyword_timeout(), config.vector_timeout(), config.graph_timeout());

        Ok(Self {
            memory_dir,
            markdown,
            keyword,
            vector,
            graph,
            extractor,
            engine,
            audit: None,
            extractor_timeout: config.extractor_timeout(),
        })
    }

    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.engine = self.engine.with_audit(sink.clone());
        self.audit = Some(sink);
        self
    }

    fn record_save(&self, outcome: AuditOutcome) {
        if let Some(sink) = &self.audit {
            let _ = sink.record(AuditEvent::new(AuditOperation::Save, outcome));
        }
    }

    /// Write path (§4.1): markdown append is the one step that is never
    /// swallowed — it is the recovery anchor every other index can be
    /// rebuilt from. Extraction, graph upsert and vector indexing each
    /// degrade silently on failure so a slow or unavailable backend
    /// never loses the entry itself.
    pub async fn save(
        &self,
        text: &str,
        mood: Option<String>,
        tags: Vec<String>,
    ) -> Result<SaveResponse, ServiceError> {
        let now = Utc::now().with_timezone(&local_offset());
        let timestamp = now.to_rfc3339();
        let processing_date = now.format("%Y-%m-%d").to_string();
        let content_hash = ContentHash::of(text);

        let context_entities: Vec<String> = self
            .graph
            .get_canonical_entities(EXTRACTION_CONTEXT_LIMIT)
            .await
            .into_iter()
            .map(|e| e.name)
            .collect();

        let extraction = match tokio::time::timeout(
            self.extractor_timeout,
            self.extractor.extract(text, &context_entities),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!("entity extraction timed out, continuing with empty extraction");
                Default::default()
            }
        };

        let event_date = extraction.event_date.clone();

        if !extraction.entities.is_empty() || !extraction.relationships.is_empty() {
            for entity in &extraction.entities {
                if let Err(e) = self
                    .graph
                    .upsert_entity(&entity.name, entity.entity_type, &processing_date)
                    .await
                {
                    warn!(error = %e, "graph entity upsert failed");
                }
            }
            for rel in &extraction.relationships {
                if let Err(e) = self
                    .graph
                    .upsert_relationship(Relationship {
                        source_name: rel.source.clone(),
                        target_name: rel.target.clone(),
                        rel_type: rel.rel_type,
                        weight: rel.weight,
                        evidence: rel.evidence.clone(),
                        event_date: event_date.clone(),
                        source_hash: content_hash.clone(),
                    })
                    .await
                {
                    warn!(error = %e, "graph relationship upsert failed");
                }
            }
            info!(
                entities = extraction.entities.len(),
                relationships = extraction.relationships.len(),
                "extracted knowledge from entry"
            );
        }

        let entry = MemoryEntry::new(
            text,
            timestamp.clone(),
            processing_date.clone(),
            event_date.clone(),
            mood.clone(),
            tags.clone(),
        );

        if let Err(e) = self.markdown.append(&entry).await {
            self.record_save(AuditOutcome::Failed);
            return Err(e.into());
        }

        if let Err(e) = self.keyword.index(&entry).await {
            warn!(error = %e, "keyword indexing failed");
        }

        let embedding = deterministic_embedding(text, EMBEDDING_MODEL_ID, EMBEDDING_DIMS);
        if let Err(e) = self.vector.add(content_hash.as_str(), embedding).await {
            warn!(error = %e, "vector indexing failed");
        }

        self.record_save(AuditOutcome::Succeeded);

        Ok(SaveResponse {
            status: "saved",
            timestamp,
            processing_date,
            event_date,
        })
    }

    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse, ServiceError> {
        Ok(self.engine.search(request).await?)
    }

    pub async fn recall_related(&self, entity: &str, max_hops: u8, limit: usize) -> RecallResponse {
        self.engine.recall_related(entity, max_hops, limit).await
    }

    pub async fn explain_connection(&self, entity_a: &str, entity_b: &str) -> ExplainResponse {
        self.engine.explain_connection(entity_a, entity_b).await
    }

    pub async fn list_entities(&self, limit: usize) -> ListEntitiesResponse {
        self.engine.list_entities(limit).await
    }

    pub async fn list_memory_dates(&self) -> Result<ListDatesResponse, ServiceError> {
        Ok(self.engine.list_dates().await?)
    }

    pub async fn get_timeline(
        &self,
        start_date: Option<&str>,
        end_date: Option<&str>,
        limit: usize,
        sort_by: TimelineSort,
    ) -> Result<TimelineResponse, ServiceError> {
        Ok(self.engine.get_timeline(start_date, end_date, limit, sort_by).await?)
    }

    pub async fn read_memory_resource(&self, date: &str) -> Result<String, ServiceError> {
        let content = self.markdown.read_date(date).await?;
        Ok(crate::resources::memory_resource_text(date, content))
    }

    /// Renders a markdown profile from a 2-hop traversal around `entity`
    /// (§9's supplemented resource surface), grounded on `service.py::
    /// read_entity_resource`.
    pub async fn read_entity_resource(&self, entity: &str) -> String {
        let (nodes, edges) = self.graph.traverse_with_entities(entity, 2).await;
        crate::resources::entity_profile_text(entity, &nodes, &edges)
    }

    pub fn reflect_on_day(&self) -> String {
        crate::prompts::reflect_on_day(&local_offset())
    }

    pub fn analyze_relationships(&self, entity_name: &str) -> String {
        crate::prompts::analyze_relationships(entity_name)
    }

    pub fn weekly_review(&self) -> String {
        crate::prompts::weekly_review(&local_offset())
    }

    /// No store held by this crate needs an explicit close; kept as a
    /// no-op entry point so callers ported from the original's
    /// SQLite-connection teardown have somewhere to call.
    pub fn close(&self) {}

    pub fn memory_dir(&self) -> &std::path::Path {
        &self.memory_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn test_config(dir: &std::path::Path) -> KiokuConfig {
        let mut cfg = KiokuConfig::default();
        cfg.memory_dir = Some(dir.join("memory"));
        cfg.data_dir = Some(dir.join("data"));
        cfg.chroma_mode = VectorMode::Embedded;
        cfg.chroma_persist_dir = Some(dir.join("chroma"));
        cfg
    }

    #[tokio::test]
    async fn save_appends_markdown_and_indexes_for_search() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path()).await;
        let service = Service::new(&config).await.unwrap();

        let response = service
            .save("Had coffee with Linh in Hanoi", Some("happy".to_string()), vec![])
            .await
            .unwrap();
        assert_eq!(response.status, "saved");

        let content = service.read_memory_resource(&response.processing_date).await.unwrap();
        assert!(content.contains("Had coffee with Linh"));

        let found = service
            .search(SearchRequest::new("coffee"))
            .await
            .unwrap();
        assert_eq!(found.count, 1);
    }

    #[tokio::test]
    async fn save_is_idempotent_on_duplicate_text() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path()).await;
        let service = Service::new(&config).await.unwrap();

        service.save("same text twice", None, vec![]).await.unwrap();
        service.save("same text twice", None, vec![]).await.unwrap();

        let dates = service.list_memory_dates().await.unwrap();
        assert_eq!(dates.count, 1);
    }

    #[tokio::test]
    async fn read_memory_resource_reports_sentinel_when_absent() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path()).await;
        let service = Service::new(&config).await.unwrap();

        let content = service.read_memory_resource("2099-01-01").await.unwrap();
        assert!(content.starts_with("No memories found"));
    }

    #[tokio::test]
    async fn read_entity_resource_reports_sentinel_when_unknown() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path()).await;
        let service = Service::new(&config).await.unwrap();

        let content = service.read_entity_resource("Nobody").await;
        assert!(content.contains("not found"));
    }
}
