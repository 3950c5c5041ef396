use kioku_core::config::{KiokuConfig, VectorMode};
use kioku_sdk::Service;
use query::SearchRequest;
use tempfile::tempdir;

async fn test_service(dir: &std::path::Path) -> Service {
    let mut config = KiokuConfig::default();
    config.memory_dir = Some(dir.join("memory"));
    config.data_dir = Some(dir.join("data"));
    config.chroma_mode = VectorMode::Embedded;
    config.chroma_persist_dir = Some(dir.join("chroma"));
    Service::new(&config).await.unwrap()
}

/// SA: a Vietnamese entry with a stressed mood is saved and then found
/// by a lexical search on a substring of its content.
#[tokio::test]
async fn scenario_sa_save_and_search_vietnamese_entry() {
    let dir = tempdir().unwrap();
    let service = test_service(dir.path()).await;

    service
        .save(
            "Hôm nay họp với Hùng về dự án X, stressed",
            Some("stressed".to_string()),
            vec![],
        )
        .await
        .unwrap();

    let response = service.search(SearchRequest::new("dự án X")).await.unwrap();
    assert!(response.count >= 1);
    assert!(response.results.iter().any(|r| r.content.contains("dự án X")));
    assert!(response
        .results
        .iter()
        .all(|r| ["keyword", "vector", "graph"].contains(&r.source)));
}

/// SB: an entry mentioning a person and an emotion produces a graph
/// relationship discoverable via `recall_related`.
#[tokio::test]
async fn scenario_sb_save_and_recall_related() {
    let dir = tempdir().unwrap();
    let service = test_service(dir.path()).await;

    service.save("Hung lam toi stressed", None, vec![]).await.unwrap();

    let recall = service.recall_related("Hung", 2, 10).await;
    assert!(recall.connected_count >= 1);
    assert!(recall
        .relationships
        .iter()
        .any(|r| r.source.to_lowercase().contains("hung")));
}

/// SC: a transitive A-knows-B, B-knows-C chain is found as a single path
/// by `explain_connection`.
#[tokio::test]
async fn scenario_sc_explain_connection_finds_transitive_path() {
    let dir = tempdir().unwrap();
    let service = test_service(dir.path()).await;

    service.save("A knows B", None, vec![]).await.unwrap();
    service.save("B knows C", None, vec![]).await.unwrap();

    let explain = service.explain_connection("A", "C").await;
    assert!(explain.connected);
    assert_eq!(explain.paths, vec![vec!["A".to_string(), "B".to_string(), "C".to_string()]]);
}

/// SE: saving identical text twice is a no-op the second time, not an
/// error, and leaves exactly one indexed row.
#[tokio::test]
async fn scenario_se_duplicate_save_is_idempotent() {
    let dir = tempdir().unwrap();
    let service = test_service(dir.path()).await;

    service.save("x", None, vec![]).await.unwrap();
    service.save("x", None, vec![]).await.unwrap();

    let dates = service.list_memory_dates().await.unwrap();
    assert_eq!(dates.count, 1);
}

/// Invariant 1: a successful save is always found by a later search on
/// its own text.
#[tokio::test]
async fn invariant_saved_entry_is_found_by_search_on_its_own_text() {
    let dir = tempdir().unwrap();
    let service = test_service(dir.path()).await;

    let text = "an entirely unique diary sentence about kayaking";
    service.save(text, None, vec![]).await.unwrap();

    let response = service.search(SearchRequest::new(text)).await.unwrap();
    assert!(response.results.iter().any(|r| r.content == text));
}

/// Invariant 7: entity identity is case-insensitive; re-mentioning the
/// same person under a different case increments one node, not two.
#[tokio::test]
async fn invariant_entity_identity_is_case_insensitive() {
    let dir = tempdir().unwrap();
    let service = test_service(dir.path()).await;

    service.save("Hung went to the market", None, vec![]).await.unwrap();
    service.save("hung came back late", None, vec![]).await.unwrap();

    let entities = service.list_entities(50).await;
    let hung_nodes: Vec<_> = entities
        .entities
        .iter()
        .filter(|e| e.name.to_lowercase() == "hung")
        .collect();
    assert_eq!(hung_nodes.len(), 1);
    assert_eq!(hung_nodes[0].mention_count, 2);
}
