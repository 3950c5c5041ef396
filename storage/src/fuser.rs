use std::collections::HashMap;

/// A single search result from any leg (keyword/vector/graph), carrying
/// enough to fuse and then hydrate. `key` is the content hash (or, for
/// graph-leg results with no content hash, the evidence string) used to
/// dedupe the same memory surfaced by multiple legs.
#[derive(Debug, Clone, PartialEq)]
pub struct FusableResult {
    pub key: String,
    pub score: f32,
}

/// Reciprocal Rank Fusion across an arbitrary number of ranked lists.
/// Ported from `search/reranker.py::rrf_rerank`: each list contributes
/// `1 / (k + rank + 1)` per item by rank position (not by raw score), so
/// lists with incomparable scoring scales still combine fairly.
pub fn rrf_rerank(result_lists: &[Vec<FusableResult>], k: u32, limit: usize) -> Vec<(String, f32)> {
    let mut scores: HashMap<String, f32> = HashMap::new();
    let mut first_seen: HashMap<String, usize> = HashMap::new();
    let mut order = 0usize;

    for list in result_lists {
        for (rank, item) in list.iter().enumerate() {
            let contribution = 1.0 / (k as f32 + rank as f32 + 1.0);
            *scores.entry(item.key.clone()).or_insert(0.0) += contribution;
            first_seen.entry(item.key.clone()).or_insert_with(|| {
                let seen_at = order;
                order += 1;
                seen_at
            });
        }
    }

    let mut ranked: Vec<(String, f32)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| first_seen[&a.0].cmp(&first_seen[&b.0]))
    });
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(keys: &[&str]) -> Vec<FusableResult> {
        keys.iter()
            .map(|k| FusableResult {
                key: k.to_string(),
                score: 0.0,
            })
            .collect()
    }

    #[test]
    fn item_ranked_first_in_every_list_wins() {
        let keyword = list(&["a", "b", "c"]);
        let vector = list(&["a", "c", "b"]);
        let graph = list(&["b", "a", "c"]);

        let fused = rrf_rerank(&[keyword, vector, graph], 60, 10);
        assert_eq!(fused[0].0, "a");
    }

    #[test]
    fn item_absent_from_a_list_still_gets_credit_from_others() {
        let keyword = list(&["a", "b"]);
        let vector: Vec<FusableResult> = Vec::new();

        let fused = rrf_rerank(&[keyword, vector], 60, 10);
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].0, "a");
    }

    #[test]
    fn limit_truncates_result_set() {
        let keyword = list(&["a", "b", "c", "d"]);
        let fused = rrf_rerank(&[keyword], 60, 2);
        assert_eq!(fused.len(), 2);
    }

    #[test]
    fn ties_break_by_first_seen_order() {
        let first = list(&["a", "b"]);
        let second = list(&["b", "c"]);

        let fused = rrf_rerank(&[first, second], 60, 3);
        let keys: Vec<&str> = fused.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }
}
