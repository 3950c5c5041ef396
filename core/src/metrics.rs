use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub struct QueryMetrics {
    pub total_queries: u64,
    pub latencies: VecDeque<u64>, // microseconds
}

/// Per read-leg (keyword/vector/graph) counters: how often each backend
/// returned at least one result. The closest equivalent to the teacher's
/// cache-hit-rate tracking for a fan-out with no cache.
#[derive(Debug, Clone, Default)]
pub struct LegMetrics {
    pub keyword_hits: u64,
    pub vector_hits: u64,
    pub graph_hits: u64,
    pub total_searches: u64,
}

pub struct MetricsCollector {
    state: Arc<Mutex<MetricsState>>,
}

struct MetricsState {
    query_metrics: QueryMetrics,
    leg_metrics: LegMetrics,
    max_history: usize,
}

impl MetricsCollector {
    pub fn new(max_history: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(MetricsState {
                query_metrics: QueryMetrics::default(),
                leg_metrics: LegMetrics::default(),
                max_history,
            })),
        }
    }

    pub fn record_query(&self, latency_us: u64) {
        let mut state = self.state.lock().unwrap();
        state.query_metrics.total_queries += 1;
        state.query_metrics.latencies.push_back(latency_us);
        if state.query_metrics.latencies.len() > state.max_history {
            state.query_metrics.latencies.pop_front();
        }
    }

    pub fn record_legs(&self, keyword_nonempty: bool, vector_nonempty: bool, graph_nonempty: bool) {
        let mut state = self.state.lock().unwrap();
        state.leg_metrics.total_searches += 1;
        if keyword_nonempty {
            state.leg_metrics.keyword_hits += 1;
        }
        if vector_nonempty {
            state.leg_metrics.vector_hits += 1;
        }
        if graph_nonempty {
            state.leg_metrics.graph_hits += 1;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.lock().unwrap();
        let q = &state.query_metrics;
        let l = &state.leg_metrics;

        let mut sorted_latencies: Vec<u64> = q.latencies.iter().copied().collect();
        sorted_latencies.sort_unstable();

        let p50 = percentile(&sorted_latencies, 50.0);
        let p95 = percentile(&sorted_latencies, 95.0);
        let p99 = percentile(&sorted_latencies, 99.0);

        let rate = |hits: u64| -> f32 {
            if l.total_searches > 0 {
                hits as f32 / l.total_searches as f32
            } else {
                0.0
            }
        };

        MetricsSnapshot {
            total_queries: q.total_queries,
            p50,
            p95,
            p99,
            history_count: q.latencies.len(),
            keyword_hit_rate: rate(l.keyword_hits),
            vector_hit_rate: rate(l.vector_hits),
            graph_hit_rate: rate(l.graph_hits),
        }
    }
}

fn percentile(sorted: &[u64], p: f32) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((p / 100.0) * (sorted.len() as f32)).ceil() as usize;
    sorted[idx.saturating_sub(1).min(sorted.len() - 1)]
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    pub total_queries: u64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub history_count: usize,
    pub keyword_hit_rate: f32,
    pub vector_hit_rate: f32,
    pub graph_hit_rate: f32,
}
