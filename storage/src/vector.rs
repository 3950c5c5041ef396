use kioku_core::error::KiokuError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: String,
    /// In `[0, 2]`; `similarity = max(0, 1 - distance)` (§4.4).
    pub distance: f32,
}

impl VectorHit {
    pub fn similarity(&self) -> f32 {
        (1.0 - self.distance).max(0.0)
    }
}

#[derive(Debug, Clone, Default)]
struct LinearAnn {
    embeddings: HashMap<String, Vec<f32>>,
}

impl LinearAnn {
    fn insert(&mut self, id: String, embedding: Vec<f32>) {
        self.embeddings.insert(id, embedding);
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<VectorHit> {
        let mut scores: Vec<VectorHit> = self
            .embeddings
            .iter()
            .filter_map(|(id, emb)| {
                cosine_similarity(query, emb).map(|sim| VectorHit {
                    id: id.clone(),
                    distance: 1.0 - sim,
                })
            })
            .collect();

        scores.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
        scores.truncate(k);
        scores
    }

    fn count(&self) -> usize {
        self.embeddings.len()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return Some(0.0);
    }
    Some(dot / (norm_a * norm_b))
}

/// Connection mode matching §4.4's three variants: `ephemeral` (in-memory
/// only), `embedded` (local flat index persisted under a data directory,
/// the slot the original ChromaDB persistence occupied), and `server`
/// (a remote ANN service behind the same trait — stubbed, since a remote
/// vector service is a pluggable backend per §1, not something this
/// crate speaks to over the wire).
pub enum VectorIndex {
    Ephemeral(Mutex<LinearAnn>),
    Embedded {
        index: Mutex<LinearAnn>,
        snapshot_path: PathBuf,
    },
    Server { probe_ok: bool },
}

impl VectorIndex {
    pub fn ephemeral() -> Self {
        VectorIndex::Ephemeral(Mutex::new(LinearAnn::default()))
    }

    /// Loads a persisted snapshot if present, otherwise starts empty.
    pub async fn embedded(persist_dir: impl AsRef<Path>) -> Result<Self, KiokuError> {
        let persist_dir = persist_dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&persist_dir)
            .await
            .map_err(|e| KiokuError::Backend(e.to_string()))?;
        let snapshot_path = persist_dir.join("vectors.json");

        let index = match tokio::fs::read(&snapshot_path).await {
            Ok(bytes) => {
                let embeddings: HashMap<String, Vec<f32>> =
                    serde_json::from_slice(&bytes).map_err(|e| KiokuError::Backend(e.to_string()))?;
                LinearAnn { embeddings }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LinearAnn::default(),
            Err(e) => return Err(KiokuError::Backend(e.to_string())),
        };

        Ok(VectorIndex::Embedded {
            index: Mutex::new(index),
            snapshot_path,
        })
    }

    /// Stub: a real deployment would dial the configured host/port here.
    /// `count()` always fails so `open_auto` falls through to `embedded`.
    pub fn server_stub() -> Self {
        VectorIndex::Server { probe_ok: false }
    }

    /// Probes server, then embedded, then falls back to ephemeral — the
    /// only place connection-mode selection happens (Design Note 1).
    pub async fn open_auto(persist_dir: impl AsRef<Path>) -> Self {
        let server = VectorIndex::server_stub();
        if server.count().await.is_ok() {
            return server;
        }
        match VectorIndex::embedded(persist_dir).await {
            Ok(embedded) => embedded,
            Err(_) => VectorIndex::ephemeral(),
        }
    }

    pub async fn add(&self, id: &str, embedding: Vec<f32>) -> Result<(), KiokuError> {
        match self {
            VectorIndex::Ephemeral(index) => {
                index.lock().await.insert(id.to_string(), embedding);
                Ok(())
            }
            VectorIndex::Embedded { index, snapshot_path } => {
                let mut guard = index.lock().await;
                guard.insert(id.to_string(), embedding);
                persist(&guard, snapshot_path).await
            }
            VectorIndex::Server { .. } => Err(KiokuError::Backend(
                "server-mode vector index is not wired to a remote backend".to_string(),
            )),
        }
    }

    pub async fn search(&self, query: &[f32], k: usize) -> Result<Vec<VectorHit>, KiokuError> {
        match self {
            VectorIndex::Ephemeral(index) => Ok(index.lock().await.search(query, k)),
            VectorIndex::Embedded { index, .. } => Ok(index.lock().await.search(query, k)),
            VectorIndex::Server { .. } => Ok(Vec::new()),
        }
    }

    pub async fn count(&self) -> Result<usize, KiokuError> {
        match self {
            VectorIndex::Ephemeral(index) => Ok(index.lock().await.count()),
            VectorIndex::Embedded { index, .. } => Ok(index.lock().await.count()),
            VectorIndex::Server { probe_ok } => {
                if *probe_ok {
                    Ok(0)
                } else {
                    Err(KiokuError::Transient("vector server unreachable".to_string()))
                }
            }
        }
    }
}

async fn persist(index: &LinearAnn, path: &Path) -> Result<(), KiokuError> {
    let bytes =
        serde_json::to_vec(&index.embeddings).map_err(|e| KiokuError::Backend(e.to_string()))?;
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| KiokuError::Backend(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ephemeral_search_ranks_closest_vector_first() {
        let index = VectorIndex::ephemeral();
        index.add("a", vec![1.0, 0.0, 0.0]).await.unwrap();
        index.add("b", vec![0.0, 1.0, 0.0]).await.unwrap();
        index.add("c", vec![0.9, 0.1, 0.0]).await.unwrap();

        let hits = index.search(&[1.0, 0.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[1].id, "c");
        assert!(hits[0].similarity() > hits[1].similarity());
    }

    #[tokio::test]
    async fn distance_and_similarity_are_complementary() {
        let index = VectorIndex::ephemeral();
        index.add("a", vec![1.0, 0.0]).await.unwrap();
        let hits = index.search(&[1.0, 0.0], 1).await.unwrap();
        assert!((hits[0].distance - 0.0).abs() < 1e-6);
        assert!((hits[0].similarity() - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn embedded_index_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let index = VectorIndex::embedded(dir.path()).await.unwrap();
            index.add("x", vec![1.0, 1.0]).await.unwrap();
        }
        let reopened = VectorIndex::embedded(dir.path()).await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);
    }
}
