use crate::wal::Wal;
use kioku_core::error::KiokuError;
use kioku_core::model::{ContentHash, Entity, EntityType, Relationship, RelationshipType};
use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use std::collections::HashMap;
use std::collections::VecDeque;
use std::path::Path;
use tokio::sync::Mutex;

/// Durable log record for a graph mutation, replayed on open to rebuild
/// the in-memory adjacency store. Mirrors the teacher's rkyv-archived
/// `Node`/`Edge` records in `core/src/model.rs`.
#[derive(Archive, RkyvDeserialize, RkyvSerialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
enum GraphOp {
    UpsertEntity {
        name: String,
        entity_type: String,
        date: String,
    },
    UpsertRelationship {
        source_name: String,
        target_name: String,
        rel_type: String,
        weight: f32,
        evidence: String,
        event_date: Option<String>,
        source_hash: String,
    },
}

struct GraphState {
    entities: HashMap<String, Entity>,
    edges: Vec<Relationship>,
    forward: HashMap<String, Vec<usize>>,
    reverse: HashMap<String, Vec<usize>>,
}

impl GraphState {
    fn new() -> Self {
        Self {
            entities: HashMap::new(),
            edges: Vec::new(),
            forward: HashMap::new(),
            reverse: HashMap::new(),
        }
    }

    fn upsert_entity(&mut self, name: &str, entity_type: EntityType, date: &str) {
        let key = name.to_lowercase();
        match self.entities.get_mut(&key) {
            Some(existing) => {
                existing.mention_count += 1;
                existing.last_seen = date.to_string();
            }
            None => {
                self.entities
                    .insert(key, Entity::first_mention(name, entity_type, date));
            }
        }
    }

    fn upsert_relationship(&mut self, rel: Relationship) {
        let key = rel.edge_key();
        if let Some(idx) = self.edges.iter().position(|e| e.edge_key() == key) {
            let existing = &mut self.edges[idx];
            existing.weight = (existing.weight + rel.weight) / 2.0;
            existing.evidence = rel.evidence;
            existing.event_date = rel.event_date;
            existing.source_hash = rel.source_hash;
        } else {
            let idx = self.edges.len();
            self.forward
                .entry(key.0.clone())
                .or_default()
                .push(idx);
            self.reverse
                .entry(key.1.clone())
                .or_default()
                .push(idx);
            self.edges.push(rel);
        }
    }
}

/// Knowledge-graph store. Undirected `traverse()`/`find_path()` are
/// implemented by tracking both forward and reverse adjacency, a
/// deliberate generalization of the teacher's directed-only
/// `AdjacencyGraph::expand()` (see DESIGN.md).
pub struct GraphIndex {
    state: Mutex<GraphState>,
    wal: Mutex<Wal>,
}

impl GraphIndex {
    pub async fn open(wal_path: impl AsRef<Path>) -> Result<Self, KiokuError> {
        let mut wal = Wal::open(wal_path)
            .await
            .map_err(|e| KiokuError::Backend(e.to_string()))?;

        let mut state = GraphState::new();
        wal.replay(|_lsn, payload| {
            let op: GraphOp = rkyv::from_bytes(&payload)
                .map_err(|_| crate::wal::WalError::CrcMismatch)?;
            apply_op(&mut state, op);
            Ok(())
        })
        .await
        .map_err(|e| KiokuError::Backend(e.to_string()))?;

        Ok(Self {
            state: Mutex::new(state),
            wal: Mutex::new(wal),
        })
    }

    /// Upserts an entity mention (invariant: case-insensitive identity,
    /// monotonic `mention_count`, forward-only `last_seen`, §4.5).
    pub async fn upsert_entity(
        &self,
        name: &str,
        entity_type: EntityType,
        date: &str,
    ) -> Result<(), KiokuError> {
        let op = GraphOp::UpsertEntity {
            name: name.to_string(),
            entity_type: entity_type.to_string(),
            date: date.to_string(),
        };
        self.write_op(&op).await?;

        let mut state = self.state.lock().await;
        apply_op(&mut state, op);
        Ok(())
    }

    /// Upserts a directed edge. On re-observation, `weight` becomes the
    /// mean of old and new; `evidence`/`event_date`/`source_hash` are
    /// overwritten with the latest observation (§4.5).
    pub async fn upsert_relationship(&self, rel: Relationship) -> Result<(), KiokuError> {
        let op = GraphOp::UpsertRelationship {
            source_name: rel.source_name.clone(),
            target_name: rel.target_name.clone(),
            rel_type: rel.rel_type.to_string(),
            weight: rel.weight,
            evidence: rel.evidence.clone(),
            event_date: rel.event_date.clone(),
            source_hash: rel.source_hash.as_str().to_string(),
        };
        self.write_op(&op).await?;

        let mut state = self.state.lock().await;
        apply_op(&mut state, op);
        Ok(())
    }

    async fn write_op(&self, op: &GraphOp) -> Result<(), KiokuError> {
        let bytes = rkyv::to_bytes::<_, 256>(op).map_err(|e| KiokuError::Backend(e.to_string()))?;
        let mut wal = self.wal.lock().await;
        wal.append(&bytes)
            .await
            .map_err(|e| KiokuError::Backend(e.to_string()))?;
        wal.flush().await.map_err(|e| KiokuError::Backend(e.to_string()))?;
        Ok(())
    }

    /// Entities whose name contains `query` (case-insensitive), ranked by
    /// `mention_count` descending.
    pub async fn search_entities(&self, query: &str, limit: usize) -> Vec<Entity> {
        let state = self.state.lock().await;
        let needle = query.to_lowercase();
        let mut hits: Vec<Entity> = state
            .entities
            .values()
            .filter(|e| e.name.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        hits.sort_by(|a, b| b.mention_count.cmp(&a.mention_count));
        hits.truncate(limit);
        hits
    }

    /// Top entities overall by mention count, used for resource rendering
    /// (`read_entity_resource`) and as a general "what do you know" probe.
    pub async fn get_canonical_entities(&self, limit: usize) -> Vec<Entity> {
        let state = self.state.lock().await;
        let mut all: Vec<Entity> = state.entities.values().cloned().collect();
        all.sort_by(|a, b| b.mention_count.cmp(&a.mention_count));
        all.truncate(limit);
        all
    }

    /// Undirected BFS out to `max_hops`, returning each distinct edge
    /// encountered (by `source_hash`, falling back to `evidence`) at most
    /// once, regardless of how many times it is reachable.
    pub async fn traverse(&self, start_name: &str, max_hops: u8) -> Vec<Relationship> {
        self.traverse_with_entities(start_name, max_hops).await.1
    }

    /// Same BFS as `traverse`, additionally returning every distinct
    /// entity reached (including the start entity itself), for callers
    /// that need the node list alongside the edges (`recall_related`,
    /// `read_entity_resource`).
    pub async fn traverse_with_entities(
        &self,
        start_name: &str,
        max_hops: u8,
    ) -> (Vec<Entity>, Vec<Relationship>) {
        let state = self.state.lock().await;
        let start_key = start_name.to_lowercase();
        let Some(start_entity) = state.entities.get(&start_key) else {
            return (Vec::new(), Vec::new());
        };

        let mut visited_nodes = std::collections::HashSet::new();
        visited_nodes.insert(start_key.clone());
        let mut node_order = vec![start_key.clone()];
        let mut queue = VecDeque::new();
        queue.push_back((start_key, 0u8));

        let mut seen_edges = std::collections::HashSet::new();
        let mut edges_out = Vec::new();

        while let Some((node, dist)) = queue.pop_front() {
            if dist >= max_hops {
                continue;
            }

            for &idx in undirected_neighbors(&state, &node) {
                let edge = &state.edges[idx];
                let dedupe_key = edge.source_hash.as_str().to_string();
                if seen_edges.insert(dedupe_key) {
                    edges_out.push(edge.clone());
                }

                let other = if edge.source_name.to_lowercase() == node {
                    edge.target_name.to_lowercase()
                } else {
                    edge.source_name.to_lowercase()
                };
                if visited_nodes.insert(other.clone()) {
                    node_order.push(other.clone());
                    queue.push_back((other, dist + 1));
                }
            }
        }

        let _ = start_entity;
        let nodes_out = node_order
            .into_iter()
            .filter_map(|key| state.entities.get(&key).cloned())
            .collect();

        (nodes_out, edges_out)
    }

    /// Directed shortest path first; if none exists, retries undirected
    /// (Open Question (a): ported from the original's unconditionally
    /// undirected `InMemoryGraphStore.find_path`, since there is no remote
    /// graph database here to raise a query exception and trigger the
    /// teacher's exception-based fallback).
    pub async fn find_path(&self, from_name: &str, to_name: &str) -> Option<Vec<Relationship>> {
        let state = self.state.lock().await;
        let from_key = from_name.to_lowercase();
        let to_key = to_name.to_lowercase();

        if let Some(path) = bfs_path(&state, &from_key, &to_key, false) {
            return Some(path);
        }
        bfs_path(&state, &from_key, &to_key, true)
    }
}

fn undirected_neighbors<'a>(state: &'a GraphState, node: &str) -> impl Iterator<Item = &'a usize> {
    state
        .forward
        .get(node)
        .into_iter()
        .flatten()
        .chain(state.reverse.get(node).into_iter().flatten())
}

/// Shortest directed path is capped at this many edges (§4.5).
const MAX_PATH_LEN: usize = 5;

fn bfs_path(
    state: &GraphState,
    from: &str,
    to: &str,
    undirected: bool,
) -> Option<Vec<Relationship>> {
    if !state.entities.contains_key(from) || !state.entities.contains_key(to) {
        return None;
    }
    if from == to {
        return Some(Vec::new());
    }

    let mut visited = std::collections::HashSet::new();
    visited.insert(from.to_string());
    let mut queue = VecDeque::new();
    queue.push_back((from.to_string(), Vec::<usize>::new()));

    while let Some((node, path)) = queue.pop_front() {
        if path.len() >= MAX_PATH_LEN {
            continue;
        }

        let candidates: Vec<&usize> = if undirected {
            undirected_neighbors(state, &node).collect()
        } else {
            state.forward.get(&node).into_iter().flatten().collect()
        };

        for &idx in candidates {
            let edge = &state.edges[idx];
            let other = if undirected {
                if edge.source_name.to_lowercase() == node {
                    edge.target_name.to_lowercase()
                } else {
                    edge.source_name.to_lowercase()
                }
            } else {
                edge.target_name.to_lowercase()
            };

            if other == to {
                let mut full_path = path.clone();
                full_path.push(idx);
                return Some(full_path.into_iter().map(|i| state.edges[i].clone()).collect());
            }

            if visited.insert(other.clone()) {
                let mut next_path = path.clone();
                next_path.push(idx);
                queue.push_back((other, next_path));
            }
        }
    }

    None
}

fn apply_op(state: &mut GraphState, op: GraphOp) {
    match op {
        GraphOp::UpsertEntity {
            name,
            entity_type,
            date,
        } => {
            let entity_type = entity_type.parse().unwrap_or(EntityType::Topic);
            state.upsert_entity(&name, entity_type, &date);
        }
        GraphOp::UpsertRelationship {
            source_name,
            target_name,
            rel_type,
            weight,
            evidence,
            event_date,
            source_hash,
        } => {
            let rel_type = rel_type.parse().unwrap_or(RelationshipType::Topical);
            state.upsert_relationship(Relationship {
                source_name,
                target_name,
                rel_type,
                weight,
                evidence,
                event_date,
                source_hash: ContentHash::from(source_hash),
            });
        }
    }
}
