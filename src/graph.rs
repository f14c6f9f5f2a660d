//! C5 - Graph index: topology over tokens, held by id only.
//!
//! Grounded on the teacher's `graph.rs` (adjacency_out/adjacency_in maps,
//! FNV-1a edge ids, BFS traversal) generalised to the store's directed /
//! undirected / bidirectional connection model and degree-cap contract.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::connection::{Connection, ConnectionKind, Directionality};
use crate::error::{CoreError, CoreResult};

pub type NodeId = u32;
pub type EdgeId = u64;

/// FNV-1a over `(from, to, kind)`, matching the hashing scheme this
/// lineage uses for edge identifiers.
fn fnv1a_edge_id(from: NodeId, to: NodeId, kind: u8) -> EdgeId {
    const FNV_OFFSET: u64 = 14695981039346656037;
    const FNV_PRIME: u64 = 1099511628211;
    let mut hash = FNV_OFFSET;
    for byte in from
        .to_le_bytes()
        .into_iter()
        .chain(to.to_le_bytes())
        .chain(std::iter::once(kind))
    {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn edge_id_for(from: NodeId, to: NodeId, kind: ConnectionKind, directionality: Directionality) -> EdgeId {
    match directionality {
        Directionality::Directed => fnv1a_edge_id(from, to, kind as u8),
        Directionality::Undirected | Directionality::Bidirectional => {
            let (a, b) = Connection::pair_key(from, to);
            fnv1a_edge_id(a, b, kind as u8)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Degree {
    pub in_count: usize,
    pub out_count: usize,
    pub total: usize,
}

/// FIFO-bounded cache; oldest entry is dropped once capacity is reached
/// (§5: "any eviction policy satisfies correctness").
struct BoundedCache<K, V> {
    capacity: usize,
    order: VecDeque<K>,
    map: HashMap<K, V>,
}

impl<K: std::hash::Hash + Eq + Clone, V> BoundedCache<K, V> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            map: HashMap::new(),
        }
    }

    fn get(&self, key: &K) -> Option<&V> {
        self.map.get(key)
    }

    fn insert(&mut self, key: K, value: V) {
        if !self.map.contains_key(&key) {
            if self.order.len() >= self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.map.remove(&oldest);
                }
            }
            self.order.push_back(key.clone());
        }
        self.map.insert(key, value);
    }

    fn retain<F: FnMut(&K) -> bool>(&mut self, mut keep: F) {
        self.map.retain(|k, _| keep(k));
        self.order.retain(|k| self.map.contains_key(k));
    }

    fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }
}

pub const PATH_CACHE_CAPACITY: usize = 10_000;
pub const DISTANCE_CACHE_CAPACITY: usize = 10_000;

/// Graph index: adjacency over token ids plus edge metadata, a timestamp
/// index for temporal-window queries, and bounded path/distance caches.
pub struct Graph {
    pub max_connections_per_node: usize,
    adjacency_out: HashMap<NodeId, Vec<EdgeId>>,
    adjacency_in: HashMap<NodeId, Vec<EdgeId>>,
    edges: HashMap<EdgeId, Connection>,
    node_timestamps: HashMap<NodeId, u32>,
    temporal_index: BTreeMap<u32, Vec<NodeId>>,
    path_cache: BoundedCache<(NodeId, NodeId, usize), Option<Vec<NodeId>>>,
    distance_cache: BoundedCache<(NodeId, NodeId), f32>,
    flag_callback: Option<Box<dyn Fn(NodeId, usize) + Send + Sync>>,
}

impl Graph {
    pub fn new(max_connections_per_node: usize) -> Self {
        Self {
            max_connections_per_node,
            adjacency_out: HashMap::new(),
            adjacency_in: HashMap::new(),
            edges: HashMap::new(),
            node_timestamps: HashMap::new(),
            temporal_index: BTreeMap::new(),
            path_cache: BoundedCache::new(PATH_CACHE_CAPACITY),
            distance_cache: BoundedCache::new(DISTANCE_CACHE_CAPACITY),
            flag_callback: None,
        }
    }

    /// Install the callback C5 uses to push recomputed topology flags back
    /// onto a token record (§4.5's "flag maintenance" rule). `None` by
    /// default so the graph can be used standalone in tests.
    pub fn set_flag_callback(&mut self, callback: impl Fn(NodeId, usize) + Send + Sync + 'static) {
        self.flag_callback = Some(Box::new(callback));
    }

    fn notify_degree_changed(&self, id: NodeId) {
        if let Some(cb) = &self.flag_callback {
            cb(id, self.degree(id).total);
        }
    }

    fn invalidate_path_cache_for(&mut self, id: NodeId) {
        self.path_cache.retain(|&(a, b, _)| a != id && b != id);
    }

    /// Called by the coordinate system after a token's position changes in
    /// any space (§5: distance cache evicts on coordinate change).
    pub fn invalidate_distance_cache_for(&mut self, id: NodeId) {
        self.distance_cache.retain(|&(a, b)| a != id && b != id);
    }

    pub fn cache_distance(&mut self, a: NodeId, b: NodeId, distance: f32) {
        self.distance_cache.insert(Connection::pair_key(a, b), distance);
    }

    pub fn cached_distance(&self, a: NodeId, b: NodeId) -> Option<f32> {
        self.distance_cache.get(&Connection::pair_key(a, b)).copied()
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.adjacency_out.contains_key(&id)
    }

    pub fn node_count(&self) -> usize {
        self.adjacency_out.len()
    }

    /// Insert a node; idempotent (§4.5: "rejects duplicates idempotently").
    pub fn add(&mut self, token_id: NodeId, timestamp: u32) -> bool {
        if self.adjacency_out.contains_key(&token_id) {
            return false;
        }
        self.adjacency_out.insert(token_id, Vec::new());
        self.adjacency_in.insert(token_id, Vec::new());
        self.node_timestamps.insert(token_id, timestamp);
        self.temporal_index.entry(timestamp).or_default().push(token_id);
        self.notify_degree_changed(token_id);
        true
    }

    /// Removes all edges touching `token_id`, then the node itself.
    pub fn remove(&mut self, token_id: NodeId) -> bool {
        if !self.adjacency_out.contains_key(&token_id) {
            return false;
        }
        let neighbors: Vec<NodeId> = self.neighbors(token_id);
        for other in neighbors {
            self.disconnect(token_id, other);
        }
        self.adjacency_out.remove(&token_id);
        self.adjacency_in.remove(&token_id);
        if let Some(ts) = self.node_timestamps.remove(&token_id) {
            if let Some(bucket) = self.temporal_index.get_mut(&ts) {
                bucket.retain(|&id| id != token_id);
                if bucket.is_empty() {
                    self.temporal_index.remove(&ts);
                }
            }
        }
        self.invalidate_path_cache_for(token_id);
        self.invalidate_distance_cache_for(token_id);
        true
    }

    fn degree_raw(&self, id: NodeId) -> usize {
        let out: HashSet<EdgeId> = self.adjacency_out.get(&id).into_iter().flatten().copied().collect();
        let inn: HashSet<EdgeId> = self.adjacency_in.get(&id).into_iter().flatten().copied().collect();
        out.union(&inn).count()
    }

    pub fn degree(&self, id: NodeId) -> Degree {
        Degree {
            out_count: self.adjacency_out.get(&id).map_or(0, Vec::len),
            in_count: self.adjacency_in.get(&id).map_or(0, Vec::len),
            total: self.degree_raw(id),
        }
    }

    /// Directed edge `a -> b`. Errors: `UnknownToken`, `SelfLoop`,
    /// `DegreeCap`. Idempotent: connecting the same `(a, b, kind,
    /// directionality)` twice returns the existing edge id.
    pub fn connect(
        &mut self,
        a: NodeId,
        b: NodeId,
        kind: ConnectionKind,
        weight: f32,
        confidence: f32,
        directionality: Directionality,
    ) -> CoreResult<EdgeId> {
        if a == b {
            return Err(CoreError::SelfLoop(a));
        }
        if !self.contains_node(a) {
            return Err(CoreError::UnknownToken(a));
        }
        if !self.contains_node(b) {
            return Err(CoreError::UnknownToken(b));
        }

        let edge_id = edge_id_for(a, b, kind, directionality);
        if self.edges.contains_key(&edge_id) {
            return Ok(edge_id);
        }

        if self.degree_raw(a) >= self.max_connections_per_node {
            return Err(CoreError::DegreeCap(a));
        }
        if self.degree_raw(b) >= self.max_connections_per_node {
            return Err(CoreError::DegreeCap(b));
        }

        let mut connection = Connection::new(a, b, kind, directionality)?;
        connection.update_weight(weight);
        connection.set_confidence(confidence);
        self.edges.insert(edge_id, connection);

        match directionality {
            Directionality::Directed => {
                self.adjacency_out.get_mut(&a).unwrap().push(edge_id);
                self.adjacency_in.get_mut(&b).unwrap().push(edge_id);
            }
            Directionality::Undirected | Directionality::Bidirectional => {
                self.adjacency_out.get_mut(&a).unwrap().push(edge_id);
                self.adjacency_out.get_mut(&b).unwrap().push(edge_id);
                self.adjacency_in.get_mut(&a).unwrap().push(edge_id);
                self.adjacency_in.get_mut(&b).unwrap().push(edge_id);
            }
        }

        self.invalidate_path_cache_for(a);
        self.invalidate_path_cache_for(b);
        self.notify_degree_changed(a);
        self.notify_degree_changed(b);
        Ok(edge_id)
    }

    /// Removes every edge directly joining `a` and `b`, in any kind or
    /// direction. Returns `true` iff at least one edge was removed.
    pub fn disconnect(&mut self, a: NodeId, b: NodeId) -> bool {
        let touching = |graph: &Self, id: NodeId, other: NodeId| -> Vec<EdgeId> {
            let mut out = Vec::new();
            for &eid in graph.adjacency_out.get(&id).into_iter().flatten() {
                if let Some(edge) = graph.edges.get(&eid) {
                    if (edge.from == id && edge.to == other) || (edge.from == other && edge.to == id) {
                        out.push(eid);
                    }
                }
            }
            out
        };
        let edge_ids: HashSet<EdgeId> = touching(self, a, b).into_iter().collect();
        if edge_ids.is_empty() {
            return false;
        }
        for eid in &edge_ids {
            self.edges.remove(eid);
        }
        for node in [a, b] {
            if let Some(out) = self.adjacency_out.get_mut(&node) {
                out.retain(|eid| !edge_ids.contains(eid));
            }
            if let Some(inn) = self.adjacency_in.get_mut(&node) {
                inn.retain(|eid| !edge_ids.contains(eid));
            }
        }
        self.invalidate_path_cache_for(a);
        self.invalidate_path_cache_for(b);
        self.notify_degree_changed(a);
        self.notify_degree_changed(b);
        true
    }

    pub fn neighbors(&self, id: NodeId) -> Vec<NodeId> {
        let mut set = HashSet::new();
        for &eid in self.adjacency_out.get(&id).into_iter().flatten() {
            if let Some(edge) = self.edges.get(&eid) {
                set.insert(if edge.from == id { edge.to } else { edge.from });
            }
        }
        for &eid in self.adjacency_in.get(&id).into_iter().flatten() {
            if let Some(edge) = self.edges.get(&eid) {
                set.insert(if edge.to == id { edge.from } else { edge.to });
            }
        }
        let mut out: Vec<NodeId> = set.into_iter().collect();
        out.sort_unstable();
        out
    }

    pub fn edge(&self, edge_id: EdgeId) -> Option<&Connection> {
        self.edges.get(&edge_id)
    }

    /// Bounded-depth BFS from `a` to `b`; `None` if unreachable within
    /// `max_depth` hops. Tie-breaking is whatever the adjacency iteration
    /// order yields first, per §4.5.
    pub fn path(&mut self, a: NodeId, b: NodeId, max_depth: usize) -> Option<Vec<NodeId>> {
        let key = (a, b, max_depth);
        if let Some(cached) = self.path_cache.get(&key) {
            return cached.clone();
        }
        let result = self.bfs_path(a, b, max_depth);
        self.path_cache.insert(key, result.clone());
        result
    }

    fn bfs_path(&self, a: NodeId, b: NodeId, max_depth: usize) -> Option<Vec<NodeId>> {
        if !self.contains_node(a) || !self.contains_node(b) {
            return None;
        }
        if a == b {
            return Some(vec![a]);
        }
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        let mut predecessor: HashMap<NodeId, NodeId> = HashMap::new();
        visited.insert(a);
        queue.push_back((a, 0usize));
        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for neighbor in self.neighbors(current) {
                if visited.insert(neighbor) {
                    predecessor.insert(neighbor, current);
                    if neighbor == b {
                        let mut path = vec![b];
                        let mut cursor = b;
                        while let Some(&prev) = predecessor.get(&cursor) {
                            path.push(prev);
                            cursor = prev;
                            if cursor == a {
                                break;
                            }
                        }
                        path.reverse();
                        return Some(path);
                    }
                    queue.push_back((neighbor, depth + 1));
                }
            }
        }
        None
    }

    /// Thin wrapper: filters caller-supplied spatial candidates (from C4)
    /// down to ids that exist as graph nodes, excluding `id` itself.
    pub fn find_spatial_neighbors(&self, id: NodeId, spatial_candidates: &[NodeId]) -> Vec<NodeId> {
        spatial_candidates
            .iter()
            .copied()
            .filter(|&candidate| candidate != id && self.contains_node(candidate))
            .collect()
    }

    /// All nodes added within `window` seconds of `id`'s own timestamp.
    pub fn find_temporal_neighbors(&self, id: NodeId, window: u32) -> Vec<NodeId> {
        let Some(&ts) = self.node_timestamps.get(&id) else {
            return Vec::new();
        };
        let lo = ts.saturating_sub(window);
        let hi = ts.saturating_add(window);
        self.temporal_index
            .range(lo..=hi)
            .flat_map(|(_, ids)| ids.iter().copied())
            .filter(|&candidate| candidate != id)
            .collect()
    }

    /// Opportunistic auto-connect (§4.5, §9: best-effort, not a contract).
    /// Connects `token_id` to every candidate within the degree cap;
    /// failures (cap reached) are silently skipped.
    pub fn auto_connect(&mut self, token_id: NodeId, spatial_candidates: &[NodeId], temporal_window: u32) {
        for other in self.find_spatial_neighbors(token_id, spatial_candidates) {
            let _ = self.connect(
                token_id,
                other,
                ConnectionKind::SpatialProximity,
                1.0,
                1.0,
                Directionality::Bidirectional,
            );
        }
        for other in self.find_temporal_neighbors(token_id, temporal_window) {
            let _ = self.connect(
                token_id,
                other,
                ConnectionKind::TemporalProximity,
                1.0,
                1.0,
                Directionality::Bidirectional,
            );
        }
    }
}
