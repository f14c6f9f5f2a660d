// Octospace - an in-process spatial-semantic token store.
// Copyright (C) 2024-2025 Octospace Contributors

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Octospace core - an in-process spatial-semantic token store.
//!
//! Fixed-size token records are positioned simultaneously in eight
//! independent coordinate spaces (`coordinate_space`, `spatial_index`,
//! `coordinate_system`), connected by typed directed edges (`connection`,
//! `graph`), and governed by a versioned configuration record with a
//! subscription/event fan-out (`cdna`, `events`). `Store` wires the pieces
//! together; each module also works standalone.

pub mod cdna;
pub mod connection;
pub mod coordinate_space;
pub mod coordinate_system;
pub mod error;
pub mod events;
pub mod graph;
pub mod spatial_index;
pub mod token;

pub use cdna::{CdnaRecord, CdnaStore, CDNA_SIZE};
pub use connection::{Connection, ConnectionKind, Directionality, Persistence};
pub use coordinate_space::{default_space_configs, IndexKind, SpaceConfig};
pub use coordinate_system::{CoordinateSystem, CoordinateSystemStats, MultiCoordinate};
pub use error::{CoreError, CoreResult};
pub use events::{Event, EventBus, EventKind, Interest};
pub use graph::{Degree, EdgeId, Graph, NodeId};
pub use spatial_index::{Point3D, Rect, SparseGrid, SpatialHash, SpatialIndex};
pub use token::{flags as token_flags, CoordinateSpace, EntityType, Token, SCALE_FACTORS};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

/// Reads the GRID_PHYSICS hot slice straight off `cdna` and applies its
/// `space_scales` to `coordinates` (§4.4: "on initialisation and on
/// CDNA-update events C4 reads the GRID_PHYSICS hot-slice from C6").
fn sync_coordinate_scales(coordinates: &CoordinateSystem, cdna: &CdnaStore) {
    let slice = cdna
        .hot_slice("coordinate_system")
        .expect("\"coordinate_system\" is a registered hot-slice consumer");
    coordinates.apply_scales(cdna::decode_space_scales(&slice));
}

/// Orchestrates the token table and the four indexing/config subsystems,
/// wiring the cross-component contracts spec.md §4/§5 describes: graph
/// degree changes push topology flags back onto the token record,
/// coordinate changes invalidate the graph's distance cache, and CDNA is
/// kept authoritative over per-space scale, the graph degree cap, and
/// token weight bounds - both on construction and on every subsequent
/// `CdnaUpdated` event (§4.4, §4.6).
pub struct Store {
    tokens: Arc<RwLock<HashMap<u32, Token>>>,
    coordinates: Arc<CoordinateSystem>,
    graph: Arc<RwLock<Graph>>,
    cdna: Arc<CdnaStore>,
    events: EventBus,
}

impl Store {
    pub fn new(max_connections_per_node: usize) -> Self {
        let tokens: Arc<RwLock<HashMap<u32, Token>>> = Arc::new(RwLock::new(HashMap::new()));

        let mut initial_record = CdnaRecord::default();
        initial_record.max_connections = max_connections_per_node as u32;
        let cdna = Arc::new(CdnaStore::new(initial_record));

        let mut graph = Graph::new(max_connections_per_node);
        let callback_tokens = tokens.clone();
        graph.set_flag_callback(move |id, degree| {
            if let Some(token) = callback_tokens.write().get_mut(&id) {
                token.apply_graph_degree(degree);
            }
        });
        let graph = Arc::new(RwLock::new(graph));

        let coordinates = Arc::new(CoordinateSystem::with_default_configs());
        sync_coordinate_scales(&coordinates, &cdna);

        let events = EventBus::new();

        let sub_coordinates = coordinates.clone();
        let sub_cdna = cdna.clone();
        events.subscribe(
            "__coordinate_system_scale_sync",
            Interest::component("coordinate_system"),
            Box::new(move |_event| sync_coordinate_scales(&sub_coordinates, &sub_cdna)),
        );

        let sub_graph = graph.clone();
        let sub_cdna = cdna.clone();
        events.subscribe(
            "__graph_degree_cap_sync",
            Interest::component("graph"),
            Box::new(move |_event| {
                sub_graph.write().max_connections_per_node = sub_cdna.record().max_connections as usize;
            }),
        );

        Self {
            tokens,
            coordinates,
            graph,
            cdna,
            events,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn cdna(&self) -> &CdnaStore {
        self.cdna.as_ref()
    }

    pub fn coordinates(&self) -> &CoordinateSystem {
        self.coordinates.as_ref()
    }

    pub fn token(&self, id: u32) -> Option<Token> {
        self.tokens.read().get(&id).copied()
    }

    /// Registers a token and adds it to the graph's node set. Weight is
    /// clamped into CDNA's current `[weight_min, weight_max]` on ingress
    /// (spec.md §3.1/§7/§8: out-of-range weight is clamped, never rejected).
    pub fn insert_token(&self, mut token: Token) {
        let record = self.cdna.record();
        token.clamp_weight(record.weight_min, record.weight_max);
        let id = token.id;
        let timestamp = token.timestamp;
        self.tokens.write().insert(id, token);
        self.graph.write().add(id, timestamp);
    }

    pub fn remove_token(&self, id: u32) -> bool {
        self.coordinates.remove(id);
        self.graph.write().remove(id);
        self.tokens.write().remove(&id).is_some()
    }

    /// Places coordinates in the spatial index, re-encodes the token's own
    /// fixed-point coordinates using the space's current CDNA-sourced scale
    /// (see `coordinates().scale_of`), and invalidates any cached
    /// inter-token distance touching `id`, per §5's "distance cache
    /// evicted on coordinate change of either endpoint".
    pub fn place(&self, id: u32, coords: &[(CoordinateSpace, f32, f32, f32)]) -> CoreResult<()> {
        self.coordinates.place(id, coords)?;
        if let Some(token) = self.tokens.write().get_mut(&id) {
            for &(space, x, y, z) in coords {
                let scale = self.coordinates.scale_of(space);
                token.set_coordinates_with_scale(space, Some(x), Some(y), Some(z), scale);
            }
        }
        self.graph.write().invalidate_distance_cache_for(id);
        Ok(())
    }

    pub fn connect(
        &self,
        a: u32,
        b: u32,
        kind: ConnectionKind,
        weight: f32,
        confidence: f32,
        directionality: Directionality,
    ) -> CoreResult<EdgeId> {
        self.graph.write().connect(a, b, kind, weight, confidence, directionality)
    }

    pub fn disconnect(&self, a: u32, b: u32) -> bool {
        self.graph.write().disconnect(a, b)
    }

    pub fn path(&self, a: u32, b: u32, max_depth: usize) -> Option<Vec<u32>> {
        self.graph.write().path(a, b, max_depth)
    }

    pub fn update_cdna(&self, new_record: CdnaRecord, affected: HashSet<String>) -> CoreResult<()> {
        self.cdna.update(new_record, affected, &self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_version_is_set() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn connecting_tokens_updates_topology_flags() {
        let store = Store::new(64);
        store.insert_token(Token::new(1));
        store.insert_token(Token::new(2));
        store.connect(1, 2, ConnectionKind::Association, 1.0, 1.0, Directionality::Bidirectional)
            .unwrap();
        let token = store.token(1).unwrap();
        assert!(token.is_root());
        assert!(token.has_flag(token_flags::ACTIVE_GRAPH));
    }

    #[test]
    fn removing_token_clears_it_from_every_subsystem() {
        let store = Store::new(64);
        store.insert_token(Token::new(1));
        store
            .place(1, &[(CoordinateSpace::L1Physical, 1.0, 1.0, 1.0)])
            .unwrap();
        assert!(store.remove_token(1));
        assert!(store.token(1).is_none());
        assert!(store.coordinates().get(1).is_none());
    }

    #[test]
    fn inserting_a_token_clamps_weight_to_cdna_bounds() {
        let store = Store::new(64);
        let mut token = Token::new(1);
        token.weight = 50.0;
        store.insert_token(token);
        let w = store.token(1).unwrap().weight;
        assert_eq!(w, store.cdna().record().weight_max);
    }

    #[test]
    fn cdna_scale_update_changes_token_coordinate_encoding() {
        let store = Store::new(64);
        store.insert_token(Token::new(1));
        store.place(1, &[(CoordinateSpace::L2Sensory, 1.2345, 0.0, 0.0)]).unwrap();
        let coords_before = store.token(1).unwrap().coordinates;
        let before = coords_before[CoordinateSpace::L2Sensory.as_usize()][0];

        let mut record = store.cdna().record();
        record.space_scales[CoordinateSpace::L2Sensory.as_usize()] = 10.0;
        let mut affected = HashSet::new();
        affected.insert("coordinate_system".to_string());
        store.update_cdna(record, affected).unwrap();
        assert_eq!(store.coordinates().scale_of(CoordinateSpace::L2Sensory), 10.0);

        store.place(1, &[(CoordinateSpace::L2Sensory, 1.2345, 0.0, 0.0)]).unwrap();
        let coords_after = store.token(1).unwrap().coordinates;
        let after = coords_after[CoordinateSpace::L2Sensory.as_usize()][0];
        assert_ne!(before, after);
    }

    #[test]
    fn cdna_max_connections_update_changes_enforced_degree_cap() {
        let store = Store::new(64);
        store.insert_token(Token::new(1));
        store.insert_token(Token::new(2));
        store.insert_token(Token::new(3));

        let mut record = store.cdna().record();
        record.max_connections = 1;
        let mut affected = HashSet::new();
        affected.insert("graph".to_string());
        store.update_cdna(record, affected).unwrap();

        store.connect(1, 2, ConnectionKind::Association, 1.0, 1.0, Directionality::Directed)
            .unwrap();
        let err = store
            .connect(1, 3, ConnectionKind::Association, 1.0, 1.0, Directionality::Directed)
            .unwrap_err();
        assert!(matches!(err, CoreError::DegreeCap(1)));
    }

    #[test]
    fn cdna_update_notifies_subscribers() {
        use std::sync::atomic::{AtomicBool, Ordering};
        let store = Store::new(64);
        let seen = std::sync::Arc::new(AtomicBool::new(false));
        let seen_clone = seen.clone();
        store.events().subscribe(
            "coordinate_system",
            Interest::component("coordinate_system"),
            Box::new(move |_event| seen_clone.store(true, Ordering::SeqCst)),
        );
        let mut record = store.cdna().record();
        record.space_scales[0] = 2.0;
        let mut affected = HashSet::new();
        affected.insert("coordinate_system".to_string());
        store.update_cdna(record, affected).unwrap();
        assert!(seen.load(Ordering::SeqCst));
    }
}
