//! C4 - CoordinateSystem: owns tokens' positions across all eight spaces
//! and routes queries to the right per-space `SpatialIndex`.
//!
//! Grounded on the teacher's `Grid` facade (owns one index per semantic
//! layer, exposes a single point/region/radius query surface) generalised
//! from a single 3-D grid to eight independently configured spaces.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::coordinate_space::{IndexKind, SpaceConfig};
use crate::error::{CoreError, CoreResult};
use crate::spatial_index::{Point3D, Rect, SparseGrid, SpatialHash, SpatialIndex};
use crate::token::CoordinateSpace;

/// A token's positions across the subset of spaces it occupies.
#[derive(Debug, Clone, Default)]
pub struct MultiCoordinate {
    points: HashMap<CoordinateSpace, (f32, f32, f32)>,
}

impl MultiCoordinate {
    pub fn get(&self, space: CoordinateSpace) -> Option<(f32, f32, f32)> {
        self.points.get(&space).copied()
    }

    pub fn spaces(&self) -> impl Iterator<Item = CoordinateSpace> + '_ {
        self.points.keys().copied()
    }
}

fn build_index(config: &SpaceConfig) -> Box<dyn SpatialIndex> {
    match config.index_kind {
        IndexKind::SparseGrid => Box::new(SparseGrid::new(config.precision)),
        IndexKind::SpatialHash => Box::new(SpatialHash::new(config.cell_size)),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CoordinateSystemStats {
    pub tokens_placed: u64,
    pub tokens_removed: u64,
}

/// Owns the per-space indexes and the token -> multi-coordinate registry.
/// Per-space locks are acquired after releasing the registry lock where
/// possible, matching §5's "minimise held breadth" rule. `configs` is
/// behind its own lock so `apply_scales` can be driven reactively from a
/// CDNA-update subscriber, which only ever has shared access.
pub struct CoordinateSystem {
    configs: RwLock<[SpaceConfig; 8]>,
    indexes: [RwLock<Box<dyn SpatialIndex>>; 8],
    registry: RwLock<HashMap<u32, MultiCoordinate>>,
    stats: RwLock<CoordinateSystemStats>,
}

impl CoordinateSystem {
    pub fn new(configs: [SpaceConfig; 8]) -> Self {
        let indexes = std::array::from_fn(|i| RwLock::new(build_index(&configs[i])));
        Self {
            configs: RwLock::new(configs),
            indexes,
            registry: RwLock::new(HashMap::new()),
            stats: RwLock::new(CoordinateSystemStats::default()),
        }
    }

    pub fn with_default_configs() -> Self {
        Self::new(crate::coordinate_space::default_space_configs())
    }

    pub fn stats(&self) -> CoordinateSystemStats {
        *self.stats.read()
    }

    /// Current per-space scale, as last set by `apply_scales` (or the
    /// compile-time default if CDNA has never pushed an update).
    pub fn scale_of(&self, space: CoordinateSpace) -> f32 {
        self.configs.read()[space.as_usize()].scale
    }

    fn validate(&self, space: CoordinateSpace, point: (f32, f32, f32)) -> CoreResult<()> {
        let cfg = self.configs.read()[space.as_usize()];
        for (axis, v) in [("x", point.0), ("y", point.1), ("z", point.2)] {
            if !cfg.validate_coordinate(v) {
                return Err(CoreError::OutOfRange {
                    space: space.name(),
                    axis,
                    value: v,
                });
            }
        }
        Ok(())
    }

    /// Place (or replace) a token's positions. On any validation failure
    /// no index is mutated (§4.4: rollback to the pre-call state).
    pub fn place(&self, token_id: u32, coords: &[(CoordinateSpace, f32, f32, f32)]) -> CoreResult<()> {
        for &(space, x, y, z) in coords {
            self.validate(space, (x, y, z))?;
        }

        self.remove(token_id);

        let mut multi = MultiCoordinate::default();
        for &(space, x, y, z) in coords {
            self.indexes[space.as_usize()].write().insert((x, y, z), token_id);
            multi.points.insert(space, (x, y, z));
        }
        self.registry.write().insert(token_id, multi);
        self.stats.write().tokens_placed += 1;
        Ok(())
    }

    /// Equivalent to `remove` followed by `place` with `new_coords`.
    pub fn move_token(&self, token_id: u32, new_coords: &[(CoordinateSpace, f32, f32, f32)]) -> CoreResult<()> {
        self.place(token_id, new_coords)
    }

    /// Removes the token from every space it occupied and from the
    /// registry. Returns `false` if the token was unknown.
    pub fn remove(&self, token_id: u32) -> bool {
        let Some(multi) = self.registry.write().remove(&token_id) else {
            return false;
        };
        for (space, point) in multi.points {
            self.indexes[space.as_usize()].write().remove(point, token_id);
        }
        self.stats.write().tokens_removed += 1;
        true
    }

    pub fn get(&self, token_id: u32) -> Option<MultiCoordinate> {
        self.registry.read().get(&token_id).cloned()
    }

    pub fn find_in_region(&self, rect: Rect, level: CoordinateSpace) -> Vec<u32> {
        self.indexes[level.as_usize()].read().query_region(rect)
    }

    pub fn find_in_radius(&self, center: (f32, f32, f32), level: CoordinateSpace, r: f32) -> Vec<u32> {
        self.indexes[level.as_usize()].read().query_radius(center, r)
    }

    pub fn k_nearest(&self, point: (f32, f32, f32), level: CoordinateSpace, k: usize) -> Vec<(u32, f32)> {
        self.indexes[level.as_usize()].read().k_nearest(point, k)
    }

    pub fn density(&self, center: (f32, f32, f32), level: CoordinateSpace, r: f32) -> f32 {
        self.indexes[level.as_usize()].read().density(center, r)
    }

    pub fn field_influence(
        &self,
        center: (f32, f32, f32),
        level: CoordinateSpace,
        r: f32,
        field_of: &dyn Fn(u32) -> Option<(f32, f32)>,
    ) -> f32 {
        self.indexes[level.as_usize()].read().field_influence(center, r, field_of)
    }

    /// Intersection, across every level present in `query`, of the ids
    /// within `tol` of that level's query point.
    pub fn find_across_levels(&self, query: &[(CoordinateSpace, Point3D)], tol: f32) -> Vec<u32> {
        let mut sets = query.iter().map(|&(level, point)| {
            let ids = self.find_in_radius((point.x, point.y, point.z), level, tol);
            ids.into_iter().collect::<std::collections::HashSet<u32>>()
        });
        let Some(first) = sets.next() else {
            return Vec::new();
        };
        let mut result = first;
        for set in sets {
            result.retain(|id| set.contains(id));
        }
        let mut out: Vec<u32> = result.into_iter().collect();
        out.sort_unstable();
        out
    }

    /// Coordinates of `token_ids` in `target_level`, omitting tokens absent
    /// there.
    pub fn project(&self, token_ids: &[u32], target_level: CoordinateSpace) -> Vec<Point3D> {
        let registry = self.registry.read();
        token_ids
            .iter()
            .filter_map(|id| registry.get(id))
            .filter_map(|multi| multi.get(target_level))
            .map(|(x, y, z)| Point3D::new(target_level, x, y, z))
            .collect()
    }

    /// Applies per-level scales read from a GRID_PHYSICS hot slice. Per §4.4
    /// and §9 choice (a), both index variants quantize from canonical float
    /// storage on demand, so a scale change never requires re-indexing
    /// existing points; it does change how subsequent `Token` coordinate
    /// encode/decode calls interpret fixed-point bytes (see
    /// `Store::place`/`scale_of`). Called once at `Store` construction and
    /// again on every `CdnaUpdated` event affecting this component.
    pub fn apply_scales(&self, scales: [f32; 8]) {
        let mut configs = self.configs.write();
        for (i, scale) in scales.into_iter().enumerate() {
            configs[i] = configs[i].with_scale(scale);
        }
    }
}
