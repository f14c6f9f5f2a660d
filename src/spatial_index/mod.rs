//! C3 - Spatial index.
//!
//! Two interchangeable index kinds implement the same `SpatialIndex`
//! trait: a sparse grid keyed by quantized coordinates, and a spatial hash
//! keyed by fixed-size integer cells. Both store coordinates in canonical
//! float space and quantize on demand, so a CDNA scale change never
//! invalidates stored positions (see `SPEC_FULL.md` §4.3, §9).

mod sparse_grid;
mod spatial_hash;

pub use sparse_grid::SparseGrid;
pub use spatial_hash::SpatialHash;

use crate::token::CoordinateSpace;

/// A point in one coordinate space. Carries the space tag so callers can
/// assert they're querying the index that actually owns it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point3D {
    pub space: CoordinateSpace,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3D {
    pub fn new(space: CoordinateSpace, x: f32, y: f32, z: f32) -> Self {
        Self { space, x, y, z }
    }

    pub fn distance(&self, other: &Point3D) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2)).sqrt()
    }
}

/// Axis-aligned box, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub min: (f32, f32, f32),
    pub max: (f32, f32, f32),
}

impl Rect {
    pub fn new(min: (f32, f32, f32), max: (f32, f32, f32)) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, p: (f32, f32, f32)) -> bool {
        p.0 >= self.min.0
            && p.0 <= self.max.0
            && p.1 >= self.min.1
            && p.1 <= self.max.1
            && p.2 >= self.min.2
            && p.2 <= self.max.2
    }

    fn union(a: Option<Rect>, p: (f32, f32, f32)) -> Rect {
        match a {
            None => Rect::new(p, p),
            Some(r) => Rect::new(
                (r.min.0.min(p.0), r.min.1.min(p.1), r.min.2.min(p.2)),
                (r.max.0.max(p.0), r.max.1.max(p.1), r.max.2.max(p.2)),
            ),
        }
    }
}

/// Starting radius for k-NN growth (§4.3.3).
pub const KNN_INITIAL_RADIUS: f32 = 0.1;
/// Give up growing the k-NN search radius past this value.
pub const KNN_CEILING_RADIUS: f32 = 1.0e6;

/// Shared contract for both spatial index variants.
pub trait SpatialIndex: Send + Sync {
    fn insert(&mut self, point: (f32, f32, f32), token_id: u32);
    fn remove(&mut self, point: (f32, f32, f32), token_id: u32) -> bool;
    fn query_point(&self, point: (f32, f32, f32)) -> Vec<u32>;
    fn query_region(&self, rect: Rect) -> Vec<u32>;

    /// All candidate ids with their true distance to `center`, within `r`.
    fn query_radius_with_distance(&self, center: (f32, f32, f32), r: f32) -> Vec<(u32, f32)>;

    fn bounds(&self) -> Option<Rect>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn query_radius(&self, center: (f32, f32, f32), r: f32) -> Vec<u32> {
        self.query_radius_with_distance(center, r)
            .into_iter()
            .map(|(id, _)| id)
            .collect()
    }

    /// k nearest neighbours, sorted non-decreasing by distance.
    ///
    /// Grows the search radius geometrically from `KNN_INITIAL_RADIUS`
    /// until `k` candidates are found or `KNN_CEILING_RADIUS` is exceeded
    /// (§4.3.3).
    fn k_nearest(&self, point: (f32, f32, f32), k: usize) -> Vec<(u32, f32)> {
        if k == 0 {
            return Vec::new();
        }
        let mut radius = KNN_INITIAL_RADIUS;
        let mut found;
        loop {
            found = self.query_radius_with_distance(point, radius);
            if found.len() >= k || radius > KNN_CEILING_RADIUS {
                break;
            }
            radius *= 2.0;
        }
        found.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        found.truncate(k);
        found
    }

    /// Count within radius divided by sphere volume.
    fn density(&self, center: (f32, f32, f32), r: f32) -> f32 {
        if r <= 0.0 {
            return 0.0;
        }
        let count = self.query_radius_with_distance(center, r).len() as f32;
        let volume = (4.0 / 3.0) * std::f32::consts::PI * r.powi(3);
        count / volume
    }

    /// Kernel-weighted sum of field strengths. `field_of` maps a token id
    /// to its `(field_radius, field_strength)` in decoded units; tokens
    /// with `field_radius <= 0` contribute nothing.
    fn field_influence(
        &self,
        center: (f32, f32, f32),
        r: f32,
        field_of: &dyn Fn(u32) -> Option<(f32, f32)>,
    ) -> f32 {
        let mut total = 0.0f32;
        for (id, dist) in self.query_radius_with_distance(center, r) {
            if let Some((field_radius, field_strength)) = field_of(id) {
                if field_radius > 0.0 && dist <= field_radius {
                    total += field_strength * (1.0 - dist / field_radius).max(0.0);
                }
            }
        }
        total
    }
}

#[cfg(test)]
mod trait_tests {
    use super::*;

    #[test]
    fn rect_contains_inclusive_bounds() {
        let r = Rect::new((0.0, 0.0, 0.0), (1.0, 1.0, 1.0));
        assert!(r.contains((0.0, 0.0, 0.0)));
        assert!(r.contains((1.0, 1.0, 1.0)));
        assert!(!r.contains((1.1, 0.0, 0.0)));
    }
}
