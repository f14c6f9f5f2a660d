//! Spatial-hash spatial index variant (§4.3.2).
//!
//! Coordinates are discretised into integer cells of side `cell_size`.
//! Rectangle queries iterate the inclusive integer cell range; radius
//! queries iterate a bounding cube of side `2r` and filter by true
//! distance. A reverse `token_id -> point` map mirrors the sparse grid.

use std::collections::HashMap;

use super::{Rect, SpatialIndex};

type CellKey = (i64, i64, i64);

pub struct SpatialHash {
    cell_size: f32,
    cells: HashMap<CellKey, Vec<u32>>,
    reverse: HashMap<u32, (f32, f32, f32)>,
    bounds: Option<Rect>,
}

impl SpatialHash {
    pub fn new(cell_size: f32) -> Self {
        assert!(cell_size > 0.0, "cell_size must be positive");
        Self {
            cell_size,
            cells: HashMap::new(),
            reverse: HashMap::new(),
            bounds: None,
        }
    }

    fn cell_of(&self, p: (f32, f32, f32)) -> CellKey {
        (
            (p.0 / self.cell_size).floor() as i64,
            (p.1 / self.cell_size).floor() as i64,
            (p.2 / self.cell_size).floor() as i64,
        )
    }

    fn recompute_bounds(&mut self) {
        self.bounds = self
            .reverse
            .values()
            .fold(None, |acc, &p| Some(Rect::union(acc, p)));
    }
}

impl SpatialIndex for SpatialHash {
    fn insert(&mut self, point: (f32, f32, f32), token_id: u32) {
        let key = self.cell_of(point);
        self.cells.entry(key).or_default().push(token_id);
        self.reverse.insert(token_id, point);
        self.bounds = Some(Rect::union(self.bounds, point));
    }

    fn remove(&mut self, point: (f32, f32, f32), token_id: u32) -> bool {
        let Some(lookup_point) = self.reverse.remove(&token_id) else {
            return false;
        };
        let _ = point;
        let key = self.cell_of(lookup_point);
        let mut removed = false;
        let mut now_empty = false;
        if let Some(cell) = self.cells.get_mut(&key) {
            let before = cell.len();
            cell.retain(|&id| id != token_id);
            removed = cell.len() != before;
            now_empty = cell.is_empty();
        }
        if now_empty {
            self.cells.remove(&key);
        }
        if removed {
            self.recompute_bounds();
        }
        removed
    }

    fn query_point(&self, point: (f32, f32, f32)) -> Vec<u32> {
        let key = self.cell_of(point);
        self.cells.get(&key).cloned().unwrap_or_default()
    }

    fn query_region(&self, rect: Rect) -> Vec<u32> {
        let min_cell = self.cell_of(rect.min);
        let max_cell = self.cell_of(rect.max);
        let mut out = Vec::new();
        for cx in min_cell.0..=max_cell.0 {
            for cy in min_cell.1..=max_cell.1 {
                for cz in min_cell.2..=max_cell.2 {
                    if let Some(cell) = self.cells.get(&(cx, cy, cz)) {
                        for &id in cell {
                            if let Some(&p) = self.reverse.get(&id) {
                                if rect.contains(p) {
                                    out.push(id);
                                }
                            }
                        }
                    }
                }
            }
        }
        out
    }

    fn query_radius_with_distance(&self, center: (f32, f32, f32), r: f32) -> Vec<(u32, f32)> {
        let half_extent = (r / self.cell_size).ceil() as i64;
        let center_cell = self.cell_of(center);
        let mut out = Vec::new();
        for dx in -half_extent..=half_extent {
            for dy in -half_extent..=half_extent {
                for dz in -half_extent..=half_extent {
                    let key = (center_cell.0 + dx, center_cell.1 + dy, center_cell.2 + dz);
                    if let Some(cell) = self.cells.get(&key) {
                        for &id in cell {
                            if let Some(&p) = self.reverse.get(&id) {
                                let d = ((p.0 - center.0).powi(2)
                                    + (p.1 - center.1).powi(2)
                                    + (p.2 - center.2).powi(2))
                                .sqrt();
                                if d <= r {
                                    out.push((id, d));
                                }
                            }
                        }
                    }
                }
            }
        }
        out
    }

    fn bounds(&self) -> Option<Rect> {
        self.bounds
    }

    fn len(&self) -> usize {
        self.reverse.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn knn_growth_matches_scenario_3() {
        let mut idx = SpatialHash::new(5.0);
        idx.insert((0.0, 0.0, 0.0), 1);
        idx.insert((3.0, 0.0, 0.0), 2);
        idx.insert((5.0, 0.0, 0.0), 3);
        idx.insert((20.0, 0.0, 0.0), 4);

        let result = idx.k_nearest((1.0, 0.0, 0.0), 2);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].0, 1);
        assert!((result[0].1 - 1.0).abs() < 1e-4);
        assert_eq!(result[1].0, 2);
        assert!((result[1].1 - 2.0).abs() < 1e-4);
    }

    #[test]
    fn radius_query_filters_by_true_distance() {
        let mut idx = SpatialHash::new(2.0);
        idx.insert((0.0, 0.0, 0.0), 1);
        idx.insert((1.9, 1.9, 0.0), 2); // within cube, outside true radius
        let found = idx.query_radius((0.0, 0.0, 0.0), 1.0);
        assert_eq!(found, vec![1]);
    }
}
