//! Sparse-grid spatial index variant (§4.3.1).
//!
//! Keyed by the quantized coordinate `(round(x,p), round(y,p), round(z,p))`
//! where `p` is the space's decimal precision. A reverse `token_id ->
//! point` map lets `remove` find the right bucket even if the caller's
//! point has drifted slightly from what was last inserted.

use std::collections::HashMap;

use super::{Rect, SpatialIndex};

type CellKey = (i64, i64, i64);

fn quantize(p: (f32, f32, f32), precision: u32) -> CellKey {
    let scale = 10f64.powi(precision as i32);
    (
        (p.0 as f64 * scale).round() as i64,
        (p.1 as f64 * scale).round() as i64,
        (p.2 as f64 * scale).round() as i64,
    )
}

pub struct SparseGrid {
    precision: u32,
    buckets: HashMap<CellKey, Vec<u32>>,
    reverse: HashMap<u32, (f32, f32, f32)>,
    bounds: Option<Rect>,
}

impl SparseGrid {
    pub fn new(precision: u32) -> Self {
        Self {
            precision,
            buckets: HashMap::new(),
            reverse: HashMap::new(),
            bounds: None,
        }
    }

    fn recompute_bounds(&mut self) {
        self.bounds = self
            .reverse
            .values()
            .fold(None, |acc, &p| Some(Rect::union(acc, p)));
    }
}

impl SpatialIndex for SparseGrid {
    fn insert(&mut self, point: (f32, f32, f32), token_id: u32) {
        let key = quantize(point, self.precision);
        self.buckets.entry(key).or_default().push(token_id);
        self.reverse.insert(token_id, point);
        self.bounds = Some(Rect::union(self.bounds, point));
    }

    fn remove(&mut self, point: (f32, f32, f32), token_id: u32) -> bool {
        let Some(lookup_point) = self.reverse.remove(&token_id) else {
            return false;
        };
        let _ = point; // the reverse map is authoritative, per §4.3.1
        let key = quantize(lookup_point, self.precision);
        let mut removed = false;
        let mut now_empty = false;
        if let Some(bucket) = self.buckets.get_mut(&key) {
            let before = bucket.len();
            bucket.retain(|&id| id != token_id);
            removed = bucket.len() != before;
            now_empty = bucket.is_empty();
        }
        if now_empty {
            self.buckets.remove(&key);
        }
        if removed {
            self.recompute_bounds();
        }
        removed
    }

    fn query_point(&self, point: (f32, f32, f32)) -> Vec<u32> {
        let key = quantize(point, self.precision);
        self.buckets.get(&key).cloned().unwrap_or_default()
    }

    fn query_region(&self, rect: Rect) -> Vec<u32> {
        self.reverse
            .iter()
            .filter(|(_, &p)| rect.contains(p))
            .map(|(&id, _)| id)
            .collect()
    }

    fn query_radius_with_distance(&self, center: (f32, f32, f32), r: f32) -> Vec<(u32, f32)> {
        self.reverse
            .iter()
            .filter_map(|(&id, &p)| {
                let d = ((p.0 - center.0).powi(2) + (p.1 - center.1).powi(2) + (p.2 - center.2).powi(2)).sqrt();
                (d <= r).then_some((id, d))
            })
            .collect()
    }

    fn bounds(&self) -> Option<Rect> {
        self.bounds
    }

    fn len(&self) -> usize {
        self.reverse.len()
    }
}
