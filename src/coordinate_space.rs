//! C2 - Coordinate space model.
//!
//! Immutable per-space configuration: range, precision, scale and the
//! spatial index kind to use for that space. Scales are normally sourced
//! from CDNA's GRID_PHYSICS section and may change at runtime (see
//! `coordinate_system` and `cdna`).

use crate::token::{CoordinateSpace, SCALE_FACTORS};

/// Which spatial index implementation a space should be served by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    SparseGrid,
    SpatialHash,
}

/// Immutable per-space parameters.
#[derive(Debug, Clone, Copy)]
pub struct SpaceConfig {
    pub space: CoordinateSpace,
    pub min: f32,
    pub max: f32,
    /// Decimal places used by the sparse-grid quantization key.
    pub precision: u32,
    /// Cell side length used by the spatial-hash variant.
    pub cell_size: f32,
    pub scale: f32,
    pub index_kind: IndexKind,
}

impl SpaceConfig {
    pub const fn new(
        space: CoordinateSpace,
        min: f32,
        max: f32,
        precision: u32,
        cell_size: f32,
        index_kind: IndexKind,
    ) -> Self {
        Self {
            space,
            min,
            max,
            precision,
            cell_size,
            scale: SCALE_FACTORS[space.as_usize()],
            index_kind,
        }
    }

    /// Validate a single decoded axis value against this space's range.
    pub fn validate_coordinate(&self, v: f32) -> bool {
        v.is_finite() && v >= self.min && v <= self.max
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }
}

/// Default configuration for all 8 spaces. L1 (continuous 3D) and L7
/// (temporal, sparse/bursty) use the spatial-hash variant; the more
/// densely-packed semantic spaces use the sparse grid.
pub fn default_space_configs() -> [SpaceConfig; 8] {
    use CoordinateSpace::*;
    [
        SpaceConfig::new(L1Physical, -327.67, 327.67, 2, 0.5, IndexKind::SpatialHash),
        SpaceConfig::new(L2Sensory, -3.2767, 3.2767, 4, 0.1, IndexKind::SparseGrid),
        SpaceConfig::new(L3Motor, -32.767, 32.767, 3, 0.1, IndexKind::SparseGrid),
        SpaceConfig::new(L4Emotional, -3.2767, 3.2767, 4, 0.1, IndexKind::SparseGrid),
        SpaceConfig::new(L5Cognitive, -3.2767, 3.2767, 4, 0.1, IndexKind::SparseGrid),
        SpaceConfig::new(L6Social, -3.2767, 3.2767, 4, 0.1, IndexKind::SparseGrid),
        SpaceConfig::new(L7Temporal, -327.67, 327.67, 2, 1.0, IndexKind::SpatialHash),
        SpaceConfig::new(L8Abstract, -3.2767, 3.2767, 4, 0.1, IndexKind::SparseGrid),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_configs_cover_all_spaces() {
        let configs = default_space_configs();
        for (i, cfg) in configs.iter().enumerate() {
            assert_eq!(cfg.space.as_usize(), i);
        }
    }

    #[test]
    fn validate_coordinate_respects_range() {
        let cfg = default_space_configs()[0];
        assert!(cfg.validate_coordinate(10.0));
        assert!(!cfg.validate_coordinate(1000.0));
        assert!(!cfg.validate_coordinate(f32::NAN));
    }
}
