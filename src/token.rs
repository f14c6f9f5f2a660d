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

//! Token - the 64-byte atomic unit of the store.
//!
//! Binary layout (little-endian, 64 bytes total):
//! - coordinates: 48 bytes (8 spaces x 3 axes x i16)
//! - id: 4 bytes (u32)
//! - flags: 2 bytes (u16)
//! - weight: 4 bytes (f32)
//! - field_radius: 1 byte (u8)
//! - field_strength: 1 byte (u8)
//! - timestamp: 4 bytes (u32)

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{CoreError, CoreResult};

/// Sentinel stored in the first axis of a coordinate triple to mean "this
/// token is not positioned in this space".
pub const UNSET_SENTINEL: i16 = 127;

/// The eight fixed coordinate spaces, L1 (Physical) through L8 (Abstract).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoordinateSpace {
    L1Physical = 0,
    L2Sensory = 1,
    L3Motor = 2,
    L4Emotional = 3,
    L5Cognitive = 4,
    L6Social = 5,
    L7Temporal = 6,
    L8Abstract = 7,
}

impl CoordinateSpace {
    pub const ALL: [CoordinateSpace; 8] = [
        CoordinateSpace::L1Physical,
        CoordinateSpace::L2Sensory,
        CoordinateSpace::L3Motor,
        CoordinateSpace::L4Emotional,
        CoordinateSpace::L5Cognitive,
        CoordinateSpace::L6Social,
        CoordinateSpace::L7Temporal,
        CoordinateSpace::L8Abstract,
    ];

    #[inline]
    pub const fn as_usize(self) -> usize {
        self as usize
    }

    pub const fn from_usize(idx: usize) -> Option<Self> {
        match idx {
            0 => Some(CoordinateSpace::L1Physical),
            1 => Some(CoordinateSpace::L2Sensory),
            2 => Some(CoordinateSpace::L3Motor),
            3 => Some(CoordinateSpace::L4Emotional),
            4 => Some(CoordinateSpace::L5Cognitive),
            5 => Some(CoordinateSpace::L6Social),
            6 => Some(CoordinateSpace::L7Temporal),
            7 => Some(CoordinateSpace::L8Abstract),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            CoordinateSpace::L1Physical => "L1_Physical",
            CoordinateSpace::L2Sensory => "L2_Sensory",
            CoordinateSpace::L3Motor => "L3_Motor",
            CoordinateSpace::L4Emotional => "L4_Emotional",
            CoordinateSpace::L5Cognitive => "L5_Cognitive",
            CoordinateSpace::L6Social => "L6_Social",
            CoordinateSpace::L7Temporal => "L7_Temporal",
            CoordinateSpace::L8Abstract => "L8_Abstract",
        }
    }
}

/// Entity types, stored in flag bits 8-11.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityType {
    Undefined = 0x0000,
    Object = 0x0100,
    Event = 0x0200,
    State = 0x0300,
    Process = 0x0400,
    Concept = 0x0500,
    Relation = 0x0600,
    Pattern = 0x0700,
    Rule = 0x0800,
    Goal = 0x0900,
    Memory = 0x0A00,
    Sensor = 0x0B00,
    Actuator = 0x0C00,
    Controller = 0x0D00,
    Buffer = 0x0E00,
    Reserved = 0x0F00,
}

/// Flag bit layout: `{system_flags:8 | entity_type_mirror:4 | user_flags:4}`.
///
/// The 8 system-flag bits are further split: bits 0-4 are independent
/// boolean flags, bits 5-7 form a small "topology class" encoding
/// (none/leaf/root/hub) since `active_graph`, `hub`, `leaf` and `root` are
/// mutually exclusive outcomes of a single degree check (§4.5) and do not
/// need four independent bits.
pub mod flags {
    pub const ACTIVE: u16 = 0x0001;
    pub const PERSISTENT: u16 = 0x0002;
    pub const MUTABLE: u16 = 0x0004;
    pub const DIRTY: u16 = 0x0008;
    pub const LOCKED: u16 = 0x0010;
    pub const ACTIVE_GRAPH: u16 = 0x0020;

    /// Topology class, bits 6-7 (values 0..=3 shifted into place).
    pub const TOPOLOGY_CLASS_MASK: u16 = 0x00C0;
    pub const TOPOLOGY_NONE: u16 = 0 << 6;
    pub const TOPOLOGY_LEAF: u16 = 1 << 6;
    pub const TOPOLOGY_ROOT: u16 = 2 << 6;
    pub const TOPOLOGY_HUB: u16 = 3 << 6;

    pub const ENTITY_TYPE_MASK: u16 = 0x0F00;

    pub const USER_1: u16 = 0x1000;
    pub const USER_2: u16 = 0x2000;
    pub const USER_3: u16 = 0x4000;
    pub const USER_4: u16 = 0x8000;
}

/// Per-space scale factor: `encoded = round(value * scale)`.
/// L7 (temporal) uses a different scale on Z than on X,Y.
pub const SCALE_FACTORS: [f32; 8] = [
    100.0,   // L1 Physical: +/-327.67 m
    10000.0, // L2 Sensory
    1000.0,  // L3 Motor
    10000.0, // L4 Emotional
    10000.0, // L5 Cognitive
    10000.0, // L6 Social
    100.0,   // L7 Temporal (X,Y: +/-327.67s)
    10000.0, // L8 Abstract
];

/// L7's Z axis (duration/extent) uses a coarser scale than its X,Y axes.
pub const L7_Z_SCALE: f32 = 1.0;

const COORD_CLAMP: f32 = 32767.0;

/// Token - 64-byte binary record positioned in up to 8 coordinate spaces.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct Token {
    /// 8 spaces x 3 axes (X, Y, Z) as fixed-point i16.
    pub coordinates: [[i16; 3]; 8],
    /// `{domain:4 | entity_type:4 | local_id:24}`.
    pub id: u32,
    /// `{system_flags:8 | entity_type_mirror:4 | user_flags:4}`.
    pub flags: u16,
    pub weight: f32,
    /// Fixed-point, `/100` -> meters.
    pub field_radius: u8,
    /// Fixed-point, `/255` -> `[0,1]`.
    pub field_strength: u8,
    pub timestamp: u32,
}

const _: () = assert!(std::mem::size_of::<Token>() == 64);

impl Token {
    pub fn new(id: u32) -> Self {
        Self {
            coordinates: [[UNSET_SENTINEL, 0, 0]; 8],
            id,
            flags: flags::ACTIVE,
            weight: 0.0,
            field_radius: 0,
            field_strength: 0,
            timestamp: Self::current_timestamp(),
        }
    }

    pub fn current_timestamp() -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_secs() as u32
    }

    fn scale_for_axis(space: CoordinateSpace, axis: usize) -> f32 {
        if space == CoordinateSpace::L7Temporal && axis == 2 {
            L7_Z_SCALE
        } else {
            SCALE_FACTORS[space.as_usize()]
        }
    }

    /// Encode one axis value, clamped to `[-32767, 32767]`.
    pub fn encode_axis(value: f32, space: CoordinateSpace, axis: usize) -> i16 {
        let scale = Self::scale_for_axis(space, axis);
        (value * scale).round().clamp(-COORD_CLAMP, COORD_CLAMP) as i16
    }

    /// Decode one axis value.
    pub fn decode_axis(encoded: i16, space: CoordinateSpace, axis: usize) -> f32 {
        let scale = Self::scale_for_axis(space, axis);
        (encoded as f32) / scale
    }

    /// Encode one axis value against an explicit scale rather than the
    /// compile-time default, for callers sourcing scale from CDNA's
    /// GRID_PHYSICS section (see `CoordinateSystem::scale_of`).
    pub fn encode_axis_scaled(value: f32, scale: f32) -> i16 {
        (value * scale).round().clamp(-COORD_CLAMP, COORD_CLAMP) as i16
    }

    /// Decode one axis value against an explicit scale.
    pub fn decode_axis_scaled(encoded: i16, scale: f32) -> f32 {
        (encoded as f32) / scale
    }

    /// Set coordinates for a space. `None` on any axis writes the sentinel
    /// on the X axis and suppresses the space entirely (per spec: the
    /// sentinel on the *first* axis alone decides presence).
    pub fn set_coordinates(
        &mut self,
        space: CoordinateSpace,
        x: Option<f32>,
        y: Option<f32>,
        z: Option<f32>,
    ) {
        let idx = space.as_usize();
        match x {
            Some(x) => {
                self.coordinates[idx][0] = Self::encode_axis(x, space, 0);
                self.coordinates[idx][1] = y.map_or(0, |v| Self::encode_axis(v, space, 1));
                self.coordinates[idx][2] = z.map_or(0, |v| Self::encode_axis(v, space, 2));
            }
            None => {
                self.coordinates[idx] = [UNSET_SENTINEL, 0, 0];
            }
        }
    }

    /// Convenience setter for all-present coordinates.
    pub fn set_coordinates_xyz(&mut self, space: CoordinateSpace, x: f32, y: f32, z: f32) {
        self.set_coordinates(space, Some(x), Some(y), Some(z));
    }

    /// Like `set_coordinates`, but against an explicit per-space scale
    /// (applied uniformly to all three axes) instead of the compile-time
    /// `SCALE_FACTORS` default. Used when the caller sources scale from a
    /// CDNA-backed `CoordinateSystem`.
    pub fn set_coordinates_with_scale(
        &mut self,
        space: CoordinateSpace,
        x: Option<f32>,
        y: Option<f32>,
        z: Option<f32>,
        scale: f32,
    ) {
        let idx = space.as_usize();
        match x {
            Some(x) => {
                self.coordinates[idx][0] = Self::encode_axis_scaled(x, scale);
                self.coordinates[idx][1] = y.map_or(0, |v| Self::encode_axis_scaled(v, scale));
                self.coordinates[idx][2] = z.map_or(0, |v| Self::encode_axis_scaled(v, scale));
            }
            None => {
                self.coordinates[idx] = [UNSET_SENTINEL, 0, 0];
            }
        }
    }

    /// Counterpart to `get_coordinates` for a token whose coordinates were
    /// written with an explicit scale.
    pub fn get_coordinates_with_scale(&self, space: CoordinateSpace, scale: f32) -> Option<(f32, f32, f32)> {
        let idx = space.as_usize();
        let raw = self.coordinates[idx];
        if raw[0] == UNSET_SENTINEL {
            return None;
        }
        Some((
            Self::decode_axis_scaled(raw[0], scale),
            Self::decode_axis_scaled(raw[1], scale),
            Self::decode_axis_scaled(raw[2], scale),
        ))
    }

    /// `None` iff the space's first axis holds the sentinel.
    pub fn get_coordinates(&self, space: CoordinateSpace) -> Option<(f32, f32, f32)> {
        let idx = space.as_usize();
        let raw = self.coordinates[idx];
        if raw[0] == UNSET_SENTINEL {
            return None;
        }
        Some((
            Self::decode_axis(raw[0], space, 0),
            Self::decode_axis(raw[1], space, 1),
            Self::decode_axis(raw[2], space, 2),
        ))
    }

    pub fn set_entity_type(&mut self, entity_type: EntityType) {
        self.flags = (self.flags & !flags::ENTITY_TYPE_MASK) | (entity_type as u16);
    }

    pub fn get_entity_type(&self) -> EntityType {
        match self.flags & flags::ENTITY_TYPE_MASK {
            0x0000 => EntityType::Undefined,
            0x0100 => EntityType::Object,
            0x0200 => EntityType::Event,
            0x0300 => EntityType::State,
            0x0400 => EntityType::Process,
            0x0500 => EntityType::Concept,
            0x0600 => EntityType::Relation,
            0x0700 => EntityType::Pattern,
            0x0800 => EntityType::Rule,
            0x0900 => EntityType::Goal,
            0x0A00 => EntityType::Memory,
            0x0B00 => EntityType::Sensor,
            0x0C00 => EntityType::Actuator,
            0x0D00 => EntityType::Controller,
            0x0E00 => EntityType::Buffer,
            _ => EntityType::Reserved,
        }
    }

    #[inline]
    pub fn has_flag(&self, flag: u16) -> bool {
        (self.flags & flag) != 0
    }

    #[inline]
    pub fn set_flag(&mut self, flag: u16) {
        self.flags |= flag;
    }

    #[inline]
    pub fn clear_flag(&mut self, flag: u16) {
        self.flags &= !flag;
    }

    pub fn is_active(&self) -> bool {
        self.has_flag(flags::ACTIVE)
    }

    /// Recompute the graph-topology class bits from a node's degree, per
    /// the "flag maintenance" rule in §4.5: clear `{active_graph, hub,
    /// leaf, root}`, then set according to degree.
    pub fn apply_graph_degree(&mut self, degree: usize) {
        self.flags &= !(flags::ACTIVE_GRAPH | flags::TOPOLOGY_CLASS_MASK);
        let class = if degree > 10 {
            flags::TOPOLOGY_HUB
        } else if degree == 0 {
            flags::TOPOLOGY_LEAF
        } else if degree == 1 {
            flags::TOPOLOGY_ROOT
        } else {
            flags::TOPOLOGY_NONE
        };
        self.flags |= class;
        if degree > 0 {
            self.flags |= flags::ACTIVE_GRAPH;
        }
    }

    pub fn is_hub(&self) -> bool {
        (self.flags & flags::TOPOLOGY_CLASS_MASK) == flags::TOPOLOGY_HUB
    }

    pub fn is_leaf(&self) -> bool {
        (self.flags & flags::TOPOLOGY_CLASS_MASK) == flags::TOPOLOGY_LEAF
    }

    pub fn is_root(&self) -> bool {
        (self.flags & flags::TOPOLOGY_CLASS_MASK) == flags::TOPOLOGY_ROOT
    }

    /// Encode field_radius (meters, 0.00-2.55 -> 0-255).
    pub fn set_field_radius(&mut self, radius: f32) {
        self.field_radius = (radius * 100.0).round().clamp(0.0, 255.0) as u8;
    }

    pub fn get_field_radius(&self) -> f32 {
        (self.field_radius as f32) / 100.0
    }

    /// Encode field_strength (0.0-1.0 -> 0-255).
    pub fn set_field_strength(&mut self, strength: f32) {
        self.field_strength = (strength * 255.0).round().clamp(0.0, 255.0) as u8;
    }

    pub fn get_field_strength(&self) -> f32 {
        (self.field_strength as f32) / 255.0
    }

    pub fn local_id(&self) -> u32 {
        self.id & 0x00FF_FFFF
    }

    pub fn id_entity_type(&self) -> u8 {
        ((self.id >> 24) & 0x0F) as u8
    }

    pub fn domain(&self) -> u8 {
        ((self.id >> 28) & 0x0F) as u8
    }

    pub fn create_id(local_id: u32, entity_type: u8, domain: u8) -> u32 {
        ((domain as u32 & 0x0F) << 28) | ((entity_type as u32 & 0x0F) << 24) | (local_id & 0x00FF_FFFF)
    }

    /// Checks `weight` against `[min, max]` without mutating the token.
    /// Returns a `ValidationFailed` report naming the offending value so
    /// `clamp_weight` (and any other CDNA-driven ingress check) can log it.
    pub fn validate(&self, min: f32, max: f32) -> CoreResult<()> {
        let w = self.weight;
        if w < min || w > max {
            return Err(CoreError::ValidationFailed(format!(
                "token {} weight {w} out of range [{min}, {max}]",
                self.id
            )));
        }
        Ok(())
    }

    /// Clamp weight into `[min, max]`; never rejects, only clamps+warns
    /// (spec.md §7: `ValidationFailed` on token weight is a clamp, not a
    /// rejection).
    pub fn clamp_weight(&mut self, min: f32, max: f32) {
        if let Err(CoreError::ValidationFailed(detail)) = self.validate(min, max) {
            let clamped = self.weight.clamp(min, max);
            tracing::warn!(token_id = self.id, detail = %detail, clamped, "token weight out of range, clamped");
            self.weight = clamped;
        }
    }

    /// Serialize to the 64-byte little-endian wire format.
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        let mut off = 0usize;
        for space in &self.coordinates {
            for axis in space {
                out[off..off + 2].copy_from_slice(&axis.to_le_bytes());
                off += 2;
            }
        }
        out[off..off + 4].copy_from_slice(&self.id.to_le_bytes());
        off += 4;
        out[off..off + 2].copy_from_slice(&self.flags.to_le_bytes());
        off += 2;
        out[off..off + 4].copy_from_slice(&self.weight.to_le_bytes());
        off += 4;
        out[off] = self.field_radius;
        off += 1;
        out[off] = self.field_strength;
        off += 1;
        out[off..off + 4].copy_from_slice(&self.timestamp.to_le_bytes());
        off += 4;
        debug_assert_eq!(off, 64);
        out
    }

    /// Deserialize from the 64-byte wire format.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        if bytes.len() != 64 {
            return Err(CoreError::MalformedToken("expected exactly 64 bytes"));
        }
        let mut coordinates = [[0i16; 3]; 8];
        let mut off = 0usize;
        for space in coordinates.iter_mut() {
            for axis in space.iter_mut() {
                *axis = i16::from_le_bytes([bytes[off], bytes[off + 1]]);
                off += 2;
            }
        }
        let id = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
        off += 4;
        let flags = u16::from_le_bytes(bytes[off..off + 2].try_into().unwrap());
        off += 2;
        let weight = f32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
        off += 4;
        let field_radius = bytes[off];
        off += 1;
        let field_strength = bytes[off];
        off += 1;
        let timestamp = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap());
        off += 4;
        debug_assert_eq!(off, 64);

        if !weight.is_finite() {
            return Err(CoreError::MalformedToken("weight is not finite"));
        }

        Ok(Self {
            coordinates,
            id,
            flags,
            weight,
            field_radius,
            field_strength,
            timestamp,
        })
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Copy packed fields out first; taking a reference to a packed
        // field is unsound if misaligned.
        let id = self.id;
        let flags = self.flags;
        let weight = self.weight;
        let timestamp = self.timestamp;

        f.debug_struct("Token")
            .field("id", &id)
            .field("local_id", &self.local_id())
            .field("entity_type", &self.get_entity_type())
            .field("domain", &self.domain())
            .field("flags", &format!("{:#06x}", flags))
            .field("weight", &weight)
            .field("field_radius", &self.get_field_radius())
            .field("field_strength", &self.get_field_strength())
            .field("timestamp", &timestamp)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_64_bytes() {
        assert_eq!(std::mem::size_of::<Token>(), 64);
    }

    #[test]
    fn round_trip_scenario_1() {
        let mut token = Token::new(Token::create_id(0x020007, 1, 0));
        token.set_coordinates_xyz(CoordinateSpace::L1Physical, 10.5, 20.3, 1.5);
        token.weight = 0.7;
        token.set_field_radius(1.0);
        token.set_field_strength(1.0);

        let bytes = token.to_bytes();
        assert_eq!(bytes.len(), 64);

        let back = Token::from_bytes(&bytes).unwrap();
        let w = back.weight;
        assert_eq!(w, 0.7);
        let (x, y, z) = back.get_coordinates(CoordinateSpace::L1Physical).unwrap();
        assert!((x - 10.5).abs() < 0.01);
        assert!((y - 20.3).abs() < 0.01);
        assert!((z - 1.5).abs() < 0.01);
        assert_eq!(back.field_radius, 100);
        assert_eq!(back.field_strength, 255);
    }

    #[test]
    fn unset_space_decodes_to_none() {
        let token = Token::new(1);
        assert!(token.get_coordinates(CoordinateSpace::L1Physical).is_none());
    }

    #[test]
    fn coordinate_saturates_without_panic() {
        let encoded = Token::encode_axis(1.0e9, CoordinateSpace::L1Physical, 0);
        assert_eq!(encoded, 32767);
        let encoded_neg = Token::encode_axis(-1.0e9, CoordinateSpace::L1Physical, 0);
        assert_eq!(encoded_neg, -32767);
    }

    #[test]
    fn weight_clamps_instead_of_rejecting() {
        let mut token = Token::new(1);
        token.weight = 5.0;
        token.clamp_weight(0.0, 1.0);
        let w = token.weight;
        assert_eq!(w, 1.0);
    }

    #[test]
    fn validate_reports_out_of_range_weight() {
        let mut token = Token::new(1);
        token.weight = 5.0;
        let err = token.validate(0.0, 1.0).unwrap_err();
        assert!(matches!(err, CoreError::ValidationFailed(_)));
        assert!(token.validate(0.0, 10.0).is_ok());
    }

    #[test]
    fn coordinates_with_scale_round_trip_and_track_overrides() {
        let mut token = Token::new(1);
        token.set_coordinates_with_scale(CoordinateSpace::L2Sensory, Some(1.25), Some(0.0), Some(0.0), 100.0);
        let (x, _, _) = token.get_coordinates_with_scale(CoordinateSpace::L2Sensory, 100.0).unwrap();
        assert!((x - 1.25).abs() < 0.01);

        // A different scale decodes the same stored bytes differently,
        // the behavior a CDNA scale update is supposed to produce.
        let (x_other, _, _) = token.get_coordinates_with_scale(CoordinateSpace::L2Sensory, 50.0).unwrap();
        assert!((x_other - 2.5).abs() < 0.01);
    }

    #[test]
    fn graph_flags_follow_degree() {
        let mut token = Token::new(1);
        token.apply_graph_degree(0);
        assert!(token.is_leaf());
        assert!(!token.has_flag(flags::ACTIVE_GRAPH));

        token.apply_graph_degree(1);
        assert!(token.is_root());
        assert!(token.has_flag(flags::ACTIVE_GRAPH));

        token.apply_graph_degree(11);
        assert!(token.is_hub());
        assert!(token.has_flag(flags::ACTIVE_GRAPH));
    }

    #[test]
    fn entity_type_roundtrips_through_flags() {
        let mut token = Token::new(1);
        token.set_entity_type(EntityType::Concept);
        assert_eq!(token.get_entity_type(), EntityType::Concept);
    }

    #[test]
    fn id_packs_domain_entity_local() {
        let id = Token::create_id(12345, 5, 3);
        let token = Token::new(id);
        assert_eq!(token.local_id(), 12345);
        assert_eq!(token.id_entity_type(), 5);
        assert_eq!(token.domain(), 3);
    }

    #[test]
    fn malformed_length_is_rejected() {
        let bytes = vec![0u8; 63];
        assert!(Token::from_bytes(&bytes).is_err());
    }
}
