//! C6 - Configuration record (CDNA) and the keyed ADNA parameter store.
//!
//! Grounded on the teacher's `cdna.rs` (checksummed packed record, a
//! `validate`/`touch` discipline) and `guardian.rs` (`update_cdna` under a
//! write lock followed by an event publish), redesigned to the smaller
//! 128-byte / four-section layout and CRC32 checksum described for this
//! store, with hot-slice caching added for per-consumer reads.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{CoreError, CoreResult};
use crate::events::{EventBus, EventKind};

pub const CDNA_SIZE: usize = 128;

mod offsets {
    // GRID_PHYSICS: 0..32
    pub const SEMANTIC_IDS: usize = 0; // [u8; 8]
    pub const SPACE_FLAGS: usize = 8; // [u8; 8]
    pub const SPACE_SCALES: usize = 16; // [u16; 8], fixed-point *1000

    // GRAPH_TOPOLOGY: 32..64
    pub const MAX_CONNECTIONS: usize = 32; // u32
    pub const DECAY_RATE: usize = 36; // f32
    pub const SYMMETRY_TOLERANCE: usize = 40; // f32

    // TOKEN_PROPERTIES: 64..96
    pub const WEIGHT_MIN: usize = 64; // f32
    pub const WEIGHT_MAX: usize = 68; // f32
    pub const BASE_FLAGS_ALLOWED: usize = 72; // u32
    pub const MAX_COORDINATE_LEVELS: usize = 76; // u8

    // EVOLUTION: 96..128
    pub const MUTATION_RATE_BASE: usize = 96; // f32
    pub const MUTATION_RATE_MAX: usize = 100; // f32
    pub const CROSSOVER_RATE: usize = 104; // f32
    pub const SELECTION_PRESSURE: usize = 108; // f32
}

/// Byte ranges for the four named sections (§3.5). `all` is the whole record.
pub fn section_range(name: &str) -> Option<std::ops::Range<usize>> {
    match name {
        "coordinate_system" => Some(0..32),
        "graph" => Some(32..64),
        "token" => Some(64..96),
        "evolution" => Some(96..128),
        "all" => Some(0..128),
        _ => None,
    }
}

/// Decodes the `space_scales` sub-section (bytes 16..32 of the GRID_PHYSICS
/// section) out of a `"coordinate_system"` hot slice. Kept separate from
/// `CdnaRecord::unpack` so a consumer can read just its own scales straight
/// off `CdnaStore::hot_slice("coordinate_system")` without unpacking the
/// whole 128-byte record.
pub fn decode_space_scales(grid_physics_slice: &[u8]) -> [f32; 8] {
    let mut scales = [0f32; 8];
    for (i, slot) in scales.iter_mut().enumerate() {
        let at = (offsets::SPACE_SCALES - offsets::SEMANTIC_IDS) + i * 2;
        let fixed = u16::from_le_bytes([grid_physics_slice[at], grid_physics_slice[at + 1]]);
        *slot = fixed as f32 / 1000.0;
    }
    scales
}

/// Unpacked view of the 128-byte configuration record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CdnaRecord {
    pub semantic_ids: [u8; 8],
    pub space_flags: [u8; 8],
    pub space_scales: [f32; 8],
    pub max_connections: u32,
    pub decay_rate: f32,
    pub symmetry_tolerance: f32,
    pub weight_min: f32,
    pub weight_max: f32,
    pub base_flags_allowed: u32,
    pub max_coordinate_levels: u8,
    pub mutation_rate_base: f32,
    pub mutation_rate_max: f32,
    pub crossover_rate: f32,
    pub selection_pressure: f32,
}

impl Default for CdnaRecord {
    fn default() -> Self {
        Self {
            semantic_ids: [0; 8],
            space_flags: [0; 8],
            space_scales: [1.0; 8],
            max_connections: 32,
            decay_rate: 0.01,
            symmetry_tolerance: 0.01,
            weight_min: 0.0,
            weight_max: 1.0,
            base_flags_allowed: 0xFFFF_FFFF,
            max_coordinate_levels: 8,
            mutation_rate_base: 0.01,
            mutation_rate_max: 0.5,
            crossover_rate: 0.7,
            selection_pressure: 1.5,
        }
    }
}

impl CdnaRecord {
    /// `weight_min < weight_max`, `mutation_rate_base <= mutation_rate_max`.
    pub fn validate(&self) -> CoreResult<()> {
        if !(self.weight_min < self.weight_max) {
            return Err(CoreError::ValidationFailed(format!(
                "weight_min ({}) must be < weight_max ({})",
                self.weight_min, self.weight_max
            )));
        }
        if self.mutation_rate_base > self.mutation_rate_max {
            return Err(CoreError::ValidationFailed(format!(
                "mutation_rate_base ({}) must be <= mutation_rate_max ({})",
                self.mutation_rate_base, self.mutation_rate_max
            )));
        }
        Ok(())
    }

    pub fn pack(&self) -> [u8; CDNA_SIZE] {
        let mut buf = [0u8; CDNA_SIZE];

        buf[offsets::SEMANTIC_IDS..offsets::SEMANTIC_IDS + 8].copy_from_slice(&self.semantic_ids);
        buf[offsets::SPACE_FLAGS..offsets::SPACE_FLAGS + 8].copy_from_slice(&self.space_flags);
        for (i, &scale) in self.space_scales.iter().enumerate() {
            let fixed = (scale * 1000.0).round().clamp(0.0, u16::MAX as f32) as u16;
            let at = offsets::SPACE_SCALES + i * 2;
            buf[at..at + 2].copy_from_slice(&fixed.to_le_bytes());
        }

        buf[offsets::MAX_CONNECTIONS..offsets::MAX_CONNECTIONS + 4]
            .copy_from_slice(&self.max_connections.to_le_bytes());
        buf[offsets::DECAY_RATE..offsets::DECAY_RATE + 4].copy_from_slice(&self.decay_rate.to_le_bytes());
        buf[offsets::SYMMETRY_TOLERANCE..offsets::SYMMETRY_TOLERANCE + 4]
            .copy_from_slice(&self.symmetry_tolerance.to_le_bytes());

        buf[offsets::WEIGHT_MIN..offsets::WEIGHT_MIN + 4].copy_from_slice(&self.weight_min.to_le_bytes());
        buf[offsets::WEIGHT_MAX..offsets::WEIGHT_MAX + 4].copy_from_slice(&self.weight_max.to_le_bytes());
        buf[offsets::BASE_FLAGS_ALLOWED..offsets::BASE_FLAGS_ALLOWED + 4]
            .copy_from_slice(&self.base_flags_allowed.to_le_bytes());
        buf[offsets::MAX_COORDINATE_LEVELS] = self.max_coordinate_levels;

        buf[offsets::MUTATION_RATE_BASE..offsets::MUTATION_RATE_BASE + 4]
            .copy_from_slice(&self.mutation_rate_base.to_le_bytes());
        buf[offsets::MUTATION_RATE_MAX..offsets::MUTATION_RATE_MAX + 4]
            .copy_from_slice(&self.mutation_rate_max.to_le_bytes());
        buf[offsets::CROSSOVER_RATE..offsets::CROSSOVER_RATE + 4].copy_from_slice(&self.crossover_rate.to_le_bytes());
        buf[offsets::SELECTION_PRESSURE..offsets::SELECTION_PRESSURE + 4]
            .copy_from_slice(&self.selection_pressure.to_le_bytes());

        buf
    }

    pub fn unpack(bytes: &[u8; CDNA_SIZE]) -> CoreResult<Self> {
        let u32_at = |o: usize| u32::from_le_bytes(bytes[o..o + 4].try_into().unwrap());
        let f32_at = |o: usize| f32::from_le_bytes(bytes[o..o + 4].try_into().unwrap());

        let mut semantic_ids = [0u8; 8];
        semantic_ids.copy_from_slice(&bytes[offsets::SEMANTIC_IDS..offsets::SEMANTIC_IDS + 8]);
        let mut space_flags = [0u8; 8];
        space_flags.copy_from_slice(&bytes[offsets::SPACE_FLAGS..offsets::SPACE_FLAGS + 8]);
        let mut space_scales = [0f32; 8];
        for (i, slot) in space_scales.iter_mut().enumerate() {
            let at = offsets::SPACE_SCALES + i * 2;
            let fixed = u16::from_le_bytes(bytes[at..at + 2].try_into().unwrap());
            *slot = fixed as f32 / 1000.0;
        }

        let record = Self {
            semantic_ids,
            space_flags,
            space_scales,
            max_connections: u32_at(offsets::MAX_CONNECTIONS),
            decay_rate: f32_at(offsets::DECAY_RATE),
            symmetry_tolerance: f32_at(offsets::SYMMETRY_TOLERANCE),
            weight_min: f32_at(offsets::WEIGHT_MIN),
            weight_max: f32_at(offsets::WEIGHT_MAX),
            base_flags_allowed: u32_at(offsets::BASE_FLAGS_ALLOWED),
            max_coordinate_levels: bytes[offsets::MAX_COORDINATE_LEVELS],
            mutation_rate_base: f32_at(offsets::MUTATION_RATE_BASE),
            mutation_rate_max: f32_at(offsets::MUTATION_RATE_MAX),
            crossover_rate: f32_at(offsets::CROSSOVER_RATE),
            selection_pressure: f32_at(offsets::SELECTION_PRESSURE),
        };
        if record.space_scales.iter().any(|s| !s.is_finite()) {
            return Err(CoreError::MalformedCdna("non-finite space scale"));
        }
        Ok(record)
    }

    /// CRC32 over the packed bytes; a detached integrity tag, not part of
    /// the 128-byte wire format itself.
    pub fn checksum(&self) -> u32 {
        crc32fast::hash(&self.pack())
    }
}

const HOT_SLICE_TTL: Duration = Duration::from_secs(300);

struct CachedSlice {
    cached_at: Instant,
    bytes: Vec<u8>,
}

/// Owns the CDNA record and the ADNA keyed store behind independent
/// read/write locks (§5), plus the hot-slice cache. Event dispatch happens
/// through a caller-supplied `EventBus`, after every lock here is released.
pub struct CdnaStore {
    record: RwLock<CdnaRecord>,
    adna: RwLock<HashMap<String, Value>>,
    hot_slices: RwLock<HashMap<String, CachedSlice>>,
}

impl CdnaStore {
    pub fn new(record: CdnaRecord) -> Self {
        Self {
            record: RwLock::new(record),
            adna: RwLock::new(HashMap::new()),
            hot_slices: RwLock::new(HashMap::new()),
        }
    }

    pub fn record(&self) -> CdnaRecord {
        *self.record.read()
    }

    pub fn pack(&self) -> [u8; CDNA_SIZE] {
        self.record.read().pack()
    }

    /// Returns the cached byte slice for `name`, refreshing it if absent or
    /// stale (TTL 300s, invalidated on any CDNA write).
    pub fn hot_slice(&self, name: &str) -> CoreResult<Vec<u8>> {
        let range = section_range(name)
            .ok_or_else(|| CoreError::ValidationFailed(format!("unknown hot-slice consumer '{name}'")))?;

        if let Some(entry) = self.hot_slices.read().get(name) {
            if entry.cached_at.elapsed() < HOT_SLICE_TTL {
                return Ok(entry.bytes.clone());
            }
        }

        let bytes = self.record.read().pack()[range].to_vec();
        self.hot_slices.write().insert(
            name.to_string(),
            CachedSlice {
                cached_at: Instant::now(),
                bytes: bytes.clone(),
            },
        );
        Ok(bytes)
    }

    /// Atomically replaces the record, clears every hot-slice cache entry,
    /// then publishes `CDNA_UPDATED` to `bus` with all three locks released
    /// (the record lock here, and the bus's own subscription lock inside
    /// `publish`).
    pub fn update(&self, new_record: CdnaRecord, affected: HashSet<String>, bus: &EventBus) -> CoreResult<()> {
        new_record.validate()?;
        {
            let mut record = self.record.write();
            *record = new_record;
            self.hot_slices.write().clear();
        }
        bus.publish(
            EventKind::CdnaUpdated,
            affected,
            new_record.pack().to_vec(),
            HashMap::new(),
        );
        Ok(())
    }

    pub fn adna_get(&self, key: &str) -> Option<Value> {
        self.adna.read().get(key).cloned()
    }

    /// Sets an ADNA parameter and publishes `ADNA_UPDATED`, scoped either to
    /// `affected` when given, or to components inferred from `key` by
    /// keyword matching (§4.6).
    pub fn update_adna(&self, key: impl Into<String>, value: Value, affected: Option<HashSet<String>>, bus: &EventBus) {
        let key = key.into();
        let components = affected.unwrap_or_else(|| infer_components(&key));
        self.adna.write().insert(key.clone(), value.clone());

        let mut metadata = HashMap::new();
        metadata.insert("key".to_string(), Value::String(key));
        bus.publish(EventKind::AdnaUpdated, components, Vec::new(), metadata);
    }
}

fn infer_components(key: &str) -> HashSet<String> {
    let lower = key.to_ascii_lowercase();
    let mut out = HashSet::new();
    let mut add_if = |keywords: &[&str], component: &str| {
        if keywords.iter().any(|kw| lower.contains(kw)) {
            out.insert(component.to_string());
        }
    };
    add_if(&["graph", "connection", "edge", "node"], "graph");
    add_if(&["coordinate", "spatial", "grid"], "coordinate_system");
    add_if(&["token", "weight", "flag"], "token");
    add_if(&["evolution", "mutation", "fitness"], "evolution");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_round_trips() {
        let mut record = CdnaRecord::default();
        record.space_scales = [1.0, 2.0, 0.5, 1.0, 1.0, 1.0, 1.0, 1.0];
        record.max_connections = 64;
        let packed = record.pack();
        assert_eq!(packed.len(), CDNA_SIZE);
        let unpacked = CdnaRecord::unpack(&packed).unwrap();
        assert_eq!(unpacked, record);
    }

    #[test]
    fn validate_rejects_inverted_weight_bounds() {
        let mut record = CdnaRecord::default();
        record.weight_min = 1.0;
        record.weight_max = 0.0;
        assert!(matches!(record.validate(), Err(CoreError::ValidationFailed(_))));
    }

    #[test]
    fn validate_rejects_inverted_mutation_bounds() {
        let mut record = CdnaRecord::default();
        record.mutation_rate_base = 0.9;
        record.mutation_rate_max = 0.1;
        assert!(matches!(record.validate(), Err(CoreError::ValidationFailed(_))));
    }

    #[test]
    fn decode_space_scales_matches_the_unpacked_record() {
        let mut record = CdnaRecord::default();
        record.space_scales = [1.0, 2.0, 0.5, 1.0, 1.0, 1.0, 1.0, 1.0];
        let store = CdnaStore::new(record);
        let slice = store.hot_slice("coordinate_system").unwrap();
        assert_eq!(decode_space_scales(&slice), record.space_scales);
    }

    #[test]
    fn hot_slice_maps_to_fixed_sections() {
        let store = CdnaStore::new(CdnaRecord::default());
        let token_slice = store.hot_slice("token").unwrap();
        assert_eq!(token_slice, store.pack()[64..96].to_vec());
        assert!(store.hot_slice("unknown-consumer").is_err());
    }

    #[test]
    fn scenario_5_cdna_fan_out() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        use crate::events::Interest;

        let mut record = CdnaRecord::default();
        record.space_scales = [1.0; 8];
        let store = CdnaStore::new(record);
        let bus = EventBus::new();

        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = received.clone();
        bus.subscribe(
            "coordinate_system",
            Interest::component("coordinate_system"),
            Box::new(move |event| {
                assert!(event.affected_components.contains("coordinate_system"));
                received_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let mut updated = store.record();
        updated.space_scales[0] = 2.0;
        let mut affected = HashSet::new();
        affected.insert("coordinate_system".to_string());
        store.update(updated, affected, &bus).unwrap();

        assert_eq!(received.load(Ordering::SeqCst), 1);
        let slice = store.hot_slice("coordinate_system").unwrap();
        let fixed = u16::from_le_bytes([slice[16], slice[17]]);
        assert_eq!(fixed as f32 / 1000.0, 2.0);
    }

    #[test]
    fn adna_update_infers_component_from_key() {
        let store = CdnaStore::new(CdnaRecord::default());
        let bus = EventBus::new();
        let received = std::sync::Arc::new(std::sync::Mutex::new(None));
        let received_clone = received.clone();
        bus.subscribe(
            "graph",
            crate::events::Interest::component("graph"),
            Box::new(move |event| {
                *received_clone.lock().unwrap() = Some(event.affected_components.clone());
            }),
        );
        store.update_adna("max_connections_per_node", Value::from(48), None, &bus);
        assert_eq!(store.adna_get("max_connections_per_node"), Some(Value::from(48)));
        assert!(received.lock().unwrap().as_ref().unwrap().contains("graph"));
    }
}
