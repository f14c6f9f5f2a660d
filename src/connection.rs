//! Connection - a typed, weighted, directed edge between two tokens.
//!
//! Connections are owned by the graph index (C5); the graph holds token
//! ids only, never token data (§3.6).

use std::collections::VecDeque;

use crate::error::CoreError;

/// Closed set of connection kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionKind {
    Association,
    Influence,
    Inheritance,
    Similar,
    Hypernym,
    Proximity,
    Causality,
    Sequence,
    SpatialProximity,
    TemporalProximity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directionality {
    Directed,
    Undirected,
    Bidirectional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    Transient,
    Persistent,
    Permanent,
}

/// Maximum number of `(timestamp, weight)` samples kept in an edge's
/// history; oldest entries are dropped (spec.md §3.4 leaves the bound
/// unspecified).
pub const HISTORY_CAPACITY: usize = 8;

/// Directed edge `a -> b` plus the shared metadata for its reverse/mirror
/// when undirected or bidirectional (§3.4).
#[derive(Debug, Clone)]
pub struct Connection {
    pub from: u32,
    pub to: u32,
    pub kind: ConnectionKind,
    weight: f32,
    confidence: f32,
    pub directionality: Directionality,
    pub persistence: Persistence,
    /// 8-bit encoded, decoded as meters (same scheme as a token's field
    /// radius: value/100).
    preferred_distance_raw: u8,
    /// 8-bit encoded, decoded to `[0,1]`.
    pull_strength_raw: u8,
    /// 8-bit encoded, decoded to `[0,1]`.
    rigidity_raw: u8,
    pub created_at: u32,
    pub last_updated: u32,
    history: VecDeque<(u32, f32)>,
}

impl Connection {
    pub fn new(from: u32, to: u32, kind: ConnectionKind, directionality: Directionality) -> Result<Self, CoreError> {
        if from == to {
            return Err(CoreError::SelfLoop(from));
        }
        let now = crate::token::Token::current_timestamp();
        Ok(Self {
            from,
            to,
            kind,
            weight: 1.0,
            confidence: 1.0,
            directionality,
            persistence: Persistence::Persistent,
            preferred_distance_raw: 100, // 1.0 m
            pull_strength_raw: 128,
            rigidity_raw: 128,
            created_at: now,
            last_updated: now,
            history: VecDeque::new(),
        })
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn preferred_distance(&self) -> f32 {
        self.preferred_distance_raw as f32 / 100.0
    }

    pub fn set_preferred_distance(&mut self, meters: f32) {
        self.preferred_distance_raw = (meters * 100.0).round().clamp(0.0, 255.0) as u8;
    }

    pub fn pull_strength(&self) -> f32 {
        self.pull_strength_raw as f32 / 255.0
    }

    pub fn set_pull_strength(&mut self, v: f32) {
        self.pull_strength_raw = (v * 255.0).round().clamp(0.0, 255.0) as u8;
    }

    pub fn rigidity(&self) -> f32 {
        self.rigidity_raw as f32 / 255.0
    }

    pub fn set_rigidity(&mut self, v: f32) {
        self.rigidity_raw = (v * 255.0).round().clamp(0.0, 255.0) as u8;
    }

    /// Update weight, recording the previous value in the bounded history
    /// and bumping `last_updated`.
    pub fn update_weight(&mut self, weight: f32) {
        let w = weight.clamp(0.0, 1.0);
        self.last_updated = crate::token::Token::current_timestamp();
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back((self.last_updated, self.weight));
        self.weight = w;
    }

    pub fn set_confidence(&mut self, confidence: f32) {
        self.confidence = confidence.clamp(0.0, 1.0);
    }

    pub fn history(&self) -> &VecDeque<(u32, f32)> {
        &self.history
    }

    /// Continuous, odd-symmetric force curve around `preferred_distance`.
    /// Positive means pull (bring closer), negative means push apart,
    /// bounded to `[-1, 1]` (§4.5).
    pub fn calculate_force(&self, current_distance: f32) -> f32 {
        let pd = self.preferred_distance().max(1e-6);
        let delta = current_distance - pd;
        let normalized = delta / pd;
        normalized.tanh() * self.pull_strength() * self.rigidity()
    }

    /// Ordered pair key used for the shared undirected/bidirectional
    /// metadata record (§3.4).
    pub fn pair_key(a: u32, b: u32) -> (u32, u32) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_loop_is_rejected() {
        let result = Connection::new(1, 1, ConnectionKind::Association, Directionality::Directed);
        assert!(matches!(result, Err(CoreError::SelfLoop(1))));
    }

    #[test]
    fn force_is_zero_at_preferred_distance() {
        let mut c = Connection::new(1, 2, ConnectionKind::Proximity, Directionality::Directed).unwrap();
        c.set_preferred_distance(2.0);
        let force = c.calculate_force(2.0);
        assert!(force.abs() < 1e-6);
    }

    #[test]
    fn force_is_odd_symmetric_about_preferred_distance() {
        let mut c = Connection::new(1, 2, ConnectionKind::Proximity, Directionality::Directed).unwrap();
        c.set_preferred_distance(2.0);
        c.set_pull_strength(1.0);
        c.set_rigidity(1.0);
        let far = c.calculate_force(3.0);
        let near = c.calculate_force(1.0);
        assert!((far + near).abs() < 1e-5);
        assert!(far > 0.0);
        assert!(near < 0.0);
    }

    #[test]
    fn history_is_bounded() {
        let mut c = Connection::new(1, 2, ConnectionKind::Association, Directionality::Directed).unwrap();
        for i in 0..(HISTORY_CAPACITY + 5) {
            c.update_weight(i as f32 / 20.0);
        }
        assert_eq!(c.history().len(), HISTORY_CAPACITY);
    }

    #[test]
    fn pair_key_is_order_independent() {
        assert_eq!(Connection::pair_key(5, 2), Connection::pair_key(2, 5));
    }
}
