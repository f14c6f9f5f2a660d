//! C7 - Subscription/event bus.
//!
//! Grounded on the teacher's `guardian.rs` subscriber/event model
//! (`Subscription`, `Event::with_*` builders, bounded queue), generalised
//! from poll-based delivery to synchronous push dispatch and from a fixed
//! `EventType` enum to CDNA/ADNA's `affected_components` interest model.

use std::collections::{HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::Value;

use crate::token::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    CdnaUpdated,
    AdnaUpdated,
}

/// A single published change notification.
#[derive(Debug, Clone)]
pub struct Event {
    pub event_id: u64,
    pub kind: EventKind,
    pub affected_components: HashSet<String>,
    pub changed_data_blob: Vec<u8>,
    pub metadata: std::collections::HashMap<String, Value>,
    pub timestamp: u32,
}

/// What a subscriber cares about; an empty set on a dimension means "any".
#[derive(Debug, Clone, Default)]
pub struct Interest {
    pub components: HashSet<String>,
    pub cdna_blocks: HashSet<String>,
    pub adna_sections: HashSet<String>,
}

impl Interest {
    pub fn component(name: impl Into<String>) -> Self {
        let mut components = HashSet::new();
        components.insert(name.into());
        Self {
            components,
            ..Default::default()
        }
    }

    fn matches(&self, event: &Event) -> bool {
        self.components.is_empty() || self.components.iter().any(|c| event.affected_components.contains(c))
    }
}

type Callback = Box<dyn Fn(&Event) + Send + Sync>;

struct Subscriber {
    interest: Interest,
    callback: Callback,
}

/// Event history bound: at most this many events, or this many seconds
/// back from the most recent one, whichever is smaller (§4.7, §5).
pub const HISTORY_MAX_EVENTS: usize = 1_000;
pub const HISTORY_MAX_AGE_SECS: u32 = 3_600;

pub struct EventBus {
    next_event_id: AtomicU64,
    subscribers: RwLock<std::collections::HashMap<String, Subscriber>>,
    history: RwLock<VecDeque<Event>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            next_event_id: AtomicU64::new(1),
            subscribers: RwLock::new(std::collections::HashMap::new()),
            history: RwLock::new(VecDeque::new()),
        }
    }

    pub fn subscribe(&self, name: impl Into<String>, interest: Interest, callback: Callback) {
        self.subscribers
            .write()
            .insert(name.into(), Subscriber { interest, callback });
    }

    pub fn unsubscribe(&self, name: &str) -> bool {
        self.subscribers.write().remove(name).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Assigns `event_id` and `timestamp`, records it in history, snapshots
    /// the subscriber list under the subscription lock, then dispatches
    /// outside the lock. A subscriber panic is caught and logged, never
    /// propagated (§4.7, §7).
    pub fn publish(
        &self,
        kind: EventKind,
        affected_components: HashSet<String>,
        changed_data_blob: Vec<u8>,
        metadata: std::collections::HashMap<String, Value>,
    ) -> Event {
        let event = Event {
            event_id: self.next_event_id.fetch_add(1, Ordering::SeqCst),
            kind,
            affected_components,
            changed_data_blob,
            metadata,
            timestamp: Token::current_timestamp(),
        };

        self.record_history(event.clone());

        let targets: Vec<(String, Interest)> = {
            let guard = self.subscribers.read();
            guard
                .iter()
                .map(|(name, sub)| (name.clone(), sub.interest.clone()))
                .collect()
        };

        for (name, interest) in targets {
            if !interest.matches(&event) {
                continue;
            }
            let guard = self.subscribers.read();
            let Some(subscriber) = guard.get(&name) else {
                continue;
            };
            let callback = &subscriber.callback;
            let result = catch_unwind(AssertUnwindSafe(|| callback(&event)));
            drop(guard);
            if result.is_err() {
                tracing::error!(subscriber = %name, event_id = event.event_id, "subscriber panicked during publish");
            }
        }

        event
    }

    fn record_history(&self, event: Event) {
        let mut history = self.history.write();
        history.push_back(event);
        while history.len() > HISTORY_MAX_EVENTS {
            history.pop_front();
        }
        if let Some(newest) = history.back() {
            let cutoff = newest.timestamp.saturating_sub(HISTORY_MAX_AGE_SECS);
            while history.front().is_some_and(|e| e.timestamp < cutoff) {
                history.pop_front();
            }
        }
    }

    pub fn history(&self) -> Vec<Event> {
        self.history.read().iter().cloned().collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;

    #[test]
    fn subscriber_receives_matching_events_only() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        bus.subscribe(
            "coordinate_system",
            Interest::component("coordinate_system"),
            Box::new(move |_event| {
                count_clone.fetch_add(1, AtomicOrdering::SeqCst);
            }),
        );

        let mut unrelated = HashSet::new();
        unrelated.insert("graph".to_string());
        bus.publish(EventKind::CdnaUpdated, unrelated, Vec::new(), Default::default());
        assert_eq!(count.load(AtomicOrdering::SeqCst), 0);

        let mut matching = HashSet::new();
        matching.insert("coordinate_system".to_string());
        bus.publish(EventKind::CdnaUpdated, matching, Vec::new(), Default::default());
        assert_eq!(count.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn panicking_subscriber_does_not_break_publish() {
        let bus = EventBus::new();
        bus.subscribe("bad", Interest::default(), Box::new(|_event| panic!("boom")));
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        bus.subscribe(
            "good",
            Interest::default(),
            Box::new(move |_event| {
                seen_clone.fetch_add(1, AtomicOrdering::SeqCst);
            }),
        );
        bus.publish(EventKind::AdnaUpdated, HashSet::new(), Vec::new(), Default::default());
        assert_eq!(seen.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        bus.subscribe("m", Interest::default(), Box::new(|_| {}));
        assert!(bus.unsubscribe("m"));
        assert_eq!(bus.subscriber_count(), 0);
        assert!(!bus.unsubscribe("m"));
    }

    #[test]
    fn history_is_capped() {
        let bus = EventBus::new();
        for _ in 0..(HISTORY_MAX_EVENTS + 10) {
            bus.publish(EventKind::AdnaUpdated, HashSet::new(), Vec::new(), Default::default());
        }
        assert_eq!(bus.history().len(), HISTORY_MAX_EVENTS);
    }

    #[test]
    fn event_ids_are_monotonic() {
        let bus = EventBus::new();
        let a = bus.publish(EventKind::AdnaUpdated, HashSet::new(), Vec::new(), Default::default());
        let b = bus.publish(EventKind::AdnaUpdated, HashSet::new(), Vec::new(), Default::default());
        assert!(b.event_id > a.event_id);
    }
}
