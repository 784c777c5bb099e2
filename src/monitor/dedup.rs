//! Short-window suppression of re-delivered events.
//!
//! This is approximate: once the window overflows, the oldest half of the
//! identities is forgotten and a very old duplicate could slip through.

use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};

use super::events::{EventKind, MonitoringEvent};

/// Default number of identities remembered before trimming.
pub const DEFAULT_DEDUP_CAPACITY: usize = 50;

/// `(kind, participant, timestamp)` of an outbound event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventIdentity {
    pub kind: EventKind,
    pub participant_id: String,
    pub timestamp: DateTime<Utc>,
}

impl EventIdentity {
    pub fn of(event: &MonitoringEvent) -> Self {
        Self {
            kind: event.kind(),
            participant_id: event.participant_id().to_string(),
            timestamp: event.timestamp(),
        }
    }
}

/// Bounded set of recently sent identities, oldest first.
#[derive(Debug)]
pub struct RecentIdentities {
    capacity: usize,
    order: VecDeque<EventIdentity>,
    seen: HashSet<EventIdentity>,
}

impl Default for RecentIdentities {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}

impl RecentIdentities {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity + 1),
            seen: HashSet::with_capacity(capacity + 1),
        }
    }

    /// Returns `false` for an identity already in the window; otherwise
    /// records it and returns `true`.
    pub fn should_send(&mut self, event: &MonitoringEvent) -> bool {
        let identity = EventIdentity::of(event);
        if self.seen.contains(&identity) {
            return false;
        }
        self.seen.insert(identity.clone());
        self.order.push_back(identity);
        if self.order.len() > self.capacity {
            self.evict_oldest_half();
        }
        true
    }

    /// Drop an identity recorded by [`should_send`](Self::should_send) for an
    /// event that was never sent or queued, so a retry is not suppressed.
    pub fn forget(&mut self, identity: &EventIdentity) {
        if self.seen.remove(identity) {
            self.order.retain(|recorded| recorded != identity);
        }
    }

    /// Keeps the newest `capacity / 2` identities.
    fn evict_oldest_half(&mut self) {
        let evict = self.order.len().saturating_sub(self.capacity / 2);
        for identity in self.order.drain(..evict) {
            self.seen.remove(&identity);
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.seen.clear();
    }
}
