use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::delivery::{DeliveryKey, DeliveryRecord};

/// A record together with when the coordinator first and last saw it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedDelivery {
    pub record: DeliveryRecord,
    pub first_seen_at: DateTime<Utc>,
    /// Time of the last successful poll that returned this key.
    pub last_seen_at: DateTime<Utc>,
}

/// Immutable view of every tracked delivery after one reconciliation cycle.
///
/// Published as `Arc<DeliverySnapshot>`; a new value replaces the old one
/// wholesale, so readers never observe a half-applied cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliverySnapshot {
    pub(super) deliveries: BTreeMap<DeliveryKey, TrackedDelivery>,
    pub(super) tombstones: BTreeSet<DeliveryKey>,
    pub(super) last_success_at: Option<DateTime<Utc>>,
    pub(super) generation: u64,
}

impl DeliverySnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.deliveries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }

    pub fn get(&self, key: &DeliveryKey) -> Option<&TrackedDelivery> {
        self.deliveries.get(key)
    }

    pub fn record(&self, key: &DeliveryKey) -> Option<&DeliveryRecord> {
        self.deliveries.get(key).map(|t| &t.record)
    }

    pub fn contains(&self, key: &DeliveryKey) -> bool {
        self.deliveries.contains_key(key)
    }

    /// Tracked deliveries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&DeliveryKey, &TrackedDelivery)> {
        self.deliveries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &DeliveryKey> {
        self.deliveries.keys()
    }

    pub fn records(&self) -> impl Iterator<Item = &DeliveryRecord> {
        self.deliveries.values().map(|t| &t.record)
    }

    /// Keys evicted by retention that upstream still reports.
    pub fn tombstones(&self) -> impl Iterator<Item = &DeliveryKey> {
        self.tombstones.iter()
    }

    pub fn is_tombstoned(&self, key: &DeliveryKey) -> bool {
        self.tombstones.contains(key)
    }

    pub fn last_success_at(&self) -> Option<DateTime<Utc>> {
        self.last_success_at
    }

    /// Number of successful cycles that produced this snapshot (0 = never polled).
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
