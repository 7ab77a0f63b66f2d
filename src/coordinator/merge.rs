//! Merging a poll result into the previous snapshot.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{DeliverySnapshot, RetentionPolicy, TrackedDelivery};
use crate::delivery::{DeliveryKey, DeliveryRecord};

/// Keys that changed in one cycle. Every list is sorted by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    /// Keys seen for the first time (or re-admitted).
    pub added: Vec<DeliveryKey>,
    /// Known keys whose record differs from the stored one.
    pub updated: Vec<DeliveryKey>,
    /// Keys gone from the snapshot, whether upstream dropped them or
    /// retention evicted them.
    pub removed: Vec<DeliveryKey>,
    /// The subset of `removed` evicted by retention.
    pub evicted: Vec<DeliveryKey>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Keys that upstream stopped returning.
    pub fn removed_upstream(&self) -> impl Iterator<Item = &DeliveryKey> {
        self.removed
            .iter()
            .filter(|key| self.evicted.binary_search(key).is_err())
    }
}

/// Fold `records` into `prior`, then apply `policy`.
///
/// Pure: the returned snapshot and change set depend only on the inputs.
pub fn reconcile(
    prior: &DeliverySnapshot,
    records: Vec<DeliveryRecord>,
    now: DateTime<Utc>,
    policy: &RetentionPolicy,
) -> (DeliverySnapshot, ChangeSet) {
    // Last occurrence of a duplicated key wins.
    let mut incoming: BTreeMap<DeliveryKey, DeliveryRecord> = BTreeMap::new();
    for record in records {
        incoming.insert(record.key(), record);
    }

    let mut deliveries = BTreeMap::new();
    let mut tombstones = BTreeSet::new();
    let mut changes = ChangeSet::default();
    // Keys that get one more cycle before retention may evict them.
    let mut protected = BTreeSet::new();

    for (key, record) in incoming {
        match prior.deliveries.get(&key) {
            Some(existing) => {
                if existing.record != record {
                    changes.updated.push(key.clone());
                    if !policy.is_eligible(&existing.record, now) {
                        protected.insert(key.clone());
                    }
                }
                deliveries.insert(
                    key,
                    TrackedDelivery {
                        record,
                        first_seen_at: existing.first_seen_at,
                        last_seen_at: now,
                    },
                );
            }
            None if prior.tombstones.contains(&key) && policy.is_eligible(&record, now) => {
                tombstones.insert(key);
            }
            None => {
                changes.added.push(key.clone());
                protected.insert(key.clone());
                deliveries.insert(
                    key,
                    TrackedDelivery {
                        record,
                        first_seen_at: now,
                        last_seen_at: now,
                    },
                );
            }
        }
    }

    let mut removed: Vec<DeliveryKey> = prior
        .deliveries
        .keys()
        .filter(|key| !deliveries.contains_key(*key))
        .cloned()
        .collect();

    let evicted = policy.apply(&mut deliveries, &protected, now);
    tombstones.extend(evicted.iter().cloned());
    // Already eligible last cycle: the removal supersedes the update.
    changes
        .updated
        .retain(|key| evicted.binary_search(key).is_err());

    removed.extend(evicted.iter().cloned());
    removed.sort();
    changes.removed = removed;
    changes.evicted = evicted;

    let snapshot = DeliverySnapshot {
        deliveries,
        tombstones,
        last_success_at: Some(now),
        generation: prior.generation + 1,
    };
    (snapshot, changes)
}
