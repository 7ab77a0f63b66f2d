//! Age-based eviction of completed deliveries.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};

use super::TrackedDelivery;
use crate::{
    config::RetentionConfig,
    delivery::{DeliveryKey, DeliveryRecord},
};

/// Default age after which a completed delivery is evicted.
pub const DEFAULT_THRESHOLD_DAYS: u32 = 3;

/// Decides which completed deliveries are old enough to drop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub enabled: bool,
    pub threshold: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: Duration::days(i64::from(DEFAULT_THRESHOLD_DAYS)),
        }
    }
}

impl RetentionPolicy {
    pub fn from_config(config: &RetentionConfig) -> Self {
        Self {
            enabled: config.enabled,
            threshold: Duration::days(i64::from(config.threshold_days)),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Whether `record` should be evicted at `now`.
    ///
    /// Only completed deliveries are eligible. A completed delivery without an
    /// expected date is eligible immediately.
    pub fn is_eligible(&self, record: &DeliveryRecord, now: DateTime<Utc>) -> bool {
        if !self.enabled || !record.status.is_completed() {
            return false;
        }
        match record.date_expected {
            None => true,
            Some(date) => now - date >= self.threshold,
        }
    }

    /// Remove eligible deliveries that are not in `protected`.
    ///
    /// Returns the evicted keys in key order.
    pub(super) fn apply(
        &self,
        deliveries: &mut BTreeMap<DeliveryKey, TrackedDelivery>,
        protected: &BTreeSet<DeliveryKey>,
        now: DateTime<Utc>,
    ) -> Vec<DeliveryKey> {
        if !self.enabled {
            return Vec::new();
        }

        let evicted: Vec<DeliveryKey> = deliveries
            .iter()
            .filter(|(key, tracked)| {
                !protected.contains(*key) && self.is_eligible(&tracked.record, now)
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in &evicted {
            deliveries.remove(key);
        }
        evicted
    }
}
