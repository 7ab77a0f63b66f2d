//! Event broadcasting for coordinator notifications.
//!
//! The coordinator publishes one event per finished cycle: a
//! [`DeliveryEvent::DeliveriesChanged`] after a successful merge, or a
//! [`DeliveryEvent::PollFailed`] when the API call failed. Presentation
//! adapters subscribe to the bus and reconcile their entities from it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │   Coordinator   │────>│    EventBus     │────>│   Presentation  │
//! │  (cycle task)   │     │  (broadcast)    │     │    adapters     │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! Receivers that fall behind get `RecvError::Lagged`; they should resync
//! from the coordinator's current snapshot rather than replay events.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{
    client::ApiErrorKind,
    delivery::{DeliveryKey, DeliveryRecord},
};

/// Default channel capacity for the event bus.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Event topics for filtering subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTopic {
    /// Snapshot changes (added, updated, removed deliveries)
    Changes,
    /// Poll health (failures)
    Status,
    /// All events (wildcard subscription)
    All,
}

impl EventTopic {
    /// `All` matches everything, otherwise exact match is required.
    pub fn matches(&self, other: &EventTopic) -> bool {
        matches!(self, EventTopic::All) || matches!(other, EventTopic::All) || self == other
    }
}

/// Coordinator events.
///
/// Serialized with `event_type` as the tag:
/// ```json
/// { "event_type": "poll_failed", "error_kind": "rate_limited", ... }
/// ```
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum DeliveryEvent {
    /// A cycle merged a poll result and published a new snapshot.
    ///
    /// Published for every successful cycle, including ones with no changes.
    DeliveriesChanged {
        timestamp: DateTime<Utc>,
        /// Generation of the snapshot this event describes.
        generation: u64,
        added: Vec<DeliveryRecord>,
        updated: Vec<DeliveryRecord>,
        removed: Vec<DeliveryKey>,
        evicted: Vec<DeliveryKey>,
        /// Entries dropped as malformed.
        dropped: usize,
    },

    /// A cycle failed; the snapshot was left untouched.
    PollFailed {
        timestamp: DateTime<Utc>,
        error_kind: ApiErrorKind,
        message: String,
        consecutive_failures: u32,
    },
}

impl DeliveryEvent {
    pub fn topic(&self) -> EventTopic {
        match self {
            DeliveryEvent::DeliveriesChanged { .. } => EventTopic::Changes,
            DeliveryEvent::PollFailed { .. } => EventTopic::Status,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            DeliveryEvent::DeliveriesChanged { .. } => "deliveries_changed",
            DeliveryEvent::PollFailed { .. } => "poll_failed",
        }
    }

    /// Whether a `DeliveriesChanged` event carries no changes.
    pub fn is_noop(&self) -> bool {
        match self {
            DeliveryEvent::DeliveriesChanged {
                added,
                updated,
                removed,
                ..
            } => added.is_empty() && updated.is_empty() && removed.is_empty(),
            DeliveryEvent::PollFailed { .. } => false,
        }
    }
}

/// Central event bus for coordinator events.
///
/// Uses a tokio broadcast channel so that several adapters receive the same
/// events. Events are cloned for each subscriber.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<DeliveryEvent>,
    /// Total events published
    events_published: AtomicU64,
    /// Events dropped because nobody was subscribed
    events_dropped: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            events_published: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
        }
    }

    /// Publish an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    /// If there are no subscribers, the event is dropped and 0 is returned.
    pub fn publish(&self, event: DeliveryEvent) -> usize {
        self.events_published.fetch_add(1, Ordering::Relaxed);

        match self.sender.send(event) {
            Ok(count) => count,
            Err(_) => {
                self.events_dropped.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }

    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        // Clones share the channel; counters are copied, not shared.
        Self {
            sender: self.sender.clone(),
            events_published: AtomicU64::new(self.events_published.load(Ordering::Relaxed)),
            events_dropped: AtomicU64::new(self.events_dropped.load(Ordering::Relaxed)),
        }
    }
}
