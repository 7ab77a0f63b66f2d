//! Presentation adapters.
//!
//! An adapter mirrors the coordinator's snapshot onto user-visible entities.
//! [`spawn_adapter`] drives one from the event bus: it replays the current
//! snapshot as additions, then applies each `DeliveriesChanged` event. If the
//! adapter falls behind and the broadcast receiver lags, it diffs its mirror
//! against the latest snapshot instead of replaying the missed events.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::{sync::broadcast, task::JoinHandle};

use crate::{
    coordinator::{CoordinatorHandle, DeliverySnapshot},
    delivery::{DeliveryKey, DeliveryRecord},
    events::{DeliveryEvent, EventTopic},
};

/// Receives snapshot changes, one delivery at a time.
pub trait PresentationAdapter: Send + 'static {
    fn on_added(&mut self, record: &DeliveryRecord);

    fn on_updated(&mut self, record: &DeliveryRecord);

    fn on_removed(&mut self, key: &DeliveryKey);
}

/// Sensor-style view of one delivery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorView {
    /// `parcelapp_{tracking_number}_{carrier_code}`, stable per delivery key.
    pub unique_id: String,
    pub name: String,
    pub state: &'static str,
    pub attributes: Map<String, Value>,
}

impl SensorView {
    pub fn from_record(record: &DeliveryRecord) -> Self {
        let latest_event = record.latest_event().map(|event| {
            json!({
                "event": event.event,
                "date": event.date,
                "location": event.location,
                "additional": event.additional,
            })
        });

        let mut attributes = Map::new();
        attributes.insert("tracking_number".into(), json!(record.tracking_number));
        attributes.insert("carrier".into(), json!(record.carrier_code));
        attributes.insert("description".into(), json!(record.description));
        attributes.insert("status_code".into(), json!(record.status.code()));
        attributes.insert("date_expected".into(), json!(record.date_expected));
        attributes.insert("latest_event".into(), json!(latest_event));

        if let Some(end) = record.date_expected_end {
            attributes.insert("date_expected_end".into(), json!(end));
        }
        if let Some(extra) = record.extra_information.as_deref().filter(|s| !s.is_empty()) {
            attributes.insert("extra_information".into(), json!(extra));
        }
        if let Some(ts) = record.timestamp_expected {
            attributes.insert("timestamp_expected".into(), json!(ts));
        }
        if let Some(ts) = record.timestamp_expected_end {
            attributes.insert("timestamp_expected_end".into(), json!(ts));
        }

        Self {
            unique_id: format!(
                "parcelapp_{}_{}",
                record.tracking_number, record.carrier_code
            ),
            name: record.display_name().to_string(),
            state: record.status.name(),
            attributes,
        }
    }
}

/// Adapter that logs every change.
#[derive(Debug, Default)]
pub struct LogAdapter;

impl PresentationAdapter for LogAdapter {
    fn on_added(&mut self, record: &DeliveryRecord) {
        let view = SensorView::from_record(record);
        tracing::info!(
            unique_id = %view.unique_id,
            name = %view.name,
            state = view.state,
            carrier = %record.carrier_code,
            latest_location = record.latest_location(),
            "Delivery added"
        );
    }

    fn on_updated(&mut self, record: &DeliveryRecord) {
        let view = SensorView::from_record(record);
        tracing::info!(
            unique_id = %view.unique_id,
            name = %view.name,
            state = view.state,
            latest_event = record.latest_event().and_then(|e| e.event.as_deref()),
            latest_location = record.latest_location(),
            "Delivery updated"
        );
    }

    fn on_removed(&mut self, key: &DeliveryKey) {
        tracing::info!(delivery = %key, "Delivery removed");
    }
}

/// Drive `adapter` from the coordinator until it stops.
///
/// Returns the adapter when the task ends so callers can inspect it.
pub fn spawn_adapter<A: PresentationAdapter>(
    handle: &CoordinatorHandle,
    adapter: A,
) -> JoinHandle<A> {
    // Subscribe before reading the snapshot so no event falls in between.
    let events = handle.subscribe();
    let mut dispatcher = Dispatcher::new(adapter);
    dispatcher.resync(&handle.snapshot());

    let handle = handle.clone();
    tokio::spawn(dispatcher.run(handle, events))
}

struct Dispatcher<A> {
    adapter: A,
    mirror: BTreeMap<DeliveryKey, DeliveryRecord>,
    generation: u64,
}

impl<A: PresentationAdapter> Dispatcher<A> {
    fn new(adapter: A) -> Self {
        Self {
            adapter,
            mirror: BTreeMap::new(),
            generation: 0,
        }
    }

    async fn run(
        mut self,
        handle: CoordinatorHandle,
        mut events: broadcast::Receiver<DeliveryEvent>,
    ) -> A {
        loop {
            tokio::select! {
                _ = handle.stopped() => break,
                event = events.recv() => match event {
                    Ok(event) => self.apply(event),
                    Err(broadcast::error::RecvError::Lagged(count)) => {
                        tracing::warn!(count, "Adapter lagged behind events, resyncing from snapshot");
                        self.resync(&handle.snapshot());
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::debug!("Event bus closed");
                        break;
                    }
                },
            }
        }
        self.adapter
    }

    fn apply(&mut self, event: DeliveryEvent) {
        if !EventTopic::Changes.matches(&event.topic()) {
            return;
        }
        let DeliveryEvent::DeliveriesChanged {
            generation,
            added,
            updated,
            removed,
            ..
        } = event
        else {
            return;
        };
        // Already covered by the last resync.
        if generation <= self.generation {
            return;
        }

        for record in added {
            self.adapter.on_added(&record);
            self.mirror.insert(record.key(), record);
        }
        for record in updated {
            self.adapter.on_updated(&record);
            self.mirror.insert(record.key(), record);
        }
        for key in removed {
            if self.mirror.remove(&key).is_some() {
                self.adapter.on_removed(&key);
            }
        }
        self.generation = generation;
    }

    /// Bring the adapter in line with `snapshot` by diffing the mirror.
    fn resync(&mut self, snapshot: &DeliverySnapshot) {
        let stale: Vec<DeliveryKey> = self
            .mirror
            .keys()
            .filter(|key| !snapshot.contains(key))
            .cloned()
            .collect();
        for key in stale {
            self.mirror.remove(&key);
            self.adapter.on_removed(&key);
        }

        for record in snapshot.records() {
            match self.mirror.get(&record.key()) {
                None => self.adapter.on_added(record),
                Some(known) if known != record => self.adapter.on_updated(record),
                Some(_) => continue,
            }
            self.mirror.insert(record.key(), record.clone());
        }
        self.generation = snapshot.generation();
    }
}
