//! Change notifications.
//!
//! Collections emit a [`StoreEvent`] after every successful write. Listeners
//! subscribe on the [`EventBus`] and receive events over an unbounded channel,
//! either for every collection or for one.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use folio_engine::{CollectionName, Record};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Created,
    Updated,
    Removed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Updated => "updated",
            EventKind::Removed => "removed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A write notification carrying the record as stored (or as it was, for
/// removals).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreEvent {
    pub collection: CollectionName,
    pub kind: EventKind,
    pub record: Record,
}

impl StoreEvent {
    pub fn new(collection: impl Into<CollectionName>, kind: EventKind, record: Record) -> Self {
        Self {
            collection: collection.into(),
            kind,
            record,
        }
    }

    /// Event name, `<collection>.<verb>`.
    pub fn name(&self) -> String {
        format!("{}.{}", self.collection, self.kind)
    }
}

/// Receiving end of a subscription.
pub type EventReceiver = mpsc::UnboundedReceiver<StoreEvent>;

#[derive(Debug)]
struct Subscriber {
    collection: Option<CollectionName>,
    sender: mpsc::UnboundedSender<StoreEvent>,
}

impl Subscriber {
    fn wants(&self, event: &StoreEvent) -> bool {
        self.collection
            .as_deref()
            .map_or(true, |name| name == event.collection)
    }
}

/// Fan-out of store events to subscribers.
///
/// Thread-safe; share it with `Arc`. Subscribers whose receiver was dropped
/// are pruned on the next emit.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: DashMap<String, Subscriber>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Subscribe to every event. Returns the subscription id and receiver.
    pub fn subscribe(&self) -> (String, EventReceiver) {
        self.add(None)
    }

    /// Subscribe to events of one collection.
    pub fn subscribe_collection(
        &self,
        collection: impl Into<CollectionName>,
    ) -> (String, EventReceiver) {
        self.add(Some(collection.into()))
    }

    fn add(&self, collection: Option<CollectionName>) -> (String, EventReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = uuid::Uuid::new_v4().to_string();
        tracing::debug!(subscription = %id, collection = ?collection, "Event subscriber added");
        self.subscribers
            .insert(id.clone(), Subscriber { collection, sender });
        (id, receiver)
    }

    pub fn unsubscribe(&self, id: &str) -> bool {
        self.subscribers.remove(id).is_some()
    }

    /// Deliver an event; returns how many subscribers received it.
    pub fn emit(&self, event: StoreEvent) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        for entry in self.subscribers.iter() {
            let subscriber = entry.value();
            if !subscriber.wants(&event) {
                continue;
            }
            if subscriber.sender.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                closed.push(entry.key().clone());
            }
        }

        for id in closed {
            self.subscribers.remove(&id);
        }

        tracing::trace!(event = %event.name(), recipients = delivered, "Emitted store event");
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(collection: &str, kind: EventKind) -> StoreEvent {
        StoreEvent::new(
            collection,
            kind,
            Record::from_value(json!({"id": "a"})).unwrap(),
        )
    }

    #[test]
    fn event_name() {
        assert_eq!(event("inv/item", EventKind::Created).name(), "inv/item.created");
        assert_eq!(event("ap/bill", EventKind::Removed).name(), "ap/bill.removed");
    }

    #[tokio::test]
    async fn collection_subscription_filters() {
        let bus = EventBus::new();
        let (_, mut all) = bus.subscribe();
        let (_, mut items) = bus.subscribe_collection("inv/item");

        assert_eq!(bus.emit(event("ap/bill", EventKind::Updated)), 1);
        assert_eq!(bus.emit(event("inv/item", EventKind::Created)), 2);

        assert_eq!(all.recv().await.unwrap().collection, "ap/bill");
        assert_eq!(all.recv().await.unwrap().collection, "inv/item");
        assert_eq!(items.recv().await.unwrap().kind, EventKind::Created);
        assert!(items.try_recv().is_err());
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let bus = EventBus::new();
        let (_, receiver) = bus.subscribe();
        let (id, _kept) = bus.subscribe();
        drop(receiver);

        assert_eq!(bus.emit(event("c", EventKind::Created)), 1);
        assert_eq!(bus.subscriber_count(), 1);
        assert!(bus.unsubscribe(&id));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
