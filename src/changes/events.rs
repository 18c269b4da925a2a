//! Entity event bus
//!
//! Topic-per-entity-kind stream of post-image events. Delivery is
//! synchronous from the committer's point of view but never blocks on a
//! slow sink: each subscription owns a bounded queue, and once it fills
//! the newest event for that sink is dropped and the `sinkOverflow`
//! counter incremented.

use crate::model::EntityKind;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Default per-sink queue depth
pub const DEFAULT_SINK_DEPTH: usize = 256;

/// One committed change to one entity
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityEvent {
    pub kind: EntityKind,
    pub id: u32,
    pub changed_fields: Vec<String>,
    pub post_image: serde_json::Value,
}

struct Sink {
    /// `None` subscribes to every topic
    topics: Option<HashSet<EntityKind>>,
    tx: mpsc::Sender<EntityEvent>,
    overflow: Arc<AtomicU64>,
}

/// A subscriber's receiving half plus its overflow counter
pub struct Subscription {
    pub rx: mpsc::Receiver<EntityEvent>,
    overflow: Arc<AtomicU64>,
}

impl Subscription {
    /// Events dropped for this sink because its queue was full
    pub fn overflow(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }
}

/// Fan-out hub for entity events
#[derive(Default)]
pub struct EventBus {
    sinks: Mutex<Vec<Sink>>,
    overflow_total: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to the given topics (`None` = all) with a bounded queue
    pub fn subscribe(&self, topics: Option<&[EntityKind]>, depth: usize) -> Subscription {
        let (tx, rx) = mpsc::channel(depth.max(1));
        let overflow = Arc::new(AtomicU64::new(0));
        self.sinks.lock().unwrap().push(Sink {
            topics: topics.map(|t| t.iter().copied().collect()),
            tx,
            overflow: Arc::clone(&overflow),
        });
        Subscription { rx, overflow }
    }

    /// Deliver one event to every interested sink, dropping the newest
    /// event for any sink whose queue is full
    pub fn publish(&self, event: &EntityEvent) {
        let mut sinks = self.sinks.lock().unwrap();
        sinks.retain(|sink| {
            let interested = sink
                .topics
                .as_ref()
                .map(|topics| topics.contains(&event.kind))
                .unwrap_or(true);
            if !interested {
                return true;
            }
            match sink.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    sink.overflow.fetch_add(1, Ordering::Relaxed);
                    self.overflow_total.fetch_add(1, Ordering::Relaxed);
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Total events dropped across all sinks
    pub fn sink_overflow(&self) -> u64 {
        self.overflow_total.load(Ordering::Relaxed)
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EntityKind, id: u32) -> EntityEvent {
        EntityEvent {
            kind,
            id,
            changed_fields: vec!["isOn".to_string()],
            post_image: serde_json::json!({ "id": id, "isOn": true }),
        }
    }

    #[tokio::test]
    async fn delivers_to_matching_topics_only() {
        let bus = EventBus::new();
        let mut circuits = bus.subscribe(Some(&[EntityKind::Circuit]), 8);
        let mut everything = bus.subscribe(None, 8);

        bus.publish(&event(EntityKind::Pump, 1));
        bus.publish(&event(EntityKind::Circuit, 6));

        assert_eq!(everything.rx.recv().await.unwrap().kind, EntityKind::Pump);
        assert_eq!(
            everything.rx.recv().await.unwrap().kind,
            EntityKind::Circuit
        );
        let only = circuits.rx.recv().await.unwrap();
        assert_eq!(only.kind, EntityKind::Circuit);
        assert_eq!(only.id, 6);
    }

    #[tokio::test]
    async fn full_sink_drops_newest_and_counts_overflow() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(None, 2);

        bus.publish(&event(EntityKind::Circuit, 1));
        bus.publish(&event(EntityKind::Circuit, 2));
        bus.publish(&event(EntityKind::Circuit, 3)); // dropped

        assert_eq!(sub.overflow(), 1);
        assert_eq!(bus.sink_overflow(), 1);

        // The first two arrive in commit order; the third never does
        assert_eq!(sub.rx.recv().await.unwrap().id, 1);
        assert_eq!(sub.rx.recv().await.unwrap().id, 2);
        assert!(sub.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_sinks_are_pruned() {
        let bus = EventBus::new();
        let sub = bus.subscribe(None, 2);
        assert_eq!(bus.sink_count(), 1);
        drop(sub);
        bus.publish(&event(EntityKind::Circuit, 1));
        assert_eq!(bus.sink_count(), 0);
    }

    #[test]
    fn event_serializes_with_topic_and_camel_case() {
        let json = serde_json::to_string(&event(EntityKind::ChemController, 1)).unwrap();
        assert!(json.contains("\"kind\":\"chemController\""));
        assert!(json.contains("\"changedFields\""));
        assert!(json.contains("\"postImage\""));
    }
}
