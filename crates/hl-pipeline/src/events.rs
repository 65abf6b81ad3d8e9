//! The pipeline's event bus and its two event topics.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Events flowing between the illustration stage, the completion tracker, and
/// the consolidator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "detailType", content = "detail")]
pub enum PipelineEvent {
    /// One egg reached a terminal processing outcome (illustrated or skipped).
    #[serde(rename = "Egg Processing Completed", rename_all = "camelCase")]
    EggProcessingCompleted { clutch_id: Uuid, egg_id: Uuid },

    /// Every expected egg of the clutch has completed; aggregate now.
    #[serde(rename = "Consolidate Findings", rename_all = "camelCase")]
    ConsolidateFindings { clutch_id: Uuid },
}

impl PipelineEvent {
    pub fn clutch_id(&self) -> Uuid {
        match self {
            PipelineEvent::EggProcessingCompleted { clutch_id, .. } => *clutch_id,
            PipelineEvent::ConsolidateFindings { clutch_id } => *clutch_id,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// A broadcast event bus built on flume channels.
///
/// Every subscriber sees every event published after it subscribed.
/// Disconnected subscribers are pruned on the next publish.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<Vec<flume::Sender<PipelineEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> flume::Receiver<PipelineEvent> {
        let (tx, rx) = flume::unbounded();
        let mut senders = self.inner.lock().expect("EventBus lock poisoned");
        senders.push(tx);
        rx
    }

    pub fn publish(&self, event: PipelineEvent) {
        let mut senders = self.inner.lock().expect("EventBus lock poisoned");
        senders.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        let senders = self.inner.lock().expect("EventBus lock poisoned");
        senders.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_each_see_every_event() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        let clutch_id = Uuid::new_v4();
        bus.publish(PipelineEvent::ConsolidateFindings { clutch_id });

        assert_eq!(
            a.try_recv().unwrap(),
            PipelineEvent::ConsolidateFindings { clutch_id }
        );
        assert_eq!(b.try_recv().unwrap().clutch_id(), clutch_id);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        drop(rx);
        bus.publish(PipelineEvent::ConsolidateFindings {
            clutch_id: Uuid::new_v4(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn events_serialize_with_topic_names() {
        let event = PipelineEvent::EggProcessingCompleted {
            clutch_id: Uuid::new_v4(),
            egg_id: Uuid::new_v4(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["detailType"], "Egg Processing Completed");
        assert!(json["detail"]["clutchId"].is_string());
        assert!(json["detail"]["eggId"].is_string());

        let back: PipelineEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
