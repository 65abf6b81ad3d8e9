//! Fan-in completion tracking.
//!
//! Consumes one "Egg Processing Completed" event per call and records the egg
//! against the clutch's completed set. The consolidation trigger is a flag on
//! the metadata row that flips exactly once, so at-least-once event delivery
//! cannot double-consolidate or fire early. The expected-count stamp evaluates
//! the same barrier, so eggs that complete before intake finishes enumerating
//! cannot stall the clutch.

use std::sync::Arc;

use hl_store::RecordStore;
use uuid::Uuid;

use crate::events::{EventBus, PipelineEvent};
use crate::Result;

// ---------------------------------------------------------------------------
// CompletionTracker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct TrackerReport {
    pub clutch_id: Uuid,
    pub processing_complete: u32,
    pub egg_count: Option<u32>,
    pub consolidation_triggered: bool,
}

pub struct CompletionTracker {
    store: Arc<dyn RecordStore>,
    bus: EventBus,
}

impl CompletionTracker {
    pub fn new(store: Arc<dyn RecordStore>, bus: EventBus) -> Self {
        Self { store, bus }
    }

    pub async fn handle(&self, clutch_id: Uuid, egg_id: Uuid) -> Result<TrackerReport> {
        let progress = self.store.record_completion(clutch_id, egg_id).await?;

        tracing::info!(
            clutch_id = %clutch_id,
            egg_id = %egg_id,
            completed = progress.completed,
            expected = progress.expected,
            duplicate = !progress.newly_recorded,
            "egg completion recorded"
        );

        let triggered = progress.barrier_crossed;
        if triggered {
            self.bus
                .publish(PipelineEvent::ConsolidateFindings { clutch_id });
            tracing::info!(clutch_id = %clutch_id, "all eggs processed, consolidation triggered");
        }

        Ok(TrackerReport {
            clutch_id,
            processing_complete: progress.completed,
            egg_count: progress.expected,
            consolidation_triggered: triggered,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hl_core::types::ClutchMeta;
    use hl_store::{ChangeFeed, MemoryRecordStore, StoreError};

    use crate::PipelineError;

    async fn tracker_with_clutch(
        expected: Option<u32>,
    ) -> (CompletionTracker, flume::Receiver<PipelineEvent>, Uuid) {
        let store = Arc::new(MemoryRecordStore::new(ChangeFeed::new()));
        let clutch_id = Uuid::new_v4();
        store
            .put_clutch_meta(&ClutchMeta::new(clutch_id, "img.jpg", Utc::now()))
            .await
            .unwrap();
        if let Some(count) = expected {
            store.set_expected_egg_count(clutch_id, count).await.unwrap();
        }

        let bus = EventBus::new();
        let events = bus.subscribe();
        (CompletionTracker::new(store, bus), events, clutch_id)
    }

    #[tokio::test]
    async fn triggers_exactly_once_when_all_eggs_complete() {
        let (tracker, events, clutch_id) = tracker_with_clutch(Some(2)).await;
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        let r1 = tracker.handle(clutch_id, first).await.unwrap();
        assert!(!r1.consolidation_triggered);
        assert_eq!(r1.processing_complete, 1);

        let r2 = tracker.handle(clutch_id, second).await.unwrap();
        assert!(r2.consolidation_triggered);
        assert_eq!(
            events.try_recv().unwrap(),
            PipelineEvent::ConsolidateFindings { clutch_id }
        );
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn redelivered_events_cannot_inflate_or_retrigger() {
        let (tracker, events, clutch_id) = tracker_with_clutch(Some(2)).await;
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        tracker.handle(clutch_id, first).await.unwrap();
        // Duplicate before the barrier: must not count twice.
        let dup = tracker.handle(clutch_id, first).await.unwrap();
        assert_eq!(dup.processing_complete, 1);
        assert!(!dup.consolidation_triggered);

        tracker.handle(clutch_id, second).await.unwrap();
        // Duplicate after the barrier: must not fire consolidation again.
        let late = tracker.handle(clutch_id, second).await.unwrap();
        assert!(!late.consolidation_triggered);

        assert_eq!(events.drain().count(), 1);
    }

    #[tokio::test]
    async fn no_trigger_while_expected_count_is_unstamped() {
        let (tracker, events, clutch_id) = tracker_with_clutch(None).await;

        let report = tracker.handle(clutch_id, Uuid::new_v4()).await.unwrap();
        assert_eq!(report.egg_count, None);
        assert!(!report.consolidation_triggered);
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn completion_before_stamp_defers_trigger_to_the_stamp() {
        let store = Arc::new(MemoryRecordStore::new(ChangeFeed::new()));
        let clutch_id = Uuid::new_v4();
        store
            .put_clutch_meta(&ClutchMeta::new(clutch_id, "img.jpg", Utc::now()))
            .await
            .unwrap();
        let bus = EventBus::new();
        let events = bus.subscribe();
        let tracker = CompletionTracker::new(store.clone(), bus);

        // The egg completes while intake is still enumerating.
        let egg = Uuid::new_v4();
        let early = tracker.handle(clutch_id, egg).await.unwrap();
        assert!(!early.consolidation_triggered);
        assert!(events.is_empty());

        // The stamp arrives last and is the write that crosses the barrier;
        // publishing for that path is the intake caller's job.
        let stamp = store.set_expected_egg_count(clutch_id, 1).await.unwrap();
        assert!(stamp.barrier_crossed);

        // A redelivered completion afterwards must not fire a second
        // consolidation through the tracker.
        let late = tracker.handle(clutch_id, egg).await.unwrap();
        assert!(!late.consolidation_triggered);
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn unknown_clutch_is_fatal() {
        let store = Arc::new(MemoryRecordStore::new(ChangeFeed::new()));
        let tracker = CompletionTracker::new(store, EventBus::new());

        let err = tracker
            .handle(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Store(StoreError::ClutchNotFound(_))
        ));
    }
}
