use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hl_core::types::{ClutchMeta, ClutchRow, EggRecord};
use uuid::Uuid;

use crate::change_feed::{ChangeFeed, ChangeKind, ChangeRecord};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("clutch not found: {0}")]
    ClutchNotFound(Uuid),
    #[error("egg not found: {egg_id} in clutch {clutch_id}")]
    EggNotFound { clutch_id: Uuid, egg_id: Uuid },
    #[error("queue closed: {0}")]
    QueueClosed(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Completion progress
// ---------------------------------------------------------------------------

/// Post-write snapshot returned by the two barrier-relevant mutations,
/// [`RecordStore::record_completion`] and
/// [`RecordStore::set_expected_egg_count`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionProgress {
    /// `false` when the egg id had already signaled completion (a redelivered
    /// event) or when the write was an expected-count stamp.
    pub newly_recorded: bool,
    /// Number of distinct eggs that have reached a terminal outcome.
    pub completed: u32,
    /// Expected egg count, if the intake agent has stamped it yet.
    pub expected: Option<u32>,
    /// `true` only for the single write that flipped the clutch's persisted
    /// consolidation trigger. Eggs can complete before intake stamps the
    /// expected count, so either mutation may be the one that crosses.
    pub barrier_crossed: bool,
}

// ---------------------------------------------------------------------------
// RecordStore trait
// ---------------------------------------------------------------------------

/// The (partition, sort) keyed record store behind the pipeline.
///
/// All writes are blind overwrites of one row except
/// [`record_completion`](RecordStore::record_completion), which is the single
/// atomic read-modify-write primitive the fan-in barrier relies on. Every
/// mutation is published to the change feed so the propagators can react.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn put_clutch_meta(&self, meta: &ClutchMeta) -> Result<()>;
    async fn get_clutch_meta(&self, clutch_id: Uuid) -> Result<Option<ClutchMeta>>;

    async fn put_egg(&self, egg: &EggRecord) -> Result<()>;
    async fn get_egg(&self, clutch_id: Uuid, egg_id: Uuid) -> Result<Option<EggRecord>>;

    /// All rows under the clutch partition: the metadata row (if present)
    /// plus every egg.
    async fn query_clutch(&self, clutch_id: Uuid) -> Result<Vec<ClutchRow>>;

    /// Stamp the expected egg count onto the metadata row once intake has
    /// finished enumerating, and evaluate the fan-in barrier against the
    /// completions recorded so far. The returned progress has
    /// `barrier_crossed` set when the stamp itself satisfied the barrier.
    async fn set_expected_egg_count(
        &self,
        clutch_id: Uuid,
        count: u32,
    ) -> Result<CompletionProgress>;

    /// Atomically record a terminal outcome for `egg_id` against the clutch's
    /// completed-egg set and return the post-update progress. Duplicate egg
    /// ids are absorbed (`newly_recorded = false`) and can never re-cross the
    /// barrier.
    async fn record_completion(&self, clutch_id: Uuid, egg_id: Uuid)
        -> Result<CompletionProgress>;

    /// Set the chick image fields on an egg row.
    async fn set_chick_image(
        &self,
        clutch_id: Uuid,
        egg_id: Uuid,
        url: &str,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Overwrite the consolidation aggregates on the metadata row.
    async fn set_consolidation(
        &self,
        clutch_id: Uuid,
        total_egg_count: u32,
        viable_egg_count: u32,
        chicken_image_key: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()>;
}

// ---------------------------------------------------------------------------
// MemoryRecordStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ClutchPartition {
    meta: Option<ClutchMeta>,
    eggs: BTreeMap<Uuid, EggRecord>,
}

/// In-memory record store keyed by clutch partition.
///
/// Mutations to one clutch happen under that clutch's map entry, giving the
/// same per-partition atomicity the production store provides via conditional
/// updates.
pub struct MemoryRecordStore {
    partitions: DashMap<Uuid, ClutchPartition>,
    feed: ChangeFeed,
}

impl MemoryRecordStore {
    pub fn new(feed: ChangeFeed) -> Self {
        Self {
            partitions: DashMap::new(),
            feed,
        }
    }

    pub fn change_feed(&self) -> &ChangeFeed {
        &self.feed
    }

    fn publish(&self, kind: ChangeKind, row: ClutchRow) {
        self.feed.publish(ChangeRecord { kind, row });
    }

    fn with_meta<T>(
        &self,
        clutch_id: Uuid,
        f: impl FnOnce(&mut ClutchMeta) -> T,
    ) -> Result<(T, ClutchMeta)> {
        let mut partition = self
            .partitions
            .get_mut(&clutch_id)
            .ok_or(StoreError::ClutchNotFound(clutch_id))?;
        let meta = partition
            .meta
            .as_mut()
            .ok_or(StoreError::ClutchNotFound(clutch_id))?;
        let out = f(meta);
        Ok((out, meta.clone()))
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn put_clutch_meta(&self, meta: &ClutchMeta) -> Result<()> {
        let kind = {
            let mut partition = self.partitions.entry(meta.id).or_default();
            let kind = if partition.meta.is_some() {
                ChangeKind::Modify
            } else {
                ChangeKind::Insert
            };
            partition.meta = Some(meta.clone());
            kind
        };
        self.publish(kind, ClutchRow::Meta(meta.clone()));
        Ok(())
    }

    async fn get_clutch_meta(&self, clutch_id: Uuid) -> Result<Option<ClutchMeta>> {
        Ok(self
            .partitions
            .get(&clutch_id)
            .and_then(|p| p.meta.clone()))
    }

    async fn put_egg(&self, egg: &EggRecord) -> Result<()> {
        let kind = {
            let mut partition = self.partitions.entry(egg.clutch_id).or_default();
            let kind = if partition.eggs.contains_key(&egg.id) {
                ChangeKind::Modify
            } else {
                ChangeKind::Insert
            };
            partition.eggs.insert(egg.id, egg.clone());
            kind
        };
        self.publish(kind, ClutchRow::Egg(egg.clone()));
        Ok(())
    }

    async fn get_egg(&self, clutch_id: Uuid, egg_id: Uuid) -> Result<Option<EggRecord>> {
        Ok(self
            .partitions
            .get(&clutch_id)
            .and_then(|p| p.eggs.get(&egg_id).cloned()))
    }

    async fn query_clutch(&self, clutch_id: Uuid) -> Result<Vec<ClutchRow>> {
        let partition = match self.partitions.get(&clutch_id) {
            Some(p) => p,
            None => return Ok(Vec::new()),
        };
        let mut rows = Vec::with_capacity(partition.eggs.len() + 1);
        if let Some(meta) = &partition.meta {
            rows.push(ClutchRow::Meta(meta.clone()));
        }
        rows.extend(partition.eggs.values().cloned().map(ClutchRow::Egg));
        Ok(rows)
    }

    async fn set_expected_egg_count(
        &self,
        clutch_id: Uuid,
        count: u32,
    ) -> Result<CompletionProgress> {
        let (progress, meta) = self.with_meta(clutch_id, |meta| {
            meta.egg_count = Some(count);
            CompletionProgress {
                newly_recorded: false,
                completed: meta.processing_complete,
                expected: meta.egg_count,
                barrier_crossed: meta.try_trigger_consolidation(),
            }
        })?;
        self.publish(ChangeKind::Modify, ClutchRow::Meta(meta));
        Ok(progress)
    }

    async fn record_completion(
        &self,
        clutch_id: Uuid,
        egg_id: Uuid,
    ) -> Result<CompletionProgress> {
        let (progress, meta) = self.with_meta(clutch_id, |meta| {
            let newly_recorded = meta.completed_eggs.insert(egg_id);
            meta.processing_complete = meta.completed_eggs.len() as u32;
            CompletionProgress {
                newly_recorded,
                completed: meta.processing_complete,
                expected: meta.egg_count,
                barrier_crossed: meta.try_trigger_consolidation(),
            }
        })?;
        self.publish(ChangeKind::Modify, ClutchRow::Meta(meta));
        Ok(progress)
    }

    async fn set_chick_image(
        &self,
        clutch_id: Uuid,
        egg_id: Uuid,
        url: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let egg = {
            let mut partition = self
                .partitions
                .get_mut(&clutch_id)
                .ok_or(StoreError::ClutchNotFound(clutch_id))?;
            let egg = partition
                .eggs
                .get_mut(&egg_id)
                .ok_or(StoreError::EggNotFound { clutch_id, egg_id })?;
            egg.chick_image_url = Some(url.to_string());
            egg.chick_image_generated_at = Some(at);
            egg.clone()
        };
        self.publish(ChangeKind::Modify, ClutchRow::Egg(egg));
        Ok(())
    }

    async fn set_consolidation(
        &self,
        clutch_id: Uuid,
        total_egg_count: u32,
        viable_egg_count: u32,
        chicken_image_key: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let ((), meta) = self.with_meta(clutch_id, |meta| {
            meta.total_egg_count = Some(total_egg_count);
            meta.viable_egg_count = Some(viable_egg_count);
            meta.chicken_image_key = chicken_image_key.map(|k| k.to_string());
            meta.consolidated_at = Some(at);
        })?;
        self.publish(ChangeKind::Modify, ClutchRow::Meta(meta));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_egg(clutch_id: Uuid) -> EggRecord {
        EggRecord {
            id: Uuid::new_v4(),
            clutch_id,
            created_at: Utc::now(),
            color: "white".into(),
            shape: "oval".into(),
            size: "medium".into(),
            shell_texture: "smooth".into(),
            shell_integrity: "intact".into(),
            hardness: "hard".into(),
            spots_markings: "none".into(),
            bloom_condition: "present".into(),
            cleanliness: "clean".into(),
            visible_defects: vec![],
            overall_grade: "A".into(),
            notes: String::new(),
            possible_hen_breeds: None,
            predicted_chick_breed: None,
            breed_confidence: None,
            hatch_likelihood: None,
            chicken_appearance: None,
            analysis_timestamp: None,
            chick_image_url: None,
            chick_image_generated_at: None,
        }
    }

    async fn store_with_clutch() -> (MemoryRecordStore, Uuid) {
        let store = MemoryRecordStore::new(ChangeFeed::new());
        let clutch_id = Uuid::new_v4();
        let meta = ClutchMeta::new(clutch_id, "uploads/clutch.jpg", Utc::now());
        store.put_clutch_meta(&meta).await.unwrap();
        (store, clutch_id)
    }

    #[tokio::test]
    async fn insert_then_overwrite_changes_kind() {
        let feed = ChangeFeed::new();
        let rx = feed.subscribe();
        let store = MemoryRecordStore::new(feed);

        let clutch_id = Uuid::new_v4();
        let meta = ClutchMeta::new(clutch_id, "img.jpg", Utc::now());
        store.put_clutch_meta(&meta).await.unwrap();

        let mut egg = sample_egg(clutch_id);
        store.put_egg(&egg).await.unwrap();
        egg.hatch_likelihood = Some(80.0);
        store.put_egg(&egg).await.unwrap();

        let kinds: Vec<ChangeKind> = rx.drain().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![ChangeKind::Insert, ChangeKind::Insert, ChangeKind::Modify]
        );
    }

    #[tokio::test]
    async fn record_completion_deduplicates_egg_ids() {
        let (store, clutch_id) = store_with_clutch().await;
        store.set_expected_egg_count(clutch_id, 2).await.unwrap();

        let first_egg = Uuid::new_v4();
        let second_egg = Uuid::new_v4();

        let p1 = store.record_completion(clutch_id, first_egg).await.unwrap();
        assert!(p1.newly_recorded);
        assert_eq!(p1.completed, 1);
        assert!(!p1.barrier_crossed);

        // Redelivery of the same completion event.
        let p2 = store.record_completion(clutch_id, first_egg).await.unwrap();
        assert!(!p2.newly_recorded);
        assert_eq!(p2.completed, 1);
        assert!(!p2.barrier_crossed);

        let p3 = store
            .record_completion(clutch_id, second_egg)
            .await
            .unwrap();
        assert!(p3.barrier_crossed);

        // A late redelivery after the barrier must not cross it again.
        let p4 = store
            .record_completion(clutch_id, second_egg)
            .await
            .unwrap();
        assert!(!p4.barrier_crossed);
    }

    #[tokio::test]
    async fn barrier_never_crosses_without_expected_count() {
        let (store, clutch_id) = store_with_clutch().await;
        let p = store
            .record_completion(clutch_id, Uuid::new_v4())
            .await
            .unwrap();
        assert!(p.expected.is_none());
        assert!(!p.barrier_crossed);
    }

    #[tokio::test]
    async fn stamp_after_completions_crosses_barrier_exactly_once() {
        let (store, clutch_id) = store_with_clutch().await;
        let egg = Uuid::new_v4();

        // The egg finishes processing while intake is still enumerating.
        let early = store.record_completion(clutch_id, egg).await.unwrap();
        assert!(!early.barrier_crossed);

        // The stamp arrives last and must be the write that crosses.
        let stamp = store.set_expected_egg_count(clutch_id, 1).await.unwrap();
        assert_eq!(stamp.completed, 1);
        assert!(stamp.barrier_crossed);

        // A redelivered completion afterwards must not cross again.
        let redelivered = store.record_completion(clutch_id, egg).await.unwrap();
        assert!(!redelivered.newly_recorded);
        assert!(!redelivered.barrier_crossed);
    }

    #[tokio::test]
    async fn zero_egg_stamp_crosses_barrier_immediately() {
        let (store, clutch_id) = store_with_clutch().await;
        let stamp = store.set_expected_egg_count(clutch_id, 0).await.unwrap();
        assert!(stamp.barrier_crossed);

        let meta = store.get_clutch_meta(clutch_id).await.unwrap().unwrap();
        assert!(meta.consolidation_triggered);
    }

    #[tokio::test]
    async fn completion_for_unknown_clutch_is_fatal() {
        let store = MemoryRecordStore::new(ChangeFeed::new());
        let err = store
            .record_completion(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ClutchNotFound(_)));
    }

    #[tokio::test]
    async fn query_clutch_returns_meta_and_eggs() {
        let (store, clutch_id) = store_with_clutch().await;
        store.put_egg(&sample_egg(clutch_id)).await.unwrap();
        store.put_egg(&sample_egg(clutch_id)).await.unwrap();

        let rows = store.query_clutch(clutch_id).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(matches!(rows[0], ClutchRow::Meta(_)));
        assert_eq!(rows.iter().filter_map(|r| r.as_egg()).count(), 2);
    }

    #[tokio::test]
    async fn set_chick_image_updates_egg_fields() {
        let (store, clutch_id) = store_with_clutch().await;
        let egg = sample_egg(clutch_id);
        store.put_egg(&egg).await.unwrap();

        let at = Utc::now();
        store
            .set_chick_image(clutch_id, egg.id, "blob://b/chicks/x.png", at)
            .await
            .unwrap();

        let stored = store.get_egg(clutch_id, egg.id).await.unwrap().unwrap();
        assert_eq!(stored.chick_image_url.as_deref(), Some("blob://b/chicks/x.png"));
        assert_eq!(stored.chick_image_generated_at, Some(at));
    }
}
