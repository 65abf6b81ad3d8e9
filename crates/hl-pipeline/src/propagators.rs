//! Change-feed propagators: classify change records and forward qualifying
//! egg rows onto the stage queues.
//!
//! Neither propagator retries internally. A batch that fails partway returns
//! the error so the feed consumer redelivers the whole batch; downstream
//! stages tolerate the resulting duplicates.

use hl_core::types::{ClutchRow, EggRecord};
use hl_store::{ChangeKind, ChangeRecord, StoreError, TaskQueue};

// ---------------------------------------------------------------------------
// InsertPropagator
// ---------------------------------------------------------------------------

/// Forwards newly created egg rows to the to-be-analyzed queue.
///
/// Metadata rows also appear on the feed as inserts and are filtered out
/// here; only egg rows are analysis tasks.
pub struct InsertPropagator {
    queue: TaskQueue<EggRecord>,
}

impl InsertPropagator {
    pub fn new(queue: TaskQueue<EggRecord>) -> Self {
        Self { queue }
    }

    /// Process one batch of change records, returning how many were
    /// forwarded.
    pub fn handle_batch(&self, batch: &[ChangeRecord]) -> Result<u32, StoreError> {
        let mut forwarded = 0;
        for change in batch {
            if change.kind != ChangeKind::Insert {
                continue;
            }
            let egg = match &change.row {
                ClutchRow::Egg(egg) => egg,
                ClutchRow::Meta(_) => continue,
            };
            self.queue.send(egg.clone())?;
            tracing::debug!(
                clutch_id = %egg.clutch_id,
                egg_id = %egg.id,
                queue = self.queue.name(),
                "forwarded new egg"
            );
            forwarded += 1;
        }
        Ok(forwarded)
    }
}

// ---------------------------------------------------------------------------
// UpdatePropagator
// ---------------------------------------------------------------------------

/// Forwards freshly analyzed egg rows to the to-illustrate queue.
///
/// Qualifies a modification only when the analysis fields are present and no
/// chick image exists yet, so image-field updates do not loop the egg back
/// through illustration.
pub struct UpdatePropagator {
    queue: TaskQueue<EggRecord>,
}

impl UpdatePropagator {
    pub fn new(queue: TaskQueue<EggRecord>) -> Self {
        Self { queue }
    }

    pub fn handle_batch(&self, batch: &[ChangeRecord]) -> Result<u32, StoreError> {
        let mut forwarded = 0;
        for change in batch {
            if change.kind != ChangeKind::Modify {
                continue;
            }
            let egg = match &change.row {
                ClutchRow::Egg(egg) => egg,
                ClutchRow::Meta(_) => continue,
            };
            if !egg.is_analyzed() {
                continue;
            }
            if egg.has_chick_image() {
                tracing::debug!(
                    clutch_id = %egg.clutch_id,
                    egg_id = %egg.id,
                    "skipping, already has chick image"
                );
                continue;
            }
            self.queue.send(egg.clone())?;
            tracing::debug!(
                clutch_id = %egg.clutch_id,
                egg_id = %egg.id,
                hatch_likelihood = egg.hatch_likelihood,
                queue = self.queue.name(),
                "forwarded analyzed egg"
            );
            forwarded += 1;
        }
        Ok(forwarded)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hl_core::types::{ClutchMeta, EggAnalysis};
    use uuid::Uuid;

    fn egg(clutch_id: Uuid) -> EggRecord {
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

    fn analyzed_egg(clutch_id: Uuid, hatch: f64) -> EggRecord {
        let mut record = egg(clutch_id);
        let mut analysis = EggAnalysis::uncertain_default();
        analysis.hatch_likelihood = hatch;
        record.apply_analysis(analysis, Utc::now());
        record
    }

    fn change(kind: ChangeKind, row: ClutchRow) -> ChangeRecord {
        ChangeRecord { kind, row }
    }

    #[test]
    fn insert_path_forwards_new_eggs_only() {
        let queue = TaskQueue::new("to-be-analyzed");
        let propagator = InsertPropagator::new(queue.clone());
        let clutch_id = Uuid::new_v4();

        let batch = vec![
            change(
                ChangeKind::Insert,
                ClutchRow::Meta(ClutchMeta::new(clutch_id, "img.jpg", Utc::now())),
            ),
            change(ChangeKind::Insert, ClutchRow::Egg(egg(clutch_id))),
            change(ChangeKind::Modify, ClutchRow::Egg(analyzed_egg(clutch_id, 80.0))),
        ];

        let forwarded = propagator.handle_batch(&batch).unwrap();
        assert_eq!(forwarded, 1);
        assert_eq!(queue.len(), 1);
        assert!(!queue.try_recv().unwrap().is_analyzed());
    }

    #[test]
    fn update_path_forwards_analyzed_eggs_without_images() {
        let queue = TaskQueue::new("to-illustrate");
        let propagator = UpdatePropagator::new(queue.clone());
        let clutch_id = Uuid::new_v4();

        let mut illustrated = analyzed_egg(clutch_id, 90.0);
        illustrated.chick_image_url = Some("blob://b/chicks/x.png".into());

        let batch = vec![
            // Raw insert: not an illustration task.
            change(ChangeKind::Insert, ClutchRow::Egg(egg(clutch_id))),
            // Modify without analysis fields: not yet qualified.
            change(ChangeKind::Modify, ClutchRow::Egg(egg(clutch_id))),
            // Analyzed, no image: forwarded.
            change(ChangeKind::Modify, ClutchRow::Egg(analyzed_egg(clutch_id, 75.0))),
            // Already illustrated: idempotently skipped.
            change(ChangeKind::Modify, ClutchRow::Egg(illustrated)),
            // Metadata modifications never qualify.
            change(
                ChangeKind::Modify,
                ClutchRow::Meta(ClutchMeta::new(clutch_id, "img.jpg", Utc::now())),
            ),
        ];

        let forwarded = propagator.handle_batch(&batch).unwrap();
        assert_eq!(forwarded, 1);
        assert_eq!(queue.try_recv().unwrap().hatch_likelihood, Some(75.0));
    }

    #[test]
    fn low_scores_still_forward_to_illustration() {
        // The 70-point threshold is applied by the generator, not here, so a
        // low-scoring egg still reaches its terminal skip outcome.
        let queue = TaskQueue::new("to-illustrate");
        let propagator = UpdatePropagator::new(queue.clone());

        let batch = vec![change(
            ChangeKind::Modify,
            ClutchRow::Egg(analyzed_egg(Uuid::new_v4(), 10.0)),
        )];
        assert_eq!(propagator.handle_batch(&batch).unwrap(), 1);
    }
}
