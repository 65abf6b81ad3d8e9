//! Clutch consolidation: final aggregates and the optional composite image.

use std::sync::Arc;

use chrono::Utc;
use hl_core::types::EggRecord;
use hl_model::ImageModel;
use hl_store::blob_store::composite_image_key;
use hl_store::{BlobStore, RecordStore, StoreError};
use uuid::Uuid;

use crate::Result;

// ---------------------------------------------------------------------------
// Consolidator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidationSummary {
    pub clutch_id: Uuid,
    pub total_egg_count: u32,
    pub viable_egg_count: u32,
    pub chicken_image_key: Option<String>,
}

pub struct Consolidator {
    store: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    image_model: Arc<dyn ImageModel>,
    model_name: String,
}

impl Consolidator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        image_model: Arc<dyn ImageModel>,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            blobs,
            image_model,
            model_name: model_name.into(),
        }
    }

    /// Recompute the clutch's aggregates and write them onto the metadata
    /// row, with a composite image of the viable chicks when possible.
    ///
    /// Composite generation is an optional enhancement: its failure is logged
    /// and consolidation proceeds with a null image key. Aggregate writes use
    /// overwrite semantics, so a duplicate invocation converges on the same
    /// final state (at the cost of regenerating the composite).
    pub async fn consolidate(&self, clutch_id: Uuid) -> Result<ConsolidationSummary> {
        let rows = self.store.query_clutch(clutch_id).await?;
        if !rows.iter().any(|r| matches!(r, hl_core::types::ClutchRow::Meta(_))) {
            return Err(StoreError::ClutchNotFound(clutch_id).into());
        }

        let eggs: Vec<&EggRecord> = rows.iter().filter_map(|r| r.as_egg()).collect();
        let total_egg_count = eggs.len() as u32;
        let viable: Vec<&EggRecord> = eggs.iter().filter(|e| e.is_viable()).copied().collect();
        let viable_egg_count = viable.len() as u32;

        tracing::info!(
            clutch_id = %clutch_id,
            total = total_egg_count,
            viable = viable_egg_count,
            "consolidating clutch"
        );

        let mut chicken_image_key = None;
        if let Some(prompt) = composite_prompt(&viable) {
            match self.generate_composite(clutch_id, &prompt).await {
                Ok(key) => chicken_image_key = Some(key),
                Err(err) => {
                    tracing::warn!(
                        clutch_id = %clutch_id,
                        error = %err,
                        "composite image generation failed, continuing without it"
                    );
                }
            }
        }

        self.store
            .set_consolidation(
                clutch_id,
                total_egg_count,
                viable_egg_count,
                chicken_image_key.as_deref(),
                Utc::now(),
            )
            .await?;

        Ok(ConsolidationSummary {
            clutch_id,
            total_egg_count,
            viable_egg_count,
            chicken_image_key,
        })
    }

    async fn generate_composite(&self, clutch_id: Uuid, prompt: &str) -> Result<String> {
        let bytes = self.image_model.generate(prompt, &self.model_name).await?;
        let key = composite_image_key(clutch_id);
        self.blobs.put(&key, bytes, "image/png").await?;
        Ok(key)
    }
}

/// Build the composite-image prompt enumerating every viable egg's predicted
/// chicken. Returns `None` when there is nothing to render.
pub fn composite_prompt(viable_eggs: &[&EggRecord]) -> Option<String> {
    if viable_eggs.is_empty() {
        return None;
    }

    let descriptions: Vec<String> = viable_eggs
        .iter()
        .enumerate()
        .map(|(index, egg)| {
            let appearance = egg.chicken_appearance.clone().unwrap_or_default();
            let breed = egg.predicted_chick_breed.as_deref().unwrap_or("mixed breed");
            let plumage = appearance.plumage_color.as_deref().unwrap_or("brown");
            let comb = appearance.comb_type.as_deref().unwrap_or("single");
            let body = appearance.body_type.as_deref().unwrap_or("medium");
            let pattern = appearance.feather_pattern.as_deref().unwrap_or("solid");
            let legs = appearance.leg_color.as_deref().unwrap_or("yellow");

            format!(
                "- Chicken {}: A true-to-breed {breed} chicken with authentic \
                 {plumage} {pattern} plumage, characteristic {comb} comb, \
                 {body} build, and {legs} legs",
                index + 1
            )
        })
        .collect();

    let count = viable_eggs.len();
    let plural = if count > 1 { "s" } else { "" };

    Some(format!(
        "A photorealistic photograph of {count} adult chicken{plural} foraging and \
         scratching in a lush green grassy pasture on a sunny day.\n\
         Each chicken must be anatomically accurate and true to its specific breed characteristics:\n\
         {}\n\
         The chickens are actively scratching the ground, pecking at grass, and foraging \
         naturally. Soft golden sunlight, shallow depth of field, detailed feather textures \
         showing breed-specific patterns, professional wildlife photography style.",
        descriptions.join("\n")
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use hl_core::types::{ClutchMeta, EggAnalysis};
    use hl_model::{MockImageModel, ModelError};
    use hl_store::{ChangeFeed, MemoryBlobStore, MemoryRecordStore};

    use crate::PipelineError;

    struct Rig {
        consolidator: Consolidator,
        image_model: Arc<MockImageModel>,
        store: Arc<MemoryRecordStore>,
        blobs: Arc<MemoryBlobStore>,
    }

    fn rig(image_model: MockImageModel) -> Rig {
        let image_model = Arc::new(image_model);
        let store = Arc::new(MemoryRecordStore::new(ChangeFeed::new()));
        let blobs = Arc::new(MemoryBlobStore::new("hatchline-images"));
        let consolidator = Consolidator::new(
            store.clone(),
            blobs.clone(),
            image_model.clone(),
            "gpt-image-1",
        );
        Rig {
            consolidator,
            image_model,
            store,
            blobs,
        }
    }

    async fn seed_clutch(store: &MemoryRecordStore, hatches: &[f64]) -> Uuid {
        let clutch_id = Uuid::new_v4();
        store
            .put_clutch_meta(&ClutchMeta::new(clutch_id, "img.jpg", Utc::now()))
            .await
            .unwrap();

        for (i, &hatch) in hatches.iter().enumerate() {
            let mut egg = EggRecord {
                id: Uuid::new_v4(),
                clutch_id,
                created_at: Utc::now(),
                color: "brown".into(),
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
            };
            let mut analysis = EggAnalysis::uncertain_default();
            analysis.hatch_likelihood = hatch;
            analysis.predicted_chick_breed = format!("Breed{i}");
            egg.apply_analysis(analysis, Utc::now());
            store.put_egg(&egg).await.unwrap();
        }
        clutch_id
    }

    #[tokio::test]
    async fn counts_viable_at_fifty_and_renders_only_those() {
        let r = rig(MockImageModel::new());
        let clutch_id = seed_clutch(&r.store, &[80.0, 40.0, 95.0, 60.0]).await;

        let summary = r.consolidator.consolidate(clutch_id).await.unwrap();
        assert_eq!(summary.total_egg_count, 4);
        assert_eq!(summary.viable_egg_count, 3);
        assert_eq!(
            summary.chicken_image_key.as_deref(),
            Some(composite_image_key(clutch_id).as_str())
        );

        // Prompt enumerates exactly the three viable chickens.
        let prompt = &r.image_model.prompts()[0];
        assert!(prompt.contains("3 adult chickens"));
        assert!(prompt.contains("- Chicken 3:"));
        assert!(!prompt.contains("- Chicken 4:"));

        let meta = r.store.get_clutch_meta(clutch_id).await.unwrap().unwrap();
        assert_eq!(meta.total_egg_count, Some(4));
        assert_eq!(meta.viable_egg_count, Some(3));
        assert!(meta.is_consolidated());
        assert_eq!(r.blobs.object_count(), 1);
    }

    #[tokio::test]
    async fn zero_viable_eggs_skip_image_generation() {
        let r = rig(MockImageModel::new());
        let clutch_id = seed_clutch(&r.store, &[10.0, 20.0]).await;

        let summary = r.consolidator.consolidate(clutch_id).await.unwrap();
        assert_eq!(summary.viable_egg_count, 0);
        assert_eq!(summary.chicken_image_key, None);
        assert_eq!(r.image_model.call_count(), 0);

        let meta = r.store.get_clutch_meta(clutch_id).await.unwrap().unwrap();
        assert!(meta.is_consolidated());
    }

    #[tokio::test]
    async fn image_failure_is_non_fatal() {
        let r = rig(MockImageModel::new().with_result(Err(ModelError::ApiError {
            status: 500,
            message: "render failed".to_string(),
        })));
        let clutch_id = seed_clutch(&r.store, &[90.0]).await;

        let summary = r.consolidator.consolidate(clutch_id).await.unwrap();
        assert_eq!(summary.viable_egg_count, 1);
        assert_eq!(summary.chicken_image_key, None);

        let meta = r.store.get_clutch_meta(clutch_id).await.unwrap().unwrap();
        assert_eq!(meta.chicken_image_key, None);
        assert!(meta.is_consolidated());
    }

    #[tokio::test]
    async fn unknown_clutch_is_fatal() {
        let r = rig(MockImageModel::new());
        let err = r.consolidator.consolidate(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Store(StoreError::ClutchNotFound(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_consolidation_converges() {
        let r = rig(MockImageModel::new());
        let clutch_id = seed_clutch(&r.store, &[75.0, 55.0]).await;

        let first = r.consolidator.consolidate(clutch_id).await.unwrap();
        let second = r.consolidator.consolidate(clutch_id).await.unwrap();
        assert_eq!(first, second);
    }
}
