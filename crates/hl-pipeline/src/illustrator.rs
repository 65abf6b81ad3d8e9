//! Per-egg chick illustration.
//!
//! Every egg that reaches this stage leaves it with exactly one completion
//! event, whatever the outcome: below-threshold skip, already-illustrated
//! skip, or a freshly generated image. Skipped eggs must still count toward
//! the fan-in barrier or the clutch would never consolidate.

use std::sync::Arc;

use chrono::Utc;
use hl_core::types::EggRecord;
use hl_model::ImageModel;
use hl_store::blob_store::chick_image_key;
use hl_store::{BlobStore, RecordStore};

use crate::events::{EventBus, PipelineEvent};
use crate::Result;

// ---------------------------------------------------------------------------
// IllustrationGenerator
// ---------------------------------------------------------------------------

/// Terminal outcome for one egg passing through the illustration stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IllustrationOutcome {
    Generated,
    BelowThreshold,
    AlreadyIllustrated,
}

pub struct IllustrationGenerator {
    image_model: Arc<dyn ImageModel>,
    store: Arc<dyn RecordStore>,
    blobs: Arc<dyn BlobStore>,
    bus: EventBus,
    model_name: String,
}

impl IllustrationGenerator {
    pub fn new(
        image_model: Arc<dyn ImageModel>,
        store: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        bus: EventBus,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            image_model,
            store,
            blobs,
            bus,
            model_name: model_name.into(),
        }
    }

    /// Process one analyzed egg.
    ///
    /// Generation or storage failure propagates before any record mutation or
    /// event emission, so redelivery retries the whole step cleanly.
    pub async fn process(&self, egg: &EggRecord) -> Result<IllustrationOutcome> {
        if egg.has_chick_image() {
            tracing::info!(
                clutch_id = %egg.clutch_id,
                egg_id = %egg.id,
                "skipping, chick image already exists"
            );
            self.emit_completed(egg);
            return Ok(IllustrationOutcome::AlreadyIllustrated);
        }

        if !egg.is_illustration_eligible() {
            tracing::info!(
                clutch_id = %egg.clutch_id,
                egg_id = %egg.id,
                hatch_likelihood = egg.hatch_likelihood,
                "skipping, below illustration threshold"
            );
            self.emit_completed(egg);
            return Ok(IllustrationOutcome::BelowThreshold);
        }

        let prompt = chick_prompt(egg);
        let bytes = self.image_model.generate(&prompt, &self.model_name).await?;

        let key = chick_image_key(egg.clutch_id, egg.id);
        let url = self.blobs.put(&key, bytes, "image/png").await?;
        self.store
            .set_chick_image(egg.clutch_id, egg.id, &url, Utc::now())
            .await?;

        tracing::info!(
            clutch_id = %egg.clutch_id,
            egg_id = %egg.id,
            url,
            "chick image generated"
        );

        self.emit_completed(egg);
        Ok(IllustrationOutcome::Generated)
    }

    fn emit_completed(&self, egg: &EggRecord) {
        self.bus.publish(PipelineEvent::EggProcessingCompleted {
            clutch_id: egg.clutch_id,
            egg_id: egg.id,
        });
    }
}

/// Textual description of the predicted chick, with neutral placeholders for
/// any appearance field the analysis left unset.
pub fn chick_prompt(egg: &EggRecord) -> String {
    let appearance = egg.chicken_appearance.clone().unwrap_or_default();
    let breed = egg.predicted_chick_breed.as_deref().unwrap_or("mixed breed");
    let plumage = appearance.plumage_color.as_deref().unwrap_or("yellow");
    let comb = appearance.comb_type.as_deref().unwrap_or("single");
    let body = appearance.body_type.as_deref().unwrap_or("medium");
    let pattern = appearance.feather_pattern.as_deref().unwrap_or("solid");
    let legs = appearance.leg_color.as_deref().unwrap_or("yellow");

    format!(
        "A photorealistic image of a cute baby chick, {breed} breed. \
         The chick has {plumage} downy feathers, a small {comb} comb beginning to form, \
         {body} body proportions, {pattern} feather pattern emerging, and {legs} legs. \
         The chick is standing on clean straw in a warm brooder with soft lighting. \
         Professional poultry photography style, high detail, adorable expression."
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
