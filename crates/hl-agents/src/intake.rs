//! Vision intake: one clutch image in, N egg records out.
//!
//! The agent shows the model the uploaded image, and the model calls
//! `store_egg_data` once per egg it identifies. Errors here propagate to the
//! caller untouched; a half-ingested clutch is redelivered rather than
//! silently completed short.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hl_core::config::AgentConfig;
use hl_core::types::ClutchMeta;
use hl_model::{ChatConfig, ChatMessage, ChatModel, ContentBlock, ImageFormat, ToolSpec, ToolUse};
use hl_store::RecordStore;
use uuid::Uuid;

use crate::agent_loop::{AgentLoop, LoopError, ToolHandler};
use crate::prompts;
use crate::tools::{self, StoreEggDataInput, ToolKind};

// ---------------------------------------------------------------------------
// VisionIntakeAgent
// ---------------------------------------------------------------------------

/// Result of ingesting one clutch image.
#[derive(Debug, Clone, Copy)]
pub struct IntakeOutcome {
    pub clutch_id: Uuid,
    /// Number of eggs the model stored, stamped onto the metadata row as the
    /// expected count for the fan-in barrier.
    pub eggs_detected: u32,
    /// `true` when the expected-count stamp itself crossed the fan-in
    /// barrier: every egg had already completed (or the clutch has zero
    /// eggs), so the caller must kick off consolidation — no further
    /// completion event will.
    pub consolidation_ready: bool,
}

pub struct VisionIntakeAgent {
    model: Arc<dyn ChatModel>,
    store: Arc<dyn RecordStore>,
    chat: ChatConfig,
    max_turns: u32,
    turn_timeout: Duration,
}

impl VisionIntakeAgent {
    pub fn new(
        model: Arc<dyn ChatModel>,
        store: Arc<dyn RecordStore>,
        chat: ChatConfig,
        agent: &AgentConfig,
    ) -> Self {
        Self {
            model,
            store,
            chat,
            max_turns: agent.max_turns,
            turn_timeout: Duration::from_secs(agent.turn_timeout_secs),
        }
    }

    /// Create the clutch metadata row, run the vision loop, then stamp the
    /// expected egg count once enumeration is done.
    ///
    /// The count is stamped after the loop so the barrier cannot fire against
    /// a partial enumeration.
    pub async fn ingest(
        &self,
        image_bytes: Vec<u8>,
        image_key: &str,
    ) -> Result<IntakeOutcome, LoopError> {
        let clutch_id = Uuid::new_v4();
        let meta = ClutchMeta::new(clutch_id, image_key, Utc::now());
        self.store.put_clutch_meta(&meta).await?;
        tracing::info!(clutch_id = %clutch_id, image_key, "clutch created");

        let seed = vec![ChatMessage::user(vec![
            ContentBlock::Image {
                format: ImageFormat::from_key(image_key),
                data: image_bytes,
            },
            ContentBlock::Text {
                text: prompts::intake_user_message(),
            },
        ])];

        let config = ChatConfig {
            system_prompt: Some(prompts::intake_system_prompt()),
            ..self.chat.clone()
        };

        let mut handler = StoreEggHandler {
            store: Arc::clone(&self.store),
            clutch_id,
            eggs_stored: 0,
        };

        let outcome = AgentLoop::new(self.model.as_ref(), config)
            .with_max_turns(self.max_turns)
            .with_turn_timeout(self.turn_timeout)
            .run(seed, &mut handler)
            .await?;

        let progress = self
            .store
            .set_expected_egg_count(clutch_id, handler.eggs_stored)
            .await?;

        tracing::info!(
            clutch_id = %clutch_id,
            eggs = handler.eggs_stored,
            turns = outcome.turns,
            consolidation_ready = progress.barrier_crossed,
            "intake complete"
        );

        Ok(IntakeOutcome {
            clutch_id,
            eggs_detected: handler.eggs_stored,
            consolidation_ready: progress.barrier_crossed,
        })
    }
}

// ---------------------------------------------------------------------------
// StoreEggHandler
// ---------------------------------------------------------------------------

struct StoreEggHandler {
    store: Arc<dyn RecordStore>,
    clutch_id: Uuid,
    eggs_stored: u32,
}

#[async_trait]
impl ToolHandler for StoreEggHandler {
    fn specs(&self) -> Vec<ToolSpec> {
        vec![tools::store_egg_data_spec()]
    }

    async fn handle(&mut self, call: &ToolUse) -> Result<serde_json::Value, LoopError> {
        match ToolKind::parse(&call.name) {
            Some(ToolKind::StoreEggData) => {
                let input: StoreEggDataInput =
                    serde_json::from_value(call.input.clone()).map_err(|e| {
                        LoopError::MalformedToolInput {
                            tool: call.name.clone(),
                            message: e.to_string(),
                        }
                    })?;

                let egg_id = Uuid::new_v4();
                let record = input.into_record(self.clutch_id, egg_id, Utc::now());
                self.store.put_egg(&record).await?;
                self.eggs_stored += 1;
                tracing::debug!(clutch_id = %self.clutch_id, egg_id = %egg_id, "egg stored");

                Ok(serde_json::json!({
                    "success": true,
                    "eggId": egg_id,
                    "message": format!("Egg {egg_id} saved successfully"),
                }))
            }
            _ => Ok(serde_json::json!({
                "error": format!("Unknown tool: {}", call.name),
            })),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
