//! Viability analysis: score one egg's hatch likelihood via a tool-calling
//! conversation over its intake attributes.
//!
//! Model-side failure here is absorbed: the agent writes the hard-coded
//! fallback analysis so the egg still carries a hatch likelihood and the
//! downstream barrier can make progress. Store failures stay fatal so the
//! task is redelivered instead of masked.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hl_core::config::AgentConfig;
use hl_core::types::{clamp_hatch_likelihood, EggAnalysis, EggRecord};
use hl_model::{ChatConfig, ChatMessage, ChatModel, ToolSpec, ToolUse};
use hl_store::RecordStore;

use crate::agent_loop::{AgentLoop, LoopError, ToolHandler};
use crate::prompts;
use crate::tools::{self, SaveEggAnalysisInput, ToolKind};

// ---------------------------------------------------------------------------
// ViabilityAgent
// ---------------------------------------------------------------------------

pub struct ViabilityAgent {
    model: Arc<dyn ChatModel>,
    store: Arc<dyn RecordStore>,
    chat: ChatConfig,
    max_turns: u32,
    turn_timeout: Duration,
}

impl ViabilityAgent {
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

    /// Analyze one egg and persist the verdict.
    ///
    /// On any model-side failure (API error, turn budget, malformed tool
    /// input) or a run where the model never called its tool, the fallback
    /// analysis is written instead. Only store errors propagate.
    pub async fn analyze(&self, egg: &EggRecord) -> Result<(), LoopError> {
        let seed = vec![ChatMessage::user_text(prompts::viability_user_message(egg))];

        let config = ChatConfig {
            system_prompt: Some(prompts::viability_system_prompt()),
            ..self.chat.clone()
        };

        let mut handler = SaveAnalysisHandler {
            store: Arc::clone(&self.store),
            egg: egg.clone(),
            saved: false,
        };

        let result = AgentLoop::new(self.model.as_ref(), config)
            .with_max_turns(self.max_turns)
            .with_turn_timeout(self.turn_timeout)
            .run(seed, &mut handler)
            .await;

        match result {
            Ok(outcome) => {
                if handler.saved {
                    tracing::info!(
                        clutch_id = %egg.clutch_id,
                        egg_id = %egg.id,
                        turns = outcome.turns,
                        "analysis saved"
                    );
                    return Ok(());
                }
                tracing::warn!(
                    clutch_id = %egg.clutch_id,
                    egg_id = %egg.id,
                    "model finished without saving an analysis, writing fallback"
                );
                self.write_fallback(egg).await
            }
            Err(err @ LoopError::Store(_)) => Err(err),
            Err(err) => {
                tracing::warn!(
                    clutch_id = %egg.clutch_id,
                    egg_id = %egg.id,
                    error = %err,
                    "analysis loop failed, writing fallback"
                );
                self.write_fallback(egg).await
            }
        }
    }

    async fn write_fallback(&self, egg: &EggRecord) -> Result<(), LoopError> {
        let mut record = egg.clone();
        record.apply_analysis(EggAnalysis::uncertain_default(), Utc::now());
        self.store.put_egg(&record).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SaveAnalysisHandler
// ---------------------------------------------------------------------------

struct SaveAnalysisHandler {
    store: Arc<dyn RecordStore>,
    /// Tracks the latest persisted version of the egg across repeated saves.
    egg: EggRecord,
    saved: bool,
}

#[async_trait]
impl ToolHandler for SaveAnalysisHandler {
    fn specs(&self) -> Vec<ToolSpec> {
        vec![tools::save_egg_analysis_spec()]
    }

    async fn handle(&mut self, call: &ToolUse) -> Result<serde_json::Value, LoopError> {
        match ToolKind::parse(&call.name) {
            Some(ToolKind::SaveEggAnalysis) => {
                let input: SaveEggAnalysisInput =
                    serde_json::from_value(call.input.clone()).map_err(|e| {
                        LoopError::MalformedToolInput {
                            tool: call.name.clone(),
                            message: e.to_string(),
                        }
                    })?;

                let analysis = input.into_analysis();
                let hatch = clamp_hatch_likelihood(analysis.hatch_likelihood);

                let mut record = self.egg.clone();
                record.apply_analysis(analysis, Utc::now());
                self.store.put_egg(&record).await?;
                self.egg = record;
                self.saved = true;

                tracing::debug!(
                    clutch_id = %self.egg.clutch_id,
                    egg_id = %self.egg.id,
                    hatch_likelihood = hatch,
                    "analysis persisted"
                );

                Ok(serde_json::json!({
                    "success": true,
                    "message": format!("Analysis saved for egg {}", self.egg.id),
                    "hatchLikelihood": hatch,
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
