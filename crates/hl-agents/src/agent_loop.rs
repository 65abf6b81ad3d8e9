//! The tool-calling conversation loop shared by both agents.
//!
//! Seeded with a user message, the loop alternates model turns and tool
//! execution until the model stops requesting tools or the turn budget runs
//! out. Unlike an unbounded `while true`, a runaway model here fails loudly
//! with [`LoopError::TurnBudgetExhausted`] instead of looping forever.

use std::time::Duration;

use async_trait::async_trait;
use hl_model::{ChatConfig, ChatMessage, ChatModel, ModelError, StopReason, ToolSpec, ToolUse};
use hl_store::StoreError;
use thiserror::Error;

use crate::state_machine::{LoopSignal, LoopStateMachine, StateMachineError};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LoopError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    State(#[from] StateMachineError),

    /// The model was still requesting tools after the final permitted turn.
    #[error("agent loop exhausted its budget of {0} turns")]
    TurnBudgetExhausted(u32),

    /// A single model turn exceeded the per-turn deadline.
    #[error("model turn exceeded {0}s deadline")]
    TurnTimeout(u64),

    /// The model called a known tool with input that failed to deserialize.
    #[error("malformed input for tool {tool}: {message}")]
    MalformedToolInput { tool: String, message: String },
}

// ---------------------------------------------------------------------------
// ToolHandler
// ---------------------------------------------------------------------------

/// Executes the tool calls a model requests during a loop run.
///
/// `handle` returns the JSON result fed back to the model; implementations
/// answer unrecognized tool names with a structured `{"error": ...}` value
/// rather than an `Err`, so the model gets a chance to correct itself.
#[async_trait]
pub trait ToolHandler: Send {
    fn specs(&self) -> Vec<ToolSpec>;

    async fn handle(&mut self, call: &ToolUse) -> Result<serde_json::Value, LoopError>;
}

// ---------------------------------------------------------------------------
// AgentLoop
// ---------------------------------------------------------------------------

/// Result of a completed loop run.
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    /// Model turns consumed, including the final non-tool turn.
    pub turns: u32,
    /// Text of the model's closing message.
    pub final_text: String,
}

pub struct AgentLoop<'a> {
    model: &'a dyn ChatModel,
    config: ChatConfig,
    max_turns: u32,
    turn_timeout: Duration,
}

impl<'a> AgentLoop<'a> {
    pub fn new(model: &'a dyn ChatModel, config: ChatConfig) -> Self {
        Self {
            model,
            config,
            max_turns: 8,
            turn_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = timeout;
        self
    }

    /// Run the loop to completion.
    ///
    /// `seed` is the opening conversation (typically one user message, with
    /// an image block for vision intake). Tool calls are dispatched to
    /// `handler` in the order the model issued them; all results from one
    /// turn travel back together in a single user message.
    pub async fn run(
        &self,
        seed: Vec<ChatMessage>,
        handler: &mut dyn ToolHandler,
    ) -> Result<LoopOutcome, LoopError> {
        let tools = handler.specs();
        let mut messages = seed;
        let mut machine = LoopStateMachine::new();

        for turn in 1..=self.max_turns {
            let converse = self.model.converse(&messages, &tools, &self.config);
            let model_turn = match tokio::time::timeout(self.turn_timeout, converse).await {
                Ok(result) => result?,
                Err(_) => return Err(LoopError::TurnTimeout(self.turn_timeout.as_secs())),
            };
            machine.transition(LoopSignal::ModelReplied)?;

            tracing::debug!(
                turn,
                stop_reason = ?model_turn.stop_reason,
                input_tokens = model_turn.input_tokens,
                output_tokens = model_turn.output_tokens,
                "model turn"
            );

            messages.push(model_turn.message.clone());

            let tool_uses: Vec<ToolUse> = model_turn
                .message
                .tool_uses()
                .into_iter()
                .cloned()
                .collect();

            if model_turn.stop_reason == StopReason::ToolUse && !tool_uses.is_empty() {
                machine.transition(LoopSignal::ToolsRequested)?;

                let mut results = Vec::with_capacity(tool_uses.len());
                for call in &tool_uses {
                    let result = handler.handle(call).await?;
                    tracing::debug!(turn, tool = %call.name, "tool executed");
                    results.push((call.id.clone(), result));
                }
                messages.push(ChatMessage::tool_results(results));

                machine.transition(LoopSignal::ToolsExecuted)?;
            } else {
                machine.transition(LoopSignal::Completed)?;
                return Ok(LoopOutcome {
                    turns: turn,
                    final_text: model_turn.message.text(),
                });
            }
        }

        Err(LoopError::TurnBudgetExhausted(self.max_turns))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
