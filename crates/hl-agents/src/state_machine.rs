use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// LoopPhase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    AwaitingModel,
    ModelResponded,
    ToolExecution,
    Done,
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LoopPhase::AwaitingModel => "AwaitingModel",
            LoopPhase::ModelResponded => "ModelResponded",
            LoopPhase::ToolExecution => "ToolExecution",
            LoopPhase::Done => "Done",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// LoopSignal
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopSignal {
    ModelReplied,
    ToolsRequested,
    ToolsExecuted,
    Completed,
}

impl fmt::Display for LoopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LoopSignal::ModelReplied => "ModelReplied",
            LoopSignal::ToolsRequested => "ToolsRequested",
            LoopSignal::ToolsExecuted => "ToolsExecuted",
            LoopSignal::Completed => "Completed",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StateMachineError {
    #[error("invalid transition: cannot apply {signal} in phase {phase}")]
    InvalidTransition { phase: LoopPhase, signal: LoopSignal },
}

// ---------------------------------------------------------------------------
// LoopStateMachine
// ---------------------------------------------------------------------------

/// The agent-loop protocol as a transition-checked state machine.
///
/// Each model turn either requests tools (loop back through execution) or
/// signals completion. Keeping the phases explicit makes protocol violations
/// (e.g. executing tools before the model replied) an error instead of a
/// silent logic bug.
#[derive(Debug, Clone)]
pub struct LoopStateMachine {
    current: LoopPhase,
    history: Vec<(LoopPhase, LoopSignal, LoopPhase)>,
}

impl LoopStateMachine {
    /// Create a new state machine awaiting the first model turn.
    pub fn new() -> Self {
        Self {
            current: LoopPhase::AwaitingModel,
            history: Vec::new(),
        }
    }

    pub fn phase(&self) -> LoopPhase {
        self.current
    }

    pub fn history(&self) -> &[(LoopPhase, LoopSignal, LoopPhase)] {
        &self.history
    }

    pub fn is_done(&self) -> bool {
        self.current == LoopPhase::Done
    }

    /// Attempt a transition driven by `signal`.
    ///
    /// Valid transitions:
    /// - AwaitingModel  + ModelReplied   -> ModelResponded
    /// - ModelResponded + ToolsRequested -> ToolExecution
    /// - ModelResponded + Completed      -> Done
    /// - ToolExecution  + ToolsExecuted  -> AwaitingModel
    pub fn transition(&mut self, signal: LoopSignal) -> Result<LoopPhase, StateMachineError> {
        let next = match (self.current, signal) {
            (LoopPhase::AwaitingModel, LoopSignal::ModelReplied) => LoopPhase::ModelResponded,
            (LoopPhase::ModelResponded, LoopSignal::ToolsRequested) => LoopPhase::ToolExecution,
            (LoopPhase::ModelResponded, LoopSignal::Completed) => LoopPhase::Done,
            (LoopPhase::ToolExecution, LoopSignal::ToolsExecuted) => LoopPhase::AwaitingModel,
            _ => {
                return Err(StateMachineError::InvalidTransition {
                    phase: self.current,
                    signal,
                });
            }
        };

        let from = self.current;
        self.current = next;
        self.history.push((from, signal, next));
        tracing::debug!(from = %from, signal = %signal, to = %next, "agent loop transition");
        Ok(next)
    }

    /// Returns `true` if the given signal is valid in the current phase.
    pub fn can_transition(&self, signal: LoopSignal) -> bool {
        matches!(
            (self.current, signal),
            (LoopPhase::AwaitingModel, LoopSignal::ModelReplied)
                | (LoopPhase::ModelResponded, LoopSignal::ToolsRequested)
                | (LoopPhase::ModelResponded, LoopSignal::Completed)
                | (LoopPhase::ToolExecution, LoopSignal::ToolsExecuted)
        )
    }
}

impl Default for LoopStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
