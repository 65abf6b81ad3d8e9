pub mod agent_loop;
pub mod intake;
pub mod prompts;
pub mod state_machine;
pub mod tools;
pub mod viability;

pub use agent_loop::{AgentLoop, LoopError, LoopOutcome, ToolHandler};
pub use intake::{IntakeOutcome, VisionIntakeAgent};
pub use viability::ViabilityAgent;
