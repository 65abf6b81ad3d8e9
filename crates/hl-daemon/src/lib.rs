//! Single-process runtime for the egg-analysis pipeline: wires the stores,
//! queues, event bus, agents, and worker loops together.

pub mod daemon;
pub mod logging;
pub mod shutdown;

pub use daemon::Daemon;
pub use shutdown::ShutdownSignal;
