//! The asynchronous processing stages between intake and a finished clutch:
//! change-feed propagators, the illustration generator, the fan-in completion
//! tracker, and the consolidator.

use hl_model::ModelError;
use hl_store::StoreError;

pub mod consolidator;
pub mod events;
pub mod illustrator;
pub mod propagators;
pub mod tracker;

pub use consolidator::{ConsolidationSummary, Consolidator};
pub use events::{EventBus, PipelineEvent};
pub use illustrator::{IllustrationGenerator, IllustrationOutcome};
pub use propagators::{InsertPropagator, UpdatePropagator};
pub use tracker::{CompletionTracker, TrackerReport};

/// Errors surfaced by pipeline stages. Anything returned here means the
/// triggering message should be redelivered.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Model(#[from] ModelError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
