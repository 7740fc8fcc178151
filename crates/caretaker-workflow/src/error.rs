//! Workflow error types.

use thiserror::Error;

/// Result type alias for workflow operations.
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Reasons a plan is rejected before any step runs.
///
/// Step failures during a run are recorded in the
/// [`WorkflowResult`](crate::WorkflowResult), not raised.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("workflow plan has no steps")]
    EmptyPlan,

    #[error("workflow plan has {count} steps, the maximum is {max}")]
    TooManySteps { count: usize, max: usize },

    #[error("step {index} references unknown capability '{capability_id}'")]
    UnknownCapability { index: usize, capability_id: String },

    #[error("capability catalog is unavailable: {0}")]
    CatalogUnavailable(String),

    /// This executor is already running a plan.
    #[error("a workflow is already running")]
    AlreadyRunning,

    #[error("failed to read plan: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid plan document: {0}")]
    Parse(#[from] serde_json::Error),
}
