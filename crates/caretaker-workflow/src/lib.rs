//! Sequential execution of multi-step maintenance plans.
//!
//! A [`WorkflowPlan`] comes from an upstream planner and is treated as
//! untrusted. The [`WorkflowExecutor`] checks it against the catalog, then
//! runs each step in order through the
//! [`ExecutionRouter`](caretaker_exec::ExecutionRouter), so every step gets
//! the same preflight, privilege routing and auditing as a single run.

pub mod error;
pub mod executor;
pub mod plan;

pub use error::{Result, WorkflowError};
pub use executor::WorkflowExecutor;
pub use plan::{
    StepStatus, WorkflowOutcome, WorkflowPlan, WorkflowProgress, WorkflowResult, WorkflowState,
    WorkflowStep, WorkflowStepResult,
};
