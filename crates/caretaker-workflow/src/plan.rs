//! Workflow plans, step results and run state.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use caretaker_catalog::RiskLevel;
use caretaker_exec::ExecutionResult;
use serde::{Deserialize, Serialize};

use crate::error::Result;

// ─────────────────────────────────────────────────────────────────────────────
// Plan
// ─────────────────────────────────────────────────────────────────────────────

/// An ordered list of capability invocations produced by an upstream planner.
///
/// Plans are untrusted input: ids are re-validated against the catalog and
/// every step is preflighted again when it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowPlan {
    pub summary: String,
    /// Risk assigned upstream. Informational; it never replaces privilege checks.
    pub risk: RiskLevel,
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowPlan {
    pub fn new(summary: impl Into<String>, risk: RiskLevel) -> Self {
        Self {
            summary: summary.into(),
            risk,
            steps: Vec::new(),
        }
    }

    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

/// One invocation in a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub capability_id: String,
    #[serde(default)]
    pub arguments: HashMap<String, String>,
    /// Why the planner chose this step.
    #[serde(default)]
    pub rationale: String,
    /// Set by the upstream safety stage: a failure aborts the run.
    #[serde(default)]
    pub critical: bool,
}

impl WorkflowStep {
    pub fn new(capability_id: impl Into<String>) -> Self {
        Self {
            capability_id: capability_id.into(),
            arguments: HashMap::new(),
            rationale: String::new(),
            critical: false,
        }
    }

    pub fn with_argument(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Results
// ─────────────────────────────────────────────────────────────────────────────

/// How one step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    /// Ran and exited non-zero.
    Failed,
    TimedOut,
    /// Refused or could not be dispatched (preflight, helper, arguments).
    Error,
}

impl StepStatus {
    pub fn is_success(&self) -> bool {
        *self == Self::Success
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStepResult {
    /// Position in the plan, from 0.
    pub index: usize,
    pub capability_id: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration: Duration,
}

/// Sent to the progress callback after every step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowProgress {
    pub index: usize,
    pub total: usize,
    pub step_result: WorkflowStepResult,
}

/// How the run as a whole ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WorkflowOutcome {
    /// Every step was attempted.
    Completed,
    /// Stopped between steps on request.
    Cancelled,
    /// A destructive or critical step failed.
    Aborted { step: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub results: Vec<WorkflowStepResult>,
    /// Indices of steps that did not succeed.
    pub failed_steps: Vec<usize>,
    pub total_duration: Duration,
    /// Every step in the plan succeeded.
    pub success: bool,
    /// Successful steps over steps in the plan.
    pub success_rate: f64,
    pub outcome: WorkflowOutcome,
}

impl WorkflowResult {
    pub(crate) fn build(
        results: Vec<WorkflowStepResult>,
        total_steps: usize,
        total_duration: Duration,
        outcome: WorkflowOutcome,
    ) -> Self {
        let failed_steps: Vec<usize> = results
            .iter()
            .filter(|r| !r.status.is_success())
            .map(|r| r.index)
            .collect();
        let successes = results.iter().filter(|r| r.status.is_success()).count();
        let success_rate = if total_steps == 0 {
            0.0
        } else {
            successes as f64 / total_steps as f64
        };
        Self {
            success: outcome == WorkflowOutcome::Completed && successes == total_steps,
            failed_steps,
            total_duration,
            success_rate,
            outcome,
            results,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────────────────────────

/// Observable state of a [`WorkflowExecutor`](crate::WorkflowExecutor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WorkflowState {
    #[default]
    Idle,
    /// Executing step `step` (from 0) of `total`.
    Running { step: usize, total: usize },
    Completed,
    Cancelled,
    Aborted { step: usize },
}

impl WorkflowState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

impl From<WorkflowOutcome> for WorkflowState {
    fn from(outcome: WorkflowOutcome) -> Self {
        match outcome {
            WorkflowOutcome::Completed => Self::Completed,
            WorkflowOutcome::Cancelled => Self::Cancelled,
            WorkflowOutcome::Aborted { step } => Self::Aborted { step },
        }
    }
}
