//! Runs a plan one step at a time through the execution router.

use std::sync::Arc;
use std::time::Instant;

use caretaker_config::WorkflowConfig;
use caretaker_exec::{ExecutionRouter, ExecutionStatus};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{Result, WorkflowError};
use crate::plan::{
    StepStatus, WorkflowOutcome, WorkflowPlan, WorkflowProgress, WorkflowResult, WorkflowState,
    WorkflowStep, WorkflowStepResult,
};

/// Sequential plan executor.
///
/// Steps never run in parallel and are never reordered. A failed step aborts
/// the run when its capability is destructive or the step is critical;
/// otherwise the failure is recorded and the next step runs. Cancellation is
/// checked only between steps.
pub struct WorkflowExecutor {
    router: Arc<ExecutionRouter>,
    max_steps: usize,
    state: RwLock<WorkflowState>,
}

impl WorkflowExecutor {
    pub fn new(router: Arc<ExecutionRouter>) -> Self {
        Self {
            router,
            max_steps: WorkflowConfig::default().max_steps,
            state: RwLock::new(WorkflowState::Idle),
        }
    }

    pub fn with_config(mut self, config: &WorkflowConfig) -> Self {
        self.max_steps = config.max_steps;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub fn state(&self) -> WorkflowState {
        *self.state.read()
    }

    /// Reject empty, over-length or unknown-capability plans.
    pub fn validate(&self, plan: &WorkflowPlan) -> Result<()> {
        if plan.steps.is_empty() {
            return Err(WorkflowError::EmptyPlan);
        }
        if plan.steps.len() > self.max_steps {
            return Err(WorkflowError::TooManySteps {
                count: plan.steps.len(),
                max: self.max_steps,
            });
        }
        let catalog = self.router.catalog();
        if let Some(error) = catalog.load_error() {
            return Err(WorkflowError::CatalogUnavailable(error.to_string()));
        }
        for (index, step) in plan.steps.iter().enumerate() {
            if !catalog.contains(&step.capability_id) {
                return Err(WorkflowError::UnknownCapability {
                    index,
                    capability_id: step.capability_id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Run without cancellation or progress reporting.
    pub async fn run_plan(&self, plan: &WorkflowPlan) -> Result<WorkflowResult> {
        self.run(plan, &CancellationToken::new(), |_| {}).await
    }

    /// Validate and run `plan`, calling `on_progress` after each step.
    pub async fn run<F>(
        &self,
        plan: &WorkflowPlan,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<WorkflowResult>
    where
        F: FnMut(&WorkflowProgress) + Send,
    {
        self.validate(plan)?;
        let guard = RunGuard::enter(&self.state, plan.steps.len())?;

        let total = plan.steps.len();
        info!(summary = %plan.summary, steps = total, risk = %plan.risk, "Workflow started");
        let started = Instant::now();
        let mut results = Vec::with_capacity(total);
        let mut outcome = WorkflowOutcome::Completed;

        for (index, step) in plan.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(step = index, "Workflow cancelled");
                outcome = WorkflowOutcome::Cancelled;
                break;
            }
            *self.state.write() = WorkflowState::Running { step: index, total };

            let result = self.run_step(index, step).await;
            let aborts = !result.status.is_success() && self.is_abort_worthy(step);

            on_progress(&WorkflowProgress {
                index,
                total,
                step_result: result.clone(),
            });
            results.push(result);

            if aborts {
                warn!(step = index, capability = %step.capability_id, "Aborting workflow after failed step");
                outcome = WorkflowOutcome::Aborted { step: index };
                break;
            }
        }

        let result = WorkflowResult::build(results, total, started.elapsed(), outcome);
        guard.finish(outcome);
        info!(
            success = result.success,
            success_rate = result.success_rate,
            failed = result.failed_steps.len(),
            "Workflow finished"
        );
        Ok(result)
    }

    async fn run_step(&self, index: usize, step: &WorkflowStep) -> WorkflowStepResult {
        let started = Instant::now();
        let (status, execution, error) = match self
            .router
            .execute(&step.capability_id, &step.arguments)
            .await
        {
            Ok(execution) => {
                let status = match execution.status {
                    ExecutionStatus::Success => StepStatus::Success,
                    ExecutionStatus::Failed => StepStatus::Failed,
                    ExecutionStatus::TimedOut => StepStatus::TimedOut,
                };
                (status, Some(execution), None)
            }
            Err(e) => {
                warn!(step = index, capability = %step.capability_id, error = %e, "Workflow step refused");
                (StepStatus::Error, None, Some(e.to_string()))
            }
        };
        WorkflowStepResult {
            index,
            capability_id: step.capability_id.clone(),
            status,
            execution,
            error,
            duration: started.elapsed(),
        }
    }

    fn is_abort_worthy(&self, step: &WorkflowStep) -> bool {
        step.critical
            || self
                .router
                .catalog()
                .capability(&step.capability_id)
                .is_some_and(|c| c.is_destructive())
    }
}

/// Holds the executor in `Running` for the length of one run.
///
/// If the `run` future is dropped before finishing, the state falls back to
/// `Cancelled` so the executor accepts the next plan.
struct RunGuard<'a> {
    state: &'a RwLock<WorkflowState>,
    finished: bool,
}

impl<'a> RunGuard<'a> {
    fn enter(state: &'a RwLock<WorkflowState>, total: usize) -> Result<Self> {
        let mut current = state.write();
        if current.is_running() {
            return Err(WorkflowError::AlreadyRunning);
        }
        *current = WorkflowState::Running { step: 0, total };
        Ok(Self {
            state,
            finished: false,
        })
    }

    fn finish(mut self, outcome: WorkflowOutcome) {
        *self.state.write() = outcome.into();
        self.finished = true;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Workflow run dropped before finishing");
            *self.state.write() = WorkflowState::Cancelled;
        }
    }
}
