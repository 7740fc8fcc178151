//! Executor that delegates to the privileged helper.
//!
//! Elevated capabilities never run in this process. A missing or outdated
//! helper fails fast with a distinct error; there is no retry, no install
//! prompt and no fallback to unprivileged execution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use caretaker_catalog::{Capability, PrivilegeLevel};
use caretaker_helper::{ExecuteRequest, HelperChannel, HelperStatusProvider};
use tracing::{debug, warn};

use crate::error::{ExecError, Result};
use crate::executor::{ExecutionCore, ExecutionResult, Executor};
use crate::runner::ProcessOutput;

/// Runs `elevated` capabilities through a [`HelperChannel`].
pub struct ElevatedExecutor {
    core: Arc<ExecutionCore>,
    channel: Arc<dyn HelperChannel>,
    status: Arc<dyn HelperStatusProvider>,
}

impl ElevatedExecutor {
    pub fn new(
        core: Arc<ExecutionCore>,
        channel: Arc<dyn HelperChannel>,
        status: Arc<dyn HelperStatusProvider>,
    ) -> Self {
        Self {
            core,
            channel,
            status,
        }
    }
}

#[async_trait]
impl Executor for ElevatedExecutor {
    fn name(&self) -> &'static str {
        "elevated"
    }

    fn lane(&self) -> PrivilegeLevel {
        PrivilegeLevel::Elevated
    }

    async fn execute(
        &self,
        capability: &Capability,
        arguments: &HashMap<String, String>,
    ) -> Result<ExecutionResult> {
        if !self.can_execute(capability) {
            return Err(ExecError::PrivilegeMismatch {
                capability: capability.id.clone(),
                privilege: capability.privilege,
                executor: self.name(),
            });
        }
        self.status.helper_status().require_current()?;

        let command = self.core.prepare(self, capability, arguments).await?;
        let timeout = self.core.timeout_for(capability);
        let request = ExecuteRequest {
            program: command.program.clone(),
            args: command.args.clone(),
            timeout_secs: timeout.as_secs().max(1),
            working_dir: command.working_dir.clone(),
        };

        debug!(capability = %capability.id, program = %request.program, "Dispatching to helper");
        let start = Instant::now();
        let executed = match self.channel.execute(request).await {
            Ok(executed) => executed,
            Err(e) => {
                let error = ExecError::Helper(e);
                warn!(capability = %capability.id, error = %error, "Helper dispatch failed");
                self.core
                    .record_dispatch_failure(capability, arguments, &error, start.elapsed());
                return Err(error);
            }
        };

        let output = ProcessOutput {
            exit_code: executed.exit_code,
            stdout: executed.stdout,
            stderr: executed.stderr,
            timed_out: executed.timed_out,
            truncated: false,
            duration: Duration::from_millis(executed.duration_ms),
        };
        Ok(self.core.finish(capability, arguments, &command, output))
    }
}
