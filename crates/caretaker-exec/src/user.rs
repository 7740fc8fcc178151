//! Executors that spawn child processes as the current user.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use caretaker_catalog::{Capability, PrivilegeLevel};

use crate::error::Result;
use crate::executor::{ExecutionCore, ExecutionResult, Executor};
use crate::runner::ProcessRunner;

/// Runs `user` capabilities.
pub struct UserExecutor {
    core: Arc<ExecutionCore>,
    runner: ProcessRunner,
}

impl UserExecutor {
    pub fn new(core: Arc<ExecutionCore>) -> Self {
        let runner = ProcessRunner::new(core.max_output_bytes());
        Self { core, runner }
    }
}

#[async_trait]
impl Executor for UserExecutor {
    fn name(&self) -> &'static str {
        "user"
    }

    fn lane(&self) -> PrivilegeLevel {
        PrivilegeLevel::User
    }

    async fn execute(
        &self,
        capability: &Capability,
        arguments: &HashMap<String, String>,
    ) -> Result<ExecutionResult> {
        let command = self.core.prepare(self, capability, arguments).await?;
        let output = self
            .runner
            .run(&command, self.core.timeout_for(capability))
            .await?;
        Ok(self.core.finish(capability, arguments, &command, output))
    }
}

/// Runs `automation` capabilities: same process path as [`UserExecutor`],
/// but preflight demands automation consent for every required app.
pub struct AutomationExecutor {
    core: Arc<ExecutionCore>,
    runner: ProcessRunner,
}

impl AutomationExecutor {
    pub fn new(core: Arc<ExecutionCore>) -> Self {
        let runner = ProcessRunner::new(core.max_output_bytes());
        Self { core, runner }
    }
}

#[async_trait]
impl Executor for AutomationExecutor {
    fn name(&self) -> &'static str {
        "automation"
    }

    fn lane(&self) -> PrivilegeLevel {
        PrivilegeLevel::Automation
    }

    async fn execute(
        &self,
        capability: &Capability,
        arguments: &HashMap<String, String>,
    ) -> Result<ExecutionResult> {
        let command = self.core.prepare(self, capability, arguments).await?;
        let output = self
            .runner
            .run(&command, self.core.timeout_for(capability))
            .await?;
        Ok(self.core.finish(capability, arguments, &command, output))
    }
}
