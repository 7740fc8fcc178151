//! Routes capabilities to the executor for their privilege level.

use std::collections::HashMap;
use std::sync::Arc;

use caretaker_catalog::{Capability, CapabilityCatalog};
use caretaker_helper::{HelperChannel, HelperStatusProvider};
use tracing::debug;

use crate::elevated::ElevatedExecutor;
use crate::error::{ExecError, Result};
use crate::executor::{ExecutionCore, ExecutionResult, Executor};
use crate::preflight::PreflightResult;
use crate::user::{AutomationExecutor, UserExecutor};

/// Looks capabilities up by id and dispatches them by privilege.
pub struct ExecutionRouter {
    catalog: Arc<CapabilityCatalog>,
    core: Arc<ExecutionCore>,
    executors: Vec<Arc<dyn Executor>>,
}

impl ExecutionRouter {
    /// Router with no executors registered.
    pub fn new(catalog: Arc<CapabilityCatalog>, core: Arc<ExecutionCore>) -> Self {
        Self {
            catalog,
            core,
            executors: Vec::new(),
        }
    }

    /// Router with the user, automation and elevated executors.
    pub fn standard(
        catalog: Arc<CapabilityCatalog>,
        core: Arc<ExecutionCore>,
        channel: Arc<dyn HelperChannel>,
        status: Arc<dyn HelperStatusProvider>,
    ) -> Self {
        let user = Arc::new(UserExecutor::new(core.clone()));
        let automation = Arc::new(AutomationExecutor::new(core.clone()));
        let elevated = Arc::new(ElevatedExecutor::new(core.clone(), channel, status));
        Self::new(catalog, core)
            .with_executor(user)
            .with_executor(automation)
            .with_executor(elevated)
    }

    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executors.push(executor);
        self
    }

    pub fn catalog(&self) -> &Arc<CapabilityCatalog> {
        &self.catalog
    }

    /// Look up a capability, refusing everything when the catalog failed to load.
    pub fn capability(&self, id: &str) -> Result<&Capability> {
        if let Some(error) = self.catalog.load_error() {
            return Err(ExecError::CatalogUnavailable(error.to_string()));
        }
        self.catalog
            .capability(id)
            .ok_or_else(|| ExecError::UnknownCapability(id.to_string()))
    }

    /// First registered executor that accepts the capability.
    pub fn executor_for(&self, capability: &Capability) -> Result<&Arc<dyn Executor>> {
        self.executors
            .iter()
            .find(|e| e.can_execute(capability))
            .ok_or(ExecError::NoExecutor(capability.privilege))
    }

    /// Validate without running.
    pub async fn preflight(&self, id: &str) -> Result<PreflightResult> {
        let capability = self.capability(id)?;
        Ok(self
            .core
            .preflight()
            .validate(capability, capability.privilege)
            .await)
    }

    /// Run a capability by id.
    pub async fn execute(
        &self,
        id: &str,
        arguments: &HashMap<String, String>,
    ) -> Result<ExecutionResult> {
        let capability = self.capability(id)?;
        let executor = self.executor_for(capability)?;
        debug!(capability = id, executor = executor.name(), "Routing capability");
        executor.execute(capability, arguments).await
    }
}
