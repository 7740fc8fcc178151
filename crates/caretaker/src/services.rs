//! Wiring of the catalog, permission center, audit store and execution router.
//!
//! Everything is built once per invocation and passed down as `Arc`s.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use caretaker_audit::AuditStore;
use caretaker_catalog::CapabilityCatalog;
use caretaker_config::CaretakerConfig;
use caretaker_exec::{ExecutionCore, ExecutionRouter, PreflightEngine, SysinfoProbe};
use caretaker_helper::{HelperClient, HelperInstallation};
use caretaker_permissions::{platform_control, PermissionCenter};
use caretaker_workflow::WorkflowExecutor;
use tracing::{debug, warn};

use crate::commands::Context;

/// Everything a command that runs capabilities needs.
pub struct Services {
    pub config: CaretakerConfig,
    pub catalog: Arc<CapabilityCatalog>,
    pub permissions: Arc<PermissionCenter>,
    /// `None` when the audit log could not be opened.
    pub audit: Option<Arc<AuditStore>>,
    pub router: Arc<ExecutionRouter>,
}

impl Services {
    pub fn build(ctx: &Context) -> Result<Self> {
        let config = ctx.load_config()?.config;
        let catalog = Arc::new(load_catalog(ctx, &config));
        let installation = Arc::new(HelperInstallation::from_config(&config.helper()));
        let permissions = Arc::new(permission_center(&config, &catalog, installation.clone()));
        let audit = match open_audit(&config) {
            Ok(store) => Some(Arc::new(store)),
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Audit log unavailable, running without it");
                None
            }
        };

        let preflight = Arc::new(PreflightEngine::new(
            Arc::new(SysinfoProbe::new()),
            permissions.clone(),
        ));
        let mut core = ExecutionCore::new(preflight).with_config(config.executor());
        if let Some(store) = &audit {
            core = core.with_audit(store.clone());
        }
        let core = Arc::new(core);
        let channel = Arc::new(HelperClient::new(installation.socket_path.clone()));
        let router = Arc::new(ExecutionRouter::standard(
            catalog.clone(),
            core,
            channel,
            installation,
        ));

        Ok(Self {
            config,
            catalog,
            permissions,
            audit,
            router,
        })
    }

    pub fn workflow_executor(&self) -> WorkflowExecutor {
        WorkflowExecutor::new(self.router.clone()).with_config(&self.config.workflow())
    }
}

/// Catalog from `--catalog`, then `[paths] catalog`, then the embedded one.
///
/// A file that fails to load yields a degraded, empty catalog.
pub fn load_catalog(ctx: &Context, config: &CaretakerConfig) -> CapabilityCatalog {
    match ctx.catalog.clone().or_else(|| config.paths().catalog) {
        Some(path) => {
            debug!(path = %path.display(), "Loading capability catalog");
            CapabilityCatalog::load(&path)
        }
        None => CapabilityCatalog::embedded(),
    }
}

/// Permission center covering configured targets and every app the catalog automates.
pub fn permission_center(
    config: &CaretakerConfig,
    catalog: &CapabilityCatalog,
    installation: Arc<HelperInstallation>,
) -> PermissionCenter {
    let mut center =
        PermissionCenter::new(platform_control(), installation).with_config(&config.permissions());
    for bundle_id in catalog.automation_targets() {
        center = center.with_target(bundle_id, bundle_id);
    }
    center
}

/// Open the audit store. Commands that read the log treat failure as fatal.
pub fn open_audit(config: &CaretakerConfig) -> Result<AuditStore> {
    let path = config.audit_db_path();
    AuditStore::from_config(config)
        .with_context(|| format!("failed to open audit log at {}", path.display()))
}
