//! The Permission Center: probes, a cached snapshot, and refresh.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use caretaker_config::PermissionsConfig;
use caretaker_helper::{HelperStatusProvider, InstallStatus};
use futures::future::join_all;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::control::{classify, is_valid_bundle_id, ExternalControl, ProbeIntensity, ProbeOutcome};
use crate::error::{PermissionError, Result};
use crate::remediation::{self, helper_detail};
use crate::types::{
    AutomationStatus, PermissionEntry, PermissionKind, PermissionSnapshot, PermissionState,
};

/// Application probed by a full refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomationTarget {
    pub bundle_id: String,
    pub name: String,
}

/// Tracks automation, disk access and helper permissions.
///
/// Individual checks update the cached snapshot entry by entry. A full
/// [`refresh_all`](Self::refresh_all) builds a new snapshot and swaps it in
/// whole.
pub struct PermissionCenter {
    control: Arc<dyn ExternalControl>,
    helper: Arc<dyn HelperStatusProvider>,
    targets: Vec<AutomationTarget>,
    disk_access_probe: Option<PathBuf>,
    snapshot: RwLock<PermissionSnapshot>,
}

impl PermissionCenter {
    /// Create a center with no automation targets.
    pub fn new(control: Arc<dyn ExternalControl>, helper: Arc<dyn HelperStatusProvider>) -> Self {
        Self {
            control,
            helper,
            targets: Vec::new(),
            disk_access_probe: default_disk_access_probe(),
            snapshot: RwLock::new(PermissionSnapshot::default()),
        }
    }

    /// Apply the `[permissions]` config section.
    pub fn with_config(mut self, config: &PermissionsConfig) -> Self {
        for target in &config.automation_targets {
            self = self.with_target(&target.bundle_id, &target.name);
        }
        if let Some(path) = &config.disk_access_probe {
            self.disk_access_probe = Some(path.clone());
        }
        self
    }

    /// Add an automation target; duplicates are ignored.
    pub fn with_target(mut self, bundle_id: &str, name: &str) -> Self {
        if !self.targets.iter().any(|t| t.bundle_id == bundle_id) {
            self.targets.push(AutomationTarget {
                bundle_id: bundle_id.to_string(),
                name: name.to_string(),
            });
        }
        self
    }

    /// Override the file whose readability indicates Full Disk Access.
    pub fn with_disk_access_probe(mut self, path: impl Into<PathBuf>) -> Self {
        self.disk_access_probe = Some(path.into());
        self
    }

    pub fn targets(&self) -> &[AutomationTarget] {
        &self.targets
    }

    // ── Automation ─────────────────────────────────────────────────────────

    /// Probe automation permission for an app and cache the result.
    pub async fn check_automation_permission(&self, app: &str) -> AutomationStatus {
        let status = self.probe_automation(app).await;
        self.snapshot
            .write()
            .insert(PermissionEntry::automation(app, status.clone()));
        status
    }

    /// Trigger the consent prompt for an app, then re-check.
    pub async fn request_automation_permission(&self, app: &str) -> Result<AutomationStatus> {
        if !is_valid_bundle_id(app) {
            return Err(PermissionError::InvalidTarget(app.to_string()));
        }
        let outcome = self.control.probe(app, ProbeIntensity::Consent).await;
        if let ProbeOutcome::Unavailable(reason) = &outcome {
            return Err(PermissionError::Unsupported(reason.clone()));
        }
        debug!(app, ?outcome, "Consent probe finished");
        Ok(self.check_automation_permission(app).await)
    }

    /// Last known automation status for an app, without probing.
    pub fn cached_automation(&self, app: &str) -> Option<AutomationStatus> {
        self.snapshot
            .read()
            .get(&PermissionKind::Automation(app.to_string()))
            .and_then(|e| e.automation.clone())
    }

    async fn probe_automation(&self, app: &str) -> AutomationStatus {
        classify(self.control.probe(app, ProbeIntensity::Minimal).await)
    }

    // ── Disk access and helper ──────────────────────────────────────────────

    /// Check Full Disk Access by opening a protected file.
    pub async fn check_full_disk_access(&self) -> PermissionState {
        let state = match &self.disk_access_probe {
            Some(path) => probe_readable(path).await,
            None => PermissionState::Unknown,
        };
        self.snapshot.write().insert(PermissionEntry {
            kind: PermissionKind::FullDiskAccess,
            state,
            automation: None,
            detail: None,
        });
        state
    }

    /// Installation state of the privileged helper.
    pub fn helper_state(&self) -> InstallStatus {
        self.helper.helper_status()
    }

    // ── Snapshot ────────────────────────────────────────────────────────────

    /// Re-check everything concurrently and replace the snapshot in one step.
    ///
    /// Automation results for apps outside the target list, cached by an
    /// earlier [`check_automation_permission`](Self::check_automation_permission),
    /// are kept as they were.
    pub async fn refresh_all(&self) -> PermissionSnapshot {
        let automation = join_all(self.targets.iter().map(|target| async move {
            let status = self.probe_automation(&target.bundle_id).await;
            PermissionEntry::automation(&target.bundle_id, status)
        }));
        let disk = async {
            match &self.disk_access_probe {
                Some(path) => probe_readable(path).await,
                None => PermissionState::Unknown,
            }
        };
        let (automation, disk_state) = tokio::join!(automation, disk);
        let helper_status = self.helper.helper_status();

        let mut fresh = PermissionSnapshot::default();
        for entry in automation {
            fresh.insert(entry);
        }
        fresh.insert(PermissionEntry {
            kind: PermissionKind::FullDiskAccess,
            state: disk_state,
            automation: None,
            detail: None,
        });
        fresh.insert(helper_entry(&helper_status));

        let mut snapshot = self.snapshot.write();
        for (key, entry) in &snapshot.entries {
            let automation = matches!(entry.kind, PermissionKind::Automation(_));
            if automation && !fresh.entries.contains_key(key) {
                fresh.entries.insert(key.clone(), entry.clone());
            }
        }
        info!(
            entries = fresh.entries.len(),
            missing = fresh.missing().count(),
            "Permissions refreshed"
        );
        *snapshot = fresh.clone();
        fresh
    }

    /// Copy of the cached snapshot.
    pub fn snapshot(&self) -> PermissionSnapshot {
        self.snapshot.read().clone()
    }

    /// Cached state of one permission.
    pub fn state(&self, kind: &PermissionKind) -> PermissionState {
        self.snapshot.read().state(kind)
    }

    pub fn settings_url(&self, kind: &PermissionKind) -> &'static str {
        remediation::settings_url(kind)
    }

    pub fn remediation_steps(&self, kind: &PermissionKind) -> Vec<String> {
        remediation::remediation_steps(kind)
    }
}

/// Snapshot entry for the helper.
pub fn helper_entry(status: &InstallStatus) -> PermissionEntry {
    let state = match status {
        InstallStatus::Current { .. } => PermissionState::Granted,
        InstallStatus::NotInstalled => PermissionState::NotDetermined,
        InstallStatus::Outdated { .. } => PermissionState::Denied,
    };
    PermissionEntry {
        kind: PermissionKind::HelperInstallation,
        state,
        automation: None,
        detail: helper_detail(status),
    }
}

fn default_disk_access_probe() -> Option<PathBuf> {
    if cfg!(target_os = "macos") {
        dirs::home_dir().map(|h| h.join("Library/Application Support/com.apple.TCC/TCC.db"))
    } else {
        None
    }
}

/// Open a file for reading: success is granted, `PermissionDenied` is denied,
/// anything else (including `NotFound`) is unknown.
async fn probe_readable(path: &Path) -> PermissionState {
    match tokio::fs::File::open(path).await {
        Ok(_) => PermissionState::Granted,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => PermissionState::Denied,
        Err(_) => PermissionState::Unknown,
    }
}
