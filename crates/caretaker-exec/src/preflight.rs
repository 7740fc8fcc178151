//! Preflight validation: decide whether a capability may run right now.
//!
//! Validation checks the privilege requirement first and then every declared
//! check. It collects all failures instead of stopping at the first, and it
//! never runs the capability or changes system state.

use std::sync::Arc;

use caretaker_catalog::{Capability, CheckType, DiskRequirement, PreflightCheck, PrivilegeLevel};
use caretaker_helper::InstallStatus;
use caretaker_permissions::{
    helper_entry, remediation_steps, PermissionCenter, PermissionKind, PermissionState,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::probe::{expand_home, RunningApp, SipStatus, SystemProbe};

// ─────────────────────────────────────────────────────────────────────────────
// Results
// ─────────────────────────────────────────────────────────────────────────────

/// A declared check that did not hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedCheck {
    pub check: PreflightCheck,
    /// What was observed, e.g. `"path not found"`.
    pub observed: String,
}

/// A permission or privilege the capability needs but does not have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MissingPermission {
    Permission {
        kind: PermissionKind,
        state: PermissionState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    /// The executor asked to run it cannot serve its privilege level.
    PrivilegeLane {
        required: PrivilegeLevel,
        lane: PrivilegeLevel,
    },
}

impl MissingPermission {
    pub fn describe(&self) -> String {
        match self {
            Self::Permission {
                kind,
                state,
                detail,
            } => match detail {
                Some(detail) => format!("{kind}: {detail}"),
                None => format!("{kind}: {state}"),
            },
            Self::PrivilegeLane { required, lane } => {
                format!("requires the {required} executor, not {lane}")
            }
        }
    }
}

/// Outcome of [`PreflightEngine::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightResult {
    pub capability_id: String,
    pub can_execute: bool,
    pub failed_checks: Vec<FailedCheck>,
    pub missing_permissions: Vec<MissingPermission>,
}

impl PreflightResult {
    fn new(capability_id: &str) -> Self {
        Self {
            capability_id: capability_id.to_string(),
            can_execute: true,
            failed_checks: Vec::new(),
            missing_permissions: Vec::new(),
        }
    }

    fn finish(mut self) -> Self {
        self.can_execute = self.failed_checks.is_empty() && self.missing_permissions.is_empty();
        self
    }

    /// One-line summary of everything that failed.
    pub fn describe(&self) -> String {
        self.missing_permissions
            .iter()
            .map(MissingPermission::describe)
            .chain(self.failed_checks.iter().map(|f| f.check.message.clone()))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// First remediation step for the first missing permission.
    pub fn first_remedy(&self) -> Option<String> {
        self.missing_permissions.iter().find_map(|m| match m {
            MissingPermission::Permission { kind, .. } => {
                remediation_steps(kind).into_iter().next()
            }
            MissingPermission::PrivilegeLane { .. } => None,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Validates capability preconditions against live state.
pub struct PreflightEngine {
    probe: Arc<dyn SystemProbe>,
    permissions: Arc<PermissionCenter>,
}

impl PreflightEngine {
    pub fn new(probe: Arc<dyn SystemProbe>, permissions: Arc<PermissionCenter>) -> Self {
        Self { probe, permissions }
    }

    pub fn permissions(&self) -> &Arc<PermissionCenter> {
        &self.permissions
    }

    /// Validate `capability` for the executor lane `lane`.
    pub async fn validate(&self, capability: &Capability, lane: PrivilegeLevel) -> PreflightResult {
        let mut result = PreflightResult::new(&capability.id);

        self.check_privilege(capability, lane, &mut result).await;

        let mut apps: Option<Vec<RunningApp>> = None;
        for check in capability.effective_preflight() {
            if let Some(observed) = self.evaluate(&check, &mut apps).await {
                result.failed_checks.push(FailedCheck { check, observed });
            }
        }

        let result = result.finish();
        debug!(
            capability = %capability.id,
            can_execute = result.can_execute,
            failed = result.failed_checks.len(),
            missing = result.missing_permissions.len(),
            "Preflight complete"
        );
        result
    }

    async fn check_privilege(
        &self,
        capability: &Capability,
        lane: PrivilegeLevel,
        result: &mut PreflightResult,
    ) {
        if capability.privilege != lane {
            result.missing_permissions.push(MissingPermission::PrivilegeLane {
                required: capability.privilege,
                lane,
            });
        }

        match capability.privilege {
            PrivilegeLevel::User => {}
            PrivilegeLevel::Elevated => {
                let status = self.permissions.helper_state();
                if !matches!(status, InstallStatus::Current { .. }) {
                    let entry = helper_entry(&status);
                    result.missing_permissions.push(MissingPermission::Permission {
                        kind: entry.kind,
                        state: entry.state,
                        detail: entry.detail,
                    });
                }
            }
            PrivilegeLevel::Automation => {
                for app in &capability.required_apps {
                    let (state, detail) = self.automation_state(app).await;
                    if !state.is_granted() {
                        result.missing_permissions.push(MissingPermission::Permission {
                            kind: PermissionKind::Automation(app.clone()),
                            state,
                            detail,
                        });
                    }
                }
            }
        }
    }

    /// Cached automation state, probing on a cache miss.
    async fn automation_state(&self, app: &str) -> (PermissionState, Option<String>) {
        let status = match self.permissions.cached_automation(app) {
            Some(status) => status,
            None => self.permissions.check_automation_permission(app).await,
        };
        (status.state(), status.detail())
    }

    /// `None` when the check holds, otherwise what was observed.
    async fn evaluate(
        &self,
        check: &PreflightCheck,
        apps: &mut Option<Vec<RunningApp>>,
    ) -> Option<String> {
        match check.check_type {
            CheckType::PathExists => {
                let path = expand_home(&check.target);
                (!self.probe.path_exists(&path).await)
                    .then(|| format!("{} does not exist", path.display()))
            }
            CheckType::PathWritable => {
                let path = expand_home(&check.target);
                (!self.probe.path_writable(&path).await)
                    .then(|| format!("{} is not writable", path.display()))
            }
            CheckType::AppRunning => {
                let running = self.is_running(&check.target, apps).await;
                (!running).then(|| format!("{} is not running", check.target))
            }
            CheckType::AppNotRunning => {
                let running = self.is_running(&check.target, apps).await;
                running.then(|| format!("{} is running", check.target))
            }
            CheckType::DiskSpaceAvailable => {
                let requirement = match DiskRequirement::parse(&check.target) {
                    Ok(r) => r,
                    Err(e) => return Some(e.to_string()),
                };
                match self.probe.free_space(&requirement.volume).await {
                    Some(free) if free >= requirement.bytes => None,
                    Some(free) => Some(format!(
                        "{} bytes free on {}, {} required",
                        free,
                        requirement.volume.display(),
                        requirement.bytes
                    )),
                    None => Some(format!(
                        "could not determine free space on {}",
                        requirement.volume.display()
                    )),
                }
            }
            CheckType::SystemIntegrityProtection => {
                let wanted = if check.target.eq_ignore_ascii_case("disabled") {
                    SipStatus::Disabled
                } else {
                    SipStatus::Enabled
                };
                match self.probe.sip_status().await {
                    SipStatus::NotApplicable => None,
                    status if status == wanted => None,
                    status => Some(format!("System Integrity Protection is {status:?}").to_lowercase()),
                }
            }
            CheckType::AutomationPermission => {
                let (state, detail) = self.automation_state(&check.target).await;
                (!state.is_granted()).then(|| {
                    detail.unwrap_or_else(|| format!("automation permission is {state}"))
                })
            }
        }
    }

    async fn is_running(&self, target: &str, apps: &mut Option<Vec<RunningApp>>) -> bool {
        if apps.is_none() {
            *apps = Some(self.probe.running_apps().await);
        }
        apps.as_ref()
            .is_some_and(|list| list.iter().any(|app| app.matches(target)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use caretaker_catalog::{OutputParser, RiskLevel};
    use caretaker_helper::HelperStatusProvider;
    use caretaker_permissions::{ExternalControl, ProbeIntensity, ProbeOutcome};
    use std::path::{Path, PathBuf};

    /// Probe with scripted answers.
    #[derive(Default)]
    pub(crate) struct FakeProbe {
        pub existing: Vec<PathBuf>,
        pub apps: Vec<String>,
        pub free: Option<u64>,
        pub sip: Option<SipStatus>,
    }

    #[async_trait]
    impl SystemProbe for FakeProbe {
        async fn path_exists(&self, path: &Path) -> bool {
            self.existing.iter().any(|p| p == path)
        }
        async fn path_writable(&self, path: &Path) -> bool {
            self.existing.iter().any(|p| p == path)
        }
        async fn running_apps(&self) -> Vec<RunningApp> {
            self.apps
                .iter()
                .enumerate()
                .map(|(i, name)| RunningApp {
                    pid: i as u32 + 100,
                    name: name.clone(),
                    exe: None,
                })
                .collect()
        }
        async fn free_space(&self, _path: &Path) -> Option<u64> {
            self.free
        }
        async fn sip_status(&self) -> SipStatus {
            self.sip.unwrap_or(SipStatus::NotApplicable)
        }
    }

    pub(crate) struct FixedHelper(pub InstallStatus);

    impl HelperStatusProvider for FixedHelper {
        fn helper_status(&self) -> InstallStatus {
            self.0.clone()
        }
    }

    /// Control that answers every probe the same way.
    pub(crate) struct FixedControl(pub ProbeOutcome);

    #[async_trait]
    impl ExternalControl for FixedControl {
        async fn probe(&self, _app: &str, _intensity: ProbeIntensity) -> ProbeOutcome {
            self.0.clone()
        }
    }

    pub(crate) fn center(outcome: ProbeOutcome, helper: InstallStatus) -> Arc<PermissionCenter> {
        Arc::new(PermissionCenter::new(
            Arc::new(FixedControl(outcome)),
            Arc::new(FixedHelper(helper)),
        ))
    }

    pub(crate) fn capability(id: &str, privilege: PrivilegeLevel) -> Capability {
        Capability {
            id: id.to_string(),
            title: id.to_string(),
            description: String::new(),
            group: "test".to_string(),
            command: "/bin/echo ok".to_string(),
            arguments: Vec::new(),
            argument_patterns: Default::default(),
            working_directory: None,
            timeout_secs: 5,
            privilege,
            risk: RiskLevel::Safe,
            output_parser: OutputParser::Text,
            output_pattern: None,
            preflight: Vec::new(),
            required_paths: Vec::new(),
            required_apps: Vec::new(),
            estimated_duration_secs: None,
            rollback_notes: None,
        }
    }

    fn engine(probe: FakeProbe, center: Arc<PermissionCenter>) -> PreflightEngine {
        PreflightEngine::new(Arc::new(probe), center)
    }

    fn current() -> InstallStatus {
        InstallStatus::Current {
            version: "0.1.0".into(),
        }
    }

    #[tokio::test]
    async fn test_missing_required_path_fails() {
        let mut cap = capability("logs.archive", PrivilegeLevel::User);
        cap.required_paths.push(PathBuf::from("/definitely/not/here"));
        let engine = engine(FakeProbe::default(), center(ProbeOutcome::Succeeded, current()));

        let result = engine.validate(&cap, PrivilegeLevel::User).await;
        assert!(!result.can_execute);
        assert_eq!(result.failed_checks.len(), 1);
        assert_eq!(result.failed_checks[0].check.check_type, CheckType::PathExists);
        assert_eq!(result.failed_checks[0].check.target, "/definitely/not/here");
    }

    #[tokio::test]
    async fn test_collects_every_failure() {
        let mut cap = capability("cache.clear", PrivilegeLevel::User);
        cap.preflight = vec![
            PreflightCheck::new(CheckType::AppNotRunning, "Xcode", "Quit Xcode"),
            PreflightCheck::new(CheckType::DiskSpaceAvailable, "1GB", "Need 1 GB"),
            PreflightCheck::new(CheckType::PathExists, "/tmp/present", "Need tmp"),
            PreflightCheck::new(CheckType::SystemIntegrityProtection, "", "Need SIP"),
        ];
        let probe = FakeProbe {
            existing: vec![PathBuf::from("/tmp/present")],
            apps: vec!["Xcode".into()],
            free: Some(1024),
            sip: Some(SipStatus::Disabled),
        };
        let engine = engine(probe, center(ProbeOutcome::Succeeded, current()));

        let result = engine.validate(&cap, PrivilegeLevel::User).await;
        assert!(!result.can_execute);
        let failed: Vec<_> = result
            .failed_checks
            .iter()
            .map(|f| f.check.check_type)
            .collect();
        assert_eq!(
            failed,
            vec![
                CheckType::AppNotRunning,
                CheckType::DiskSpaceAvailable,
                CheckType::SystemIntegrityProtection
            ]
        );
        assert!(result.describe().contains("Quit Xcode"));
    }

    #[tokio::test]
    async fn test_sip_not_applicable_is_satisfied() {
        let mut cap = capability("spotlight.reindex", PrivilegeLevel::User);
        cap.preflight = vec![PreflightCheck::new(
            CheckType::SystemIntegrityProtection,
            "",
            "Need SIP",
        )];
        let engine = engine(FakeProbe::default(), center(ProbeOutcome::Succeeded, current()));
        assert!(engine.validate(&cap, PrivilegeLevel::User).await.can_execute);
    }

    #[tokio::test]
    async fn test_elevated_requires_current_helper() {
        let cap = capability("memory.purge", PrivilegeLevel::Elevated);
        let engine = engine(
            FakeProbe::default(),
            center(
                ProbeOutcome::Succeeded,
                InstallStatus::Outdated {
                    installed: "0.0.9".into(),
                    required: "0.1.0".into(),
                },
            ),
        );

        let result = engine.validate(&cap, PrivilegeLevel::Elevated).await;
        assert!(!result.can_execute);
        assert!(matches!(
            &result.missing_permissions[0],
            MissingPermission::Permission {
                kind: PermissionKind::HelperInstallation,
                detail: Some(d),
                ..
            } if d.starts_with("outdated")
        ));
        assert!(result.first_remedy().unwrap().contains("helper install"));
    }

    #[tokio::test]
    async fn test_lane_mismatch_reported() {
        let cap = capability("memory.purge", PrivilegeLevel::Elevated);
        let engine = engine(FakeProbe::default(), center(ProbeOutcome::Succeeded, current()));
        let result = engine.validate(&cap, PrivilegeLevel::User).await;
        assert_eq!(
            result.missing_permissions,
            vec![MissingPermission::PrivilegeLane {
                required: PrivilegeLevel::Elevated,
                lane: PrivilegeLevel::User,
            }]
        );
    }

    #[tokio::test]
    async fn test_automation_uses_cache_then_probes() {
        let mut cap = capability("browser.safari.tab_count", PrivilegeLevel::Automation);
        cap.required_apps = vec!["com.apple.Safari".into()];
        let permissions = center(
            ProbeOutcome::Failed {
                code: -1743,
                message: "denied".into(),
            },
            current(),
        );
        let engine = engine(FakeProbe::default(), permissions.clone());

        assert!(permissions.cached_automation("com.apple.Safari").is_none());
        let result = engine.validate(&cap, PrivilegeLevel::Automation).await;
        assert!(!result.can_execute);
        assert!(matches!(
            &result.missing_permissions[0],
            MissingPermission::Permission { state: PermissionState::Denied, .. }
        ));
        // The probe result was cached by the permission center.
        assert!(permissions.cached_automation("com.apple.Safari").is_some());
    }
}
