//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [paths]          # data directory, catalog override
//! [executor]       # timeouts and output capture
//! [helper]         # privileged helper identity and socket
//! [audit]          # audit database and output locations
//! [workflow]       # plan limits
//! [permissions]    # automation targets
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::paths::PathConfig;

/// Defaults shared by the config sections and their consumers.
pub mod defaults {
    /// Timeout applied when a capability does not declare one.
    pub const EXECUTOR_TIMEOUT_SECS: u64 = 30;
    /// Cap on captured stdout/stderr per stream.
    pub const MAX_OUTPUT_BYTES: usize = 1024 * 1024;
    /// Launchd/systemd label of the privileged helper.
    pub const HELPER_SERVICE_NAME: &str = "io.caretaker.helper";
    /// Helper version this build of the app speaks to.
    pub const HELPER_REQUIRED_VERSION: &str = "0.1.0";
    /// Maximum number of steps accepted in one workflow plan.
    pub const WORKFLOW_MAX_STEPS: usize = 10;
}

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g., project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CaretakerConfig {
    /// Path management.
    pub paths: Option<PathConfig>,

    /// Command execution settings.
    pub executor: Option<ExecutorConfig>,

    /// Privileged helper settings.
    pub helper: Option<HelperConfig>,

    /// Audit log storage settings.
    pub audit: Option<AuditConfig>,

    /// Workflow limits.
    pub workflow: Option<WorkflowConfig>,

    /// Permission probing settings.
    pub permissions: Option<PermissionsConfig>,
}

impl CaretakerConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> crate::Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced wholesale; automation targets are the exception
    /// and accumulate across layers.
    pub fn merge(&mut self, other: CaretakerConfig) {
        if other.paths.is_some() {
            self.paths = other.paths;
        }

        if other.executor.is_some() {
            self.executor = other.executor;
        }

        if other.helper.is_some() {
            self.helper = other.helper;
        }

        if other.audit.is_some() {
            self.audit = other.audit;
        }

        if other.workflow.is_some() {
            self.workflow = other.workflow;
        }

        if let Some(layer) = other.permissions {
            match self.permissions.as_mut() {
                Some(existing) => {
                    for target in layer.automation_targets {
                        if !existing
                            .automation_targets
                            .iter()
                            .any(|t| t.bundle_id == target.bundle_id)
                        {
                            existing.automation_targets.push(target);
                        }
                    }
                    if layer.disk_access_probe.is_some() {
                        existing.disk_access_probe = layer.disk_access_probe;
                    }
                }
                None => self.permissions = Some(layer),
            }
        }
    }

    /// Path section or its defaults.
    pub fn paths(&self) -> PathConfig {
        self.paths.clone().unwrap_or_default()
    }

    /// Executor section or its defaults.
    pub fn executor(&self) -> ExecutorConfig {
        self.executor.clone().unwrap_or_default()
    }

    /// Helper section or its defaults.
    pub fn helper(&self) -> HelperConfig {
        self.helper.clone().unwrap_or_default()
    }

    /// Workflow section or its defaults.
    pub fn workflow(&self) -> WorkflowConfig {
        self.workflow.clone().unwrap_or_default()
    }

    /// Permissions section or its defaults.
    pub fn permissions(&self) -> PermissionsConfig {
        self.permissions.clone().unwrap_or_default()
    }

    /// Resolved audit database path.
    pub fn audit_db_path(&self) -> PathBuf {
        self.audit
            .as_ref()
            .and_then(|a| a.db_path.clone())
            .unwrap_or_else(|| self.paths().audit_db_path())
    }

    /// Resolved directory for captured output files.
    pub fn audit_output_dir(&self) -> PathBuf {
        self.audit
            .as_ref()
            .and_then(|a| a.output_dir.clone())
            .unwrap_or_else(|| self.paths().output_dir())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Executor Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Command execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Timeout used when a capability declares `timeout_secs = 0`.
    pub default_timeout_secs: u64,
    /// Maximum bytes captured from each of stdout and stderr.
    pub max_output_bytes: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: defaults::EXECUTOR_TIMEOUT_SECS,
            max_output_bytes: defaults::MAX_OUTPUT_BYTES,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helper Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Privileged helper identity and location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HelperConfig {
    /// Stable service name registered with launchd/systemd.
    pub service_name: String,
    /// Helper version required by this app build (semver).
    pub required_version: String,
    /// Directory the helper binary and manifest are installed into.
    pub install_dir: PathBuf,
    /// Unix socket the helper listens on.
    pub socket_path: PathBuf,
}

impl Default for HelperConfig {
    fn default() -> Self {
        let service_name = defaults::HELPER_SERVICE_NAME.to_string();
        let install_dir = if cfg!(target_os = "macos") {
            PathBuf::from("/Library/PrivilegedHelperTools")
        } else {
            PathBuf::from("/usr/local/libexec/caretaker")
        };
        let socket_path = PathBuf::from(format!("/var/run/{service_name}.sock"));
        Self {
            service_name,
            required_version: defaults::HELPER_REQUIRED_VERSION.to_string(),
            install_dir,
            socket_path,
        }
    }
}

impl HelperConfig {
    /// Path of the installed helper binary.
    pub fn binary_path(&self) -> PathBuf {
        self.install_dir.join(&self.service_name)
    }

    /// Path of the installation manifest written at install time.
    pub fn manifest_path(&self) -> PathBuf {
        self.install_dir.join(format!("{}.json", self.service_name))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Audit Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Audit log storage settings. Unset values derive from `[paths]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// SQLite database file.
    pub db_path: Option<PathBuf>,
    /// Directory holding captured output files.
    pub output_dir: Option<PathBuf>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Workflow Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Workflow plan limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Plans with more steps than this are rejected before execution.
    pub max_steps: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_steps: defaults::WORKFLOW_MAX_STEPS,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Permissions Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// An application that may be the target of automation probes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationTargetConfig {
    /// Bundle identifier (e.g. `com.apple.Safari`).
    pub bundle_id: String,
    /// Display name (e.g. `Safari`).
    pub name: String,
}

impl AutomationTargetConfig {
    /// Create a new target entry.
    pub fn new(bundle_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            bundle_id: bundle_id.into(),
            name: name.into(),
        }
    }
}

/// Permission probing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    /// Applications probed by a full permission refresh.
    pub automation_targets: Vec<AutomationTargetConfig>,
    /// File whose readability indicates full disk access.
    pub disk_access_probe: Option<PathBuf>,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            automation_targets: vec![
                AutomationTargetConfig::new("com.apple.Safari", "Safari"),
                AutomationTargetConfig::new("com.google.Chrome", "Google Chrome"),
                AutomationTargetConfig::new("com.apple.finder", "Finder"),
                AutomationTargetConfig::new("com.apple.systemevents", "System Events"),
            ],
            disk_access_probe: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = CaretakerConfig::from_toml("").unwrap();
        assert!(config.executor.is_none());
        assert_eq!(
            config.executor().default_timeout_secs,
            defaults::EXECUTOR_TIMEOUT_SECS
        );
        assert_eq!(config.workflow().max_steps, defaults::WORKFLOW_MAX_STEPS);
        assert_eq!(config.helper().service_name, "io.caretaker.helper");
    }

    #[test]
    fn test_parse_full_config() {
        let config = CaretakerConfig::from_toml(
            r#"
[executor]
default_timeout_secs = 90
max_output_bytes = 4096

[helper]
service_name = "org.example.helper"
required_version = "2.1.0"
install_dir = "/opt/helper"
socket_path = "/tmp/helper.sock"

[audit]
db_path = "/tmp/audit.db"

[workflow]
max_steps = 4

[[permissions.automation_targets]]
bundle_id = "org.mozilla.firefox"
name = "Firefox"
"#,
        )
        .unwrap();

        assert_eq!(config.executor().default_timeout_secs, 90);
        assert_eq!(config.executor().max_output_bytes, 4096);
        let helper = config.helper();
        assert_eq!(helper.binary_path(), PathBuf::from("/opt/helper/org.example.helper"));
        assert_eq!(
            helper.manifest_path(),
            PathBuf::from("/opt/helper/org.example.helper.json")
        );
        assert_eq!(config.audit_db_path(), PathBuf::from("/tmp/audit.db"));
        assert_eq!(config.workflow().max_steps, 4);
        assert_eq!(config.permissions().automation_targets.len(), 1);
    }

    #[test]
    fn test_merge_replaces_sections() {
        let mut base = CaretakerConfig::from_toml("[workflow]\nmax_steps = 3\n").unwrap();
        let layer = CaretakerConfig::from_toml("[workflow]\nmax_steps = 7\n").unwrap();
        base.merge(layer);
        assert_eq!(base.workflow().max_steps, 7);
    }

    #[test]
    fn test_merge_keeps_unset_sections() {
        let mut base = CaretakerConfig::from_toml("[executor]\ndefault_timeout_secs = 5\n").unwrap();
        base.merge(CaretakerConfig::new());
        assert_eq!(base.executor().default_timeout_secs, 5);
    }

    #[test]
    fn test_merge_accumulates_automation_targets() {
        let mut base = CaretakerConfig::from_toml(
            r#"
[[permissions.automation_targets]]
bundle_id = "com.apple.Safari"
name = "Safari"
"#,
        )
        .unwrap();
        let layer = CaretakerConfig::from_toml(
            r#"
[[permissions.automation_targets]]
bundle_id = "com.apple.Safari"
name = "Safari"

[[permissions.automation_targets]]
bundle_id = "org.mozilla.firefox"
name = "Firefox"
"#,
        )
        .unwrap();
        base.merge(layer);
        let targets = base.permissions().automation_targets;
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[1].bundle_id, "org.mozilla.firefox");
    }

    #[test]
    fn test_toml_roundtrip_preserves_values() {
        let mut config = CaretakerConfig::new();
        config.workflow = Some(WorkflowConfig { max_steps: 12 });
        let text = config.to_toml().unwrap();
        let parsed = CaretakerConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.workflow().max_steps, 12);
    }
}
