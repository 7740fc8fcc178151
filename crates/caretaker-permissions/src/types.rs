//! Permission kinds, states and snapshots.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse permission state used for gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionState {
    /// Never checked, or the check could not tell.
    #[default]
    Unknown,
    /// The user has not been asked yet.
    NotDetermined,
    Granted,
    Denied,
}

impl PermissionState {
    pub fn is_granted(&self) -> bool {
        *self == Self::Granted
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::NotDetermined => "not_determined",
            Self::Granted => "granted",
            Self::Denied => "denied",
        }
    }
}

impl fmt::Display for PermissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a permission is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum PermissionKind {
    /// Apple Events control of one application, by bundle id.
    Automation(String),
    FullDiskAccess,
    HelperInstallation,
}

impl PermissionKind {
    /// Stable key used in snapshots: `automation:<bundle id>`, `full_disk_access`,
    /// `helper_installation`.
    pub fn key(&self) -> String {
        match self {
            Self::Automation(app) => format!("automation:{app}"),
            Self::FullDiskAccess => "full_disk_access".to_string(),
            Self::HelperInstallation => "helper_installation".to_string(),
        }
    }

    /// Parse a key produced by [`key`](Self::key).
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "full_disk_access" => Some(Self::FullDiskAccess),
            "helper_installation" => Some(Self::HelperInstallation),
            other => other
                .strip_prefix("automation:")
                .filter(|app| !app.is_empty())
                .map(|app| Self::Automation(app.to_string())),
        }
    }
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Automation(app) => write!(f, "Automation ({app})"),
            Self::FullDiskAccess => f.write_str("Full Disk Access"),
            Self::HelperInstallation => f.write_str("Privileged helper"),
        }
    }
}

/// Outcome of an automation probe. Keeps "not installed" and "not running"
/// apart from a real grant or denial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum AutomationStatus {
    Determined(PermissionState),
    TargetNotInstalled,
    TargetNotRunning,
    ProbeFailed(String),
}

impl AutomationStatus {
    /// Collapse to a gating state. Anything undetermined is `Unknown`.
    pub fn state(&self) -> PermissionState {
        match self {
            Self::Determined(state) => *state,
            Self::TargetNotInstalled | Self::TargetNotRunning | Self::ProbeFailed(_) => {
                PermissionState::Unknown
            }
        }
    }

    /// Human-readable detail for non-determined outcomes.
    pub fn detail(&self) -> Option<String> {
        match self {
            Self::Determined(_) => None,
            Self::TargetNotInstalled => Some("application is not installed".to_string()),
            Self::TargetNotRunning => Some("application is not running".to_string()),
            Self::ProbeFailed(msg) => Some(format!("probe failed: {msg}")),
        }
    }
}

/// One row of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionEntry {
    pub kind: PermissionKind,
    pub state: PermissionState,
    /// Full automation outcome, for automation entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automation: Option<AutomationStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl PermissionEntry {
    /// Entry for an automation probe result.
    pub fn automation(app: &str, status: AutomationStatus) -> Self {
        Self {
            kind: PermissionKind::Automation(app.to_string()),
            state: status.state(),
            detail: status.detail(),
            automation: Some(status),
        }
    }
}

/// Every known permission, keyed by [`PermissionKind::key`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSnapshot {
    pub entries: BTreeMap<String, PermissionEntry>,
}

impl PermissionSnapshot {
    pub fn get(&self, kind: &PermissionKind) -> Option<&PermissionEntry> {
        self.entries.get(&kind.key())
    }

    /// State of a permission; `Unknown` when never checked.
    pub fn state(&self, kind: &PermissionKind) -> PermissionState {
        self.get(kind).map(|e| e.state).unwrap_or_default()
    }

    pub fn insert(&mut self, entry: PermissionEntry) {
        self.entries.insert(entry.kind.key(), entry);
    }

    /// Entries that are not granted.
    pub fn missing(&self) -> impl Iterator<Item = &PermissionEntry> {
        self.entries.values().filter(|e| !e.state.is_granted())
    }
}
