//! Capability data model.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{CatalogError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Enumerations
// ─────────────────────────────────────────────────────────────────────────────

/// Privilege level a capability runs at. Decides which executor may run it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivilegeLevel {
    /// Runs as the current user.
    User,
    /// Runs through the privileged helper.
    Elevated,
    /// Runs as the current user but drives another application.
    Automation,
}

impl PrivilegeLevel {
    /// All levels, in declaration order.
    pub const ALL: [PrivilegeLevel; 3] = [Self::User, Self::Elevated, Self::Automation];

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Elevated => "elevated",
            Self::Automation => "automation",
        }
    }
}

impl fmt::Display for PrivilegeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrivilegeLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "elevated" => Ok(Self::Elevated),
            "automation" => Ok(Self::Automation),
            other => Err(format!("unknown privilege level '{other}'")),
        }
    }
}

/// Risk class. Totally ordered: `Safe < Moderate < Destructive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Safe,
    Moderate,
    Destructive,
}

impl RiskLevel {
    /// All levels, lowest first.
    pub const ALL: [RiskLevel; 3] = [Self::Safe, Self::Moderate, Self::Destructive];

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Moderate => "moderate",
            Self::Destructive => "destructive",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "safe" => Ok(Self::Safe),
            "moderate" => Ok(Self::Moderate),
            "destructive" => Ok(Self::Destructive),
            other => Err(format!("unknown risk level '{other}'")),
        }
    }
}

/// How captured stdout is turned into a structured summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputParser {
    /// Trimmed text, first line as the summary.
    #[default]
    Text,
    /// Stdout is a JSON document.
    Json,
    /// Captures from `output_pattern`.
    Regex,
    /// `memory_pressure` / `vm_stat` / `/proc/meminfo` style output.
    MemoryPressure,
    /// `df` table.
    DiskUsage,
    /// `ps` table.
    ProcessTable,
}

// ─────────────────────────────────────────────────────────────────────────────
// Preflight checks
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of a declarative preflight check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    PathExists,
    PathWritable,
    AppRunning,
    AppNotRunning,
    DiskSpaceAvailable,
    SystemIntegrityProtection,
    AutomationPermission,
}

impl CheckType {
    /// Whether the check needs a non-empty target.
    pub fn requires_target(&self) -> bool {
        !matches!(self, Self::SystemIntegrityProtection)
    }
}

/// A condition that must hold before a capability may run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PreflightCheck {
    /// What to check.
    #[serde(rename = "type")]
    pub check_type: CheckType,
    /// Path, process name, bundle id or disk quantity depending on the type.
    #[serde(default)]
    pub target: String,
    /// Message shown to the user when the check fails.
    pub message: String,
}

impl PreflightCheck {
    /// Create a check.
    pub fn new(check_type: CheckType, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            check_type,
            target: target.into(),
            message: message.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Disk quantities
// ─────────────────────────────────────────────────────────────────────────────

/// Free space demanded by a `disk_space_available` check.
///
/// Parsed from `"500MB"` or `"/Volumes/Data:500MB"`. Units are binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskRequirement {
    /// Volume (mount point or any path on it). Defaults to `/`.
    pub volume: PathBuf,
    /// Required free bytes.
    pub bytes: u64,
}

impl DiskRequirement {
    /// Parse a check target.
    pub fn parse(target: &str) -> Result<Self> {
        let (volume, quantity) = match target.rsplit_once(':') {
            Some((volume, quantity)) if !volume.is_empty() => (PathBuf::from(volume), quantity),
            _ => (PathBuf::from("/"), target),
        };
        let bytes = parse_byte_quantity(quantity)?;
        Ok(Self { volume, bytes })
    }
}

/// Parse `"1.5GB"`, `"500 MB"`, `"64KB"` or `"10B"` into bytes.
pub fn parse_byte_quantity(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    let upper = trimmed.to_ascii_uppercase();
    let (number, multiplier) = if let Some(n) = upper.strip_suffix("GB") {
        (n, 1024u64 * 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix("MB") {
        (n, 1024 * 1024)
    } else if let Some(n) = upper.strip_suffix("KB") {
        (n, 1024)
    } else if let Some(n) = upper.strip_suffix('B') {
        (n, 1)
    } else {
        return Err(CatalogError::DiskQuantity(input.to_string()));
    };

    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| CatalogError::DiskQuantity(input.to_string()))?;
    if !value.is_finite() || value < 0.0 {
        return Err(CatalogError::DiskQuantity(input.to_string()));
    }
    Ok((value * multiplier as f64).round() as u64)
}

// ─────────────────────────────────────────────────────────────────────────────
// Capability
// ─────────────────────────────────────────────────────────────────────────────

fn default_timeout() -> u64 {
    30
}

/// A single permitted operation. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Capability {
    /// Unique key, e.g. `diag.mem`.
    pub id: String,
    pub title: String,
    pub description: String,
    /// Grouping used for browsing, e.g. `diagnostics`.
    pub group: String,
    /// Command template with `{name}` placeholders.
    pub command: String,
    /// Declared argument names.
    #[serde(default)]
    pub arguments: Vec<String>,
    /// Pattern each argument value must match in full. Every declared
    /// argument needs one.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub argument_patterns: BTreeMap<String, String>,
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    pub privilege: PrivilegeLevel,
    pub risk: RiskLevel,
    #[serde(default)]
    pub output_parser: OutputParser,
    /// Regex used by the `regex` parser.
    #[serde(default)]
    pub output_pattern: Option<String>,
    #[serde(default)]
    pub preflight: Vec<PreflightCheck>,
    /// Paths that must exist; each becomes an implicit `path_exists` check.
    #[serde(default)]
    pub required_paths: Vec<PathBuf>,
    /// Applications the capability drives (bundle ids).
    #[serde(default)]
    pub required_apps: Vec<String>,
    #[serde(default)]
    pub estimated_duration_secs: Option<u64>,
    #[serde(default)]
    pub rollback_notes: Option<String>,
}

impl Capability {
    /// Declared timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Declared checks followed by one `path_exists` check per required path.
    pub fn effective_preflight(&self) -> Vec<PreflightCheck> {
        let mut checks = self.preflight.clone();
        checks.extend(self.required_paths.iter().map(|path| {
            PreflightCheck::new(
                CheckType::PathExists,
                path.display().to_string(),
                format!("Required path {} does not exist", path.display()),
            )
        }));
        checks
    }

    /// Whether `value` is acceptable for argument `name`.
    ///
    /// The pattern must match the whole value. An argument without a
    /// pattern accepts nothing.
    pub fn accepts_argument(&self, name: &str, value: &str) -> bool {
        self.argument_patterns
            .get(name)
            .and_then(|pattern| anchored(pattern).ok())
            .is_some_and(|re| re.is_match(value))
    }

    /// Whether the capability is destructive.
    pub fn is_destructive(&self) -> bool {
        self.risk == RiskLevel::Destructive
    }
}

/// Compile `pattern` so it only matches a whole value.
pub fn anchored(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})$"))
}

/// On-disk catalog document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogDocument {
    pub version: String,
    #[serde(default)]
    pub last_updated: Option<String>,
    pub capabilities: Vec<Capability>,
}
