//! Adapter over the platform's inter-application scripting facility.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::types::{AutomationStatus, PermissionState};

/// Apple Event error codes returned by probes.
pub mod codes {
    /// `errAEEventNotPermitted`: the user denied automation.
    pub const DENIED: i32 = -1743;
    /// `errAEEventWouldRequireUserConsent`: not asked yet.
    pub const NOT_DETERMINED: i32 = -1744;
    /// `procNotFound`: the target is not running.
    pub const NOT_RUNNING: i32 = -600;
    /// `errAENoSuchObject`.
    pub const NO_SUCH_OBJECT: i32 = -1728;
    /// `kLSApplicationNotFoundErr`.
    pub const APPLICATION_NOT_FOUND: i32 = -10814;
    /// Script error "Can't get application id".
    pub const CANT_GET_APPLICATION: i32 = -2700;
}

/// How hard a probe pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeIntensity {
    /// Read the target's name; never triggers a consent prompt on its own.
    Minimal,
    /// Do something that requires consent, so the system asks the user.
    Consent,
}

/// Raw result of a probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Succeeded,
    Failed { code: i32, message: String },
    /// The facility itself is not usable here.
    Unavailable(String),
}

/// Sends probe events to other applications.
#[async_trait]
pub trait ExternalControl: Send + Sync {
    async fn probe(&self, app: &str, intensity: ProbeIntensity) -> ProbeOutcome;
}

/// Turn a probe outcome into an automation status.
pub fn classify(outcome: ProbeOutcome) -> AutomationStatus {
    match outcome {
        ProbeOutcome::Succeeded => AutomationStatus::Determined(PermissionState::Granted),
        ProbeOutcome::Failed { code, message } => match code {
            codes::DENIED => AutomationStatus::Determined(PermissionState::Denied),
            codes::NOT_DETERMINED => AutomationStatus::Determined(PermissionState::NotDetermined),
            codes::NOT_RUNNING => AutomationStatus::TargetNotRunning,
            codes::NO_SUCH_OBJECT | codes::APPLICATION_NOT_FOUND | codes::CANT_GET_APPLICATION => {
                AutomationStatus::TargetNotInstalled
            }
            _ => AutomationStatus::ProbeFailed(format!("{message} ({code})")),
        },
        ProbeOutcome::Unavailable(reason) => AutomationStatus::ProbeFailed(reason),
    }
}

static BUNDLE_ID: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9\-]*(\.[A-Za-z0-9\-]+)+$").ok());

static ERROR_CODE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\((-?\d+)\)\s*$").ok());

/// Whether `app` looks like a reverse-DNS bundle identifier.
pub fn is_valid_bundle_id(app: &str) -> bool {
    BUNDLE_ID.as_ref().is_some_and(|re| re.is_match(app))
}

/// `osascript`-backed probes (macOS).
#[derive(Debug, Clone)]
pub struct OsaScriptControl {
    minimal_timeout: Duration,
    consent_timeout: Duration,
}

impl Default for OsaScriptControl {
    fn default() -> Self {
        Self {
            minimal_timeout: Duration::from_secs(10),
            // The consent dialog waits on the user.
            consent_timeout: Duration::from_secs(120),
        }
    }
}

impl OsaScriptControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// AppleScript lines for a probe. The running check keeps a minimal
    /// probe from launching the target.
    fn script(app: &str, intensity: ProbeIntensity) -> Vec<String> {
        let action = match intensity {
            ProbeIntensity::Minimal => "get name",
            ProbeIntensity::Consent => "count windows",
        };
        vec![
            format!("if application id \"{app}\" is running then"),
            format!("tell application id \"{app}\" to {action}"),
            "else".to_string(),
            format!("error \"not running\" number {}", codes::NOT_RUNNING),
            "end if".to_string(),
        ]
    }
}

/// Pull the trailing `(-1743)` style code out of osascript's stderr.
pub fn parse_error_code(stderr: &str) -> Option<i32> {
    let re = ERROR_CODE.as_ref()?;
    re.captures(stderr.trim())
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[async_trait]
impl ExternalControl for OsaScriptControl {
    async fn probe(&self, app: &str, intensity: ProbeIntensity) -> ProbeOutcome {
        if !is_valid_bundle_id(app) {
            return ProbeOutcome::Unavailable(format!("'{app}' is not a bundle identifier"));
        }

        let mut cmd = Command::new("osascript");
        for line in Self::script(app, intensity) {
            cmd.arg("-e").arg(line);
        }
        cmd.kill_on_drop(true);

        let limit = match intensity {
            ProbeIntensity::Minimal => self.minimal_timeout,
            ProbeIntensity::Consent => self.consent_timeout,
        };
        let output = match timeout(limit, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return ProbeOutcome::Unavailable(format!("osascript: {e}")),
            Err(_) => return ProbeOutcome::Unavailable("probe timed out".to_string()),
        };

        if output.status.success() {
            debug!(app, ?intensity, "Automation probe succeeded");
            return ProbeOutcome::Succeeded;
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        debug!(app, ?intensity, stderr = %stderr, "Automation probe failed");
        match parse_error_code(&stderr) {
            Some(code) => ProbeOutcome::Failed {
                code,
                message: stderr,
            },
            None => ProbeOutcome::Unavailable(stderr),
        }
    }
}

/// Used where there is no scripting facility.
#[derive(Debug, Clone, Default)]
pub struct UnsupportedControl;

#[async_trait]
impl ExternalControl for UnsupportedControl {
    async fn probe(&self, _app: &str, _intensity: ProbeIntensity) -> ProbeOutcome {
        ProbeOutcome::Unavailable("application automation is not supported on this platform".into())
    }
}

/// The control adapter for this platform.
pub fn platform_control() -> std::sync::Arc<dyn ExternalControl> {
    if cfg!(target_os = "macos") {
        std::sync::Arc::new(OsaScriptControl::new())
    } else {
        std::sync::Arc::new(UnsupportedControl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(code: i32) -> ProbeOutcome {
        ProbeOutcome::Failed {
            code,
            message: "execution error".into(),
        }
    }

    #[test]
    fn test_classification_table() {
        assert_eq!(
            classify(ProbeOutcome::Succeeded),
            AutomationStatus::Determined(PermissionState::Granted)
        );
        assert_eq!(
            classify(failed(-1743)),
            AutomationStatus::Determined(PermissionState::Denied)
        );
        assert_eq!(
            classify(failed(-1744)),
            AutomationStatus::Determined(PermissionState::NotDetermined)
        );
        assert_eq!(classify(failed(-600)), AutomationStatus::TargetNotRunning);
        for code in [-1728, -10814, -2700] {
            assert_eq!(classify(failed(code)), AutomationStatus::TargetNotInstalled);
        }
        assert!(matches!(classify(failed(-1)), AutomationStatus::ProbeFailed(m) if m.contains("-1")));
        assert!(matches!(
            classify(ProbeOutcome::Unavailable("no".into())),
            AutomationStatus::ProbeFailed(_)
        ));
    }

    #[test]
    fn test_parse_error_code() {
        assert_eq!(
            parse_error_code(
                "36:72: execution error: Not authorized to send Apple events to Safari. (-1743)\n"
            ),
            Some(-1743)
        );
        assert_eq!(
            parse_error_code("execution error: Can’t get application id \"x.y\". (-2700)"),
            Some(-2700)
        );
        assert_eq!(parse_error_code("something odd"), None);
    }

    #[test]
    fn test_bundle_id_validation() {
        assert!(is_valid_bundle_id("com.apple.Safari"));
        assert!(is_valid_bundle_id("com.google.Chrome"));
        assert!(!is_valid_bundle_id("Safari"));
        assert!(!is_valid_bundle_id("com.apple.Safari\" to do shell script \"id"));
        assert!(!is_valid_bundle_id(""));
    }

    #[test]
    fn test_minimal_script_guards_launch() {
        let lines = OsaScriptControl::script("com.apple.finder", ProbeIntensity::Minimal);
        assert!(lines[0].contains("is running"));
        assert!(lines[1].ends_with("get name"));
        let lines = OsaScriptControl::script("com.apple.finder", ProbeIntensity::Consent);
        assert!(lines[1].ends_with("count windows"));
    }

    #[tokio::test]
    async fn test_unsupported_control() {
        let outcome = UnsupportedControl
            .probe("com.apple.Safari", ProbeIntensity::Minimal)
            .await;
        assert!(matches!(outcome, ProbeOutcome::Unavailable(_)));
    }
}
