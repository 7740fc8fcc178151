//! Helper installation state and the one-time install flow.
//!
//! An installed helper consists of the binary, a JSON manifest next to it
//! recording the installed version, and a launchd (macOS) or systemd (Linux)
//! service definition that keeps it listening on its socket.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use caretaker_config::HelperConfig;
use semver::Version;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::{HelperError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────────────────────

/// Installed helper state relative to what this app needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InstallStatus {
    NotInstalled,
    Current { version: String },
    Outdated { installed: String, required: String },
}

impl InstallStatus {
    /// Turn anything other than `Current` into the matching error.
    pub fn require_current(&self) -> Result<()> {
        match self {
            Self::Current { .. } => Ok(()),
            Self::NotInstalled => Err(HelperError::NotInstalled),
            Self::Outdated {
                installed,
                required,
            } => Err(HelperError::Outdated {
                installed: installed.clone(),
                required: required.clone(),
            }),
        }
    }
}

/// Read-only view of helper installation state.
pub trait HelperStatusProvider: Send + Sync {
    fn helper_status(&self) -> InstallStatus;
}

/// Manifest written next to the installed binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelperManifest {
    pub service_name: String,
    pub version: String,
    pub binary: PathBuf,
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorizers
// ─────────────────────────────────────────────────────────────────────────────

/// Runs a shell script with administrator rights after prompting the user.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Run the script; a dismissed prompt is `AuthorizationDenied`.
    async fn run_privileged(&self, script: &str) -> Result<()>;
}

/// macOS: `osascript` `do shell script ... with administrator privileges`.
#[derive(Debug, Clone, Default)]
pub struct OsaScriptAuthorizer;

#[async_trait]
impl Authorizer for OsaScriptAuthorizer {
    async fn run_privileged(&self, script: &str) -> Result<()> {
        let apple_script = format!(
            "do shell script \"{}\" with administrator privileges",
            applescript_escape(script)
        );
        let output = Command::new("osascript")
            .arg("-e")
            .arg(&apple_script)
            .output()
            .await
            .map_err(|e| HelperError::InstallFailed(format!("osascript: {e}")))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        // -128 is userCanceledErr.
        if stderr.contains("-128") || stderr.contains("User canceled") {
            return Err(HelperError::AuthorizationDenied);
        }
        Err(HelperError::InstallFailed(stderr.trim().to_string()))
    }
}

/// Linux: polkit `pkexec /bin/sh -c`.
#[derive(Debug, Clone, Default)]
pub struct PkexecAuthorizer;

#[async_trait]
impl Authorizer for PkexecAuthorizer {
    async fn run_privileged(&self, script: &str) -> Result<()> {
        let output = Command::new("pkexec")
            .arg("/bin/sh")
            .arg("-c")
            .arg(script)
            .output()
            .await
            .map_err(|e| HelperError::InstallFailed(format!("pkexec: {e}")))?;
        match output.status.code() {
            Some(0) => Ok(()),
            // 126: dialog dismissed, 127: not authorized.
            Some(126) | Some(127) => Err(HelperError::AuthorizationDenied),
            _ => Err(HelperError::InstallFailed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            )),
        }
    }
}

/// The authorizer appropriate for this platform.
pub fn platform_authorizer() -> Box<dyn Authorizer> {
    if cfg!(target_os = "macos") {
        Box::new(OsaScriptAuthorizer)
    } else {
        Box::new(PkexecAuthorizer)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Installation
// ─────────────────────────────────────────────────────────────────────────────

/// Where the helper lives and which version the app requires.
#[derive(Debug, Clone)]
pub struct HelperInstallation {
    pub service_name: String,
    pub install_dir: PathBuf,
    pub socket_path: PathBuf,
    pub required_version: String,
}

impl HelperInstallation {
    /// Build from the `[helper]` config section.
    pub fn from_config(config: &HelperConfig) -> Self {
        Self {
            service_name: config.service_name.clone(),
            install_dir: config.install_dir.clone(),
            socket_path: config.socket_path.clone(),
            required_version: config.required_version.clone(),
        }
    }

    pub fn binary_path(&self) -> PathBuf {
        self.install_dir.join(&self.service_name)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.install_dir.join(format!("{}.json", self.service_name))
    }

    /// Compare the installed manifest with the required version.
    pub fn status(&self) -> InstallStatus {
        let manifest_path = self.manifest_path();
        let contents = match std::fs::read_to_string(&manifest_path) {
            Ok(contents) => contents,
            Err(_) => return InstallStatus::NotInstalled,
        };
        let manifest: HelperManifest = match serde_json::from_str(&contents) {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %manifest_path.display(), error = %e, "Unreadable helper manifest");
                return InstallStatus::NotInstalled;
            }
        };
        if !manifest.binary.is_file() {
            warn!(binary = %manifest.binary.display(), "Helper manifest points at a missing binary");
            return InstallStatus::NotInstalled;
        }
        compare_versions(&manifest.version, &self.required_version)
    }

    /// Manifest contents for the version being installed.
    pub fn manifest(&self, version: &str) -> HelperManifest {
        HelperManifest {
            service_name: self.service_name.clone(),
            version: version.to_string(),
            binary: self.binary_path(),
        }
    }

    /// Shell script that installs `source_binary` and registers the service.
    ///
    /// The service is started so that only `caller` (and root) may connect.
    pub fn install_script(&self, source_binary: &Path, caller: &TrustedCaller) -> Result<String> {
        let manifest = serde_json::to_string_pretty(&self.manifest(&self.required_version))?;
        let binary = self.binary_path();
        let socket = self.socket_path.display().to_string();
        let mut script = String::new();

        let _ = writeln!(script, "set -e");
        let _ = writeln!(script, "mkdir -p {}", shell_quote(&self.install_dir.display().to_string()));
        let _ = writeln!(
            script,
            "cp {} {}",
            shell_quote(&source_binary.display().to_string()),
            shell_quote(&binary.display().to_string())
        );
        let _ = writeln!(script, "chown 0:0 {}", shell_quote(&binary.display().to_string()));
        let _ = writeln!(script, "chmod 755 {}", shell_quote(&binary.display().to_string()));
        let _ = writeln!(
            script,
            "printf '%s\\n' {} > {}",
            shell_quote(&manifest),
            shell_quote(&self.manifest_path().display().to_string())
        );

        let exec_args = [
            binary.display().to_string(),
            "--socket".to_string(),
            socket,
            "--allow-uid".to_string(),
            caller.uid.to_string(),
            "--allow-exe".to_string(),
            caller.executable.display().to_string(),
        ];

        if cfg!(target_os = "macos") {
            let plist_path = format!("/Library/LaunchDaemons/{}.plist", self.service_name);
            let plist = launchd_plist(&self.service_name, &exec_args);
            let _ = writeln!(script, "printf '%s\\n' {} > {}", shell_quote(&plist), shell_quote(&plist_path));
            let _ = writeln!(script, "launchctl bootout system {} 2>/dev/null || true", shell_quote(&plist_path));
            let _ = writeln!(script, "launchctl bootstrap system {}", shell_quote(&plist_path));
        } else {
            let unit_path = format!("/etc/systemd/system/{}.service", self.service_name);
            let unit = systemd_unit(&self.service_name, &exec_args);
            let _ = writeln!(script, "printf '%s\\n' {} > {}", shell_quote(&unit), shell_quote(&unit_path));
            let _ = writeln!(script, "systemctl daemon-reload");
            let _ = writeln!(
                script,
                "systemctl enable --now {}",
                shell_quote(&format!("{}.service", self.service_name))
            );
        }
        Ok(script)
    }

    /// Install or upgrade the helper. Prompts for administrator rights once.
    pub async fn install(&self, source_binary: &Path, authorizer: &dyn Authorizer) -> Result<InstallStatus> {
        if !source_binary.is_file() {
            return Err(HelperError::InstallFailed(format!(
                "helper binary {} not found",
                source_binary.display()
            )));
        }
        let caller = TrustedCaller::current()?;
        let script = self.install_script(source_binary, &caller)?;
        info!(service = %self.service_name, "Installing privileged helper");
        authorizer.run_privileged(&script).await?;

        let status = self.status();
        info!(?status, "Helper installation finished");
        Ok(status)
    }
}

impl HelperStatusProvider for HelperInstallation {
    fn helper_status(&self) -> InstallStatus {
        self.status()
    }
}

/// Compare an installed version with a required one.
///
/// An unparseable installed version counts as outdated.
pub fn compare_versions(installed: &str, required: &str) -> InstallStatus {
    let outdated = || InstallStatus::Outdated {
        installed: installed.to_string(),
        required: required.to_string(),
    };
    let (Ok(have), Ok(need)) = (Version::parse(installed), Version::parse(required)) else {
        return outdated();
    };
    if have >= need {
        InstallStatus::Current {
            version: installed.to_string(),
        }
    } else {
        outdated()
    }
}

/// The client the installed helper will accept connections from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedCaller {
    pub uid: u32,
    /// Canonical path of the client executable.
    pub executable: PathBuf,
}

impl TrustedCaller {
    /// The user and executable of the running process.
    pub fn current() -> Result<Self> {
        let executable = std::env::current_exe()
            .and_then(|exe| exe.canonicalize())
            .map_err(|e| HelperError::InstallFailed(format!("cannot resolve own executable: {e}")))?;
        Ok(Self {
            uid: current_uid(),
            executable,
        })
    }
}

#[cfg(unix)]
fn current_uid() -> u32 {
    nix::unistd::getuid().as_raw()
}

#[cfg(not(unix))]
fn current_uid() -> u32 {
    0
}

/// Quote a string for POSIX `sh`.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn applescript_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn launchd_plist(label: &str, args: &[String]) -> String {
    let mut plist = String::new();
    let _ = writeln!(plist, r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    let _ = writeln!(
        plist,
        r#"<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">"#
    );
    let _ = writeln!(plist, r#"<plist version="1.0"><dict>"#);
    let _ = writeln!(plist, "  <key>Label</key><string>{}</string>", xml_escape(label));
    let _ = writeln!(plist, "  <key>ProgramArguments</key><array>");
    for arg in args {
        let _ = writeln!(plist, "    <string>{}</string>", xml_escape(arg));
    }
    let _ = writeln!(plist, "  </array>");
    let _ = writeln!(plist, "  <key>RunAtLoad</key><true/>");
    let _ = writeln!(plist, "  <key>KeepAlive</key><true/>");
    let _ = write!(plist, "</dict></plist>");
    plist
}

fn systemd_unit(name: &str, args: &[String]) -> String {
    let exec = args
        .iter()
        .map(|a| {
            if a.contains(char::is_whitespace) {
                format!("\"{a}\"")
            } else {
                a.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "[Unit]\nDescription=Caretaker privileged helper ({name})\n\n[Service]\nExecStart={exec}\nRestart=on-failure\n\n[Install]\nWantedBy=multi-user.target"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn installation(dir: &Path) -> HelperInstallation {
        HelperInstallation {
            service_name: "io.caretaker.helper".into(),
            install_dir: dir.to_path_buf(),
            socket_path: dir.join("helper.sock"),
            required_version: "0.2.0".into(),
        }
    }

    fn write_manifest(inst: &HelperInstallation, version: &str) {
        std::fs::write(inst.binary_path(), b"#!/bin/sh\n").unwrap();
        let manifest = inst.manifest(version);
        std::fs::write(
            inst.manifest_path(),
            serde_json::to_string(&manifest).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn test_status_not_installed() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(installation(dir.path()).status(), InstallStatus::NotInstalled);
    }

    #[test]
    fn test_status_current_and_outdated() {
        let dir = tempfile::tempdir().unwrap();
        let inst = installation(dir.path());

        write_manifest(&inst, "0.2.0");
        assert_eq!(
            inst.status(),
            InstallStatus::Current {
                version: "0.2.0".into()
            }
        );

        write_manifest(&inst, "0.1.9");
        assert_eq!(
            inst.status(),
            InstallStatus::Outdated {
                installed: "0.1.9".into(),
                required: "0.2.0".into()
            }
        );
        assert!(matches!(
            inst.status().require_current(),
            Err(HelperError::Outdated { .. })
        ));
    }

    #[test]
    fn test_manifest_without_binary_is_not_installed() {
        let dir = tempfile::tempdir().unwrap();
        let inst = installation(dir.path());
        std::fs::write(
            inst.manifest_path(),
            serde_json::to_string(&inst.manifest("0.2.0")).unwrap(),
        )
        .unwrap();
        assert_eq!(inst.status(), InstallStatus::NotInstalled);
    }

    #[test]
    fn test_compare_versions() {
        assert!(matches!(compare_versions("1.0.0", "0.9.0"), InstallStatus::Current { .. }));
        assert!(matches!(compare_versions("garbage", "0.9.0"), InstallStatus::Outdated { .. }));
        assert!(matches!(
            compare_versions("1.0.0-beta.1", "1.0.0"),
            InstallStatus::Outdated { .. }
        ));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_install_script_contents() {
        let dir = tempfile::tempdir().unwrap();
        let inst = installation(dir.path());
        let caller = TrustedCaller {
            uid: 501,
            executable: PathBuf::from("/Applications/Caretaker.app/Contents/MacOS/caretaker"),
        };
        let script = inst
            .install_script(Path::new("/tmp/build/caretaker-helper"), &caller)
            .unwrap();
        assert!(script.starts_with("set -e\n"));
        assert!(script.contains("cp '/tmp/build/caretaker-helper'"));
        assert!(script.contains("io.caretaker.helper.json"));
        let allow_uid = script.find("--allow-uid").unwrap();
        let allow_exe = script.find("--allow-exe").unwrap();
        assert!(script[allow_uid..].contains("501"));
        assert!(script[allow_exe..].contains("/Applications/Caretaker.app/Contents/MacOS/caretaker"));
        assert!(script.contains("\"version\": \"0.2.0\""));
    }

    struct RecordingAuthorizer {
        deny: bool,
        scripts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Authorizer for RecordingAuthorizer {
        async fn run_privileged(&self, script: &str) -> Result<()> {
            self.scripts.lock().unwrap().push(script.to_string());
            if self.deny {
                Err(HelperError::AuthorizationDenied)
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_install_denied() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("caretaker-helper");
        std::fs::write(&source, b"bin").unwrap();
        let inst = installation(&dir.path().join("install"));
        let authorizer = RecordingAuthorizer {
            deny: true,
            scripts: Mutex::new(Vec::new()),
        };
        let err = inst.install(&source, &authorizer).await.unwrap_err();
        assert!(matches!(err, HelperError::AuthorizationDenied));
        assert_eq!(authorizer.scripts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_install_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let inst = installation(dir.path());
        let authorizer = RecordingAuthorizer {
            deny: false,
            scripts: Mutex::new(Vec::new()),
        };
        let err = inst
            .install(&dir.path().join("nope"), &authorizer)
            .await
            .unwrap_err();
        assert!(matches!(err, HelperError::InstallFailed(_)));
        assert!(authorizer.scripts.lock().unwrap().is_empty());
    }
}
