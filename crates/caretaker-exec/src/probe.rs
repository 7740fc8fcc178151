//! Read-only queries against live system state.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};
use tokio::process::Command;
use tracing::debug;

/// A process visible to the current user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningApp {
    pub pid: u32,
    pub name: String,
    pub exe: Option<PathBuf>,
}

impl RunningApp {
    /// Whether this process matches an app identity from a preflight check.
    ///
    /// `target` may be a process name, an executable path, or an app name
    /// that appears as a `<name>.app` bundle in the executable path.
    pub fn matches(&self, target: &str) -> bool {
        if self.name.eq_ignore_ascii_case(target) {
            return true;
        }
        let Some(exe) = &self.exe else {
            return false;
        };
        if target.starts_with('/') {
            return exe == Path::new(target);
        }
        let bundle = format!("/{target}.app/");
        exe.to_string_lossy()
            .to_lowercase()
            .contains(&bundle.to_lowercase())
    }
}

/// System Integrity Protection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SipStatus {
    Enabled,
    Disabled,
    /// Not a macOS host.
    NotApplicable,
    Unknown,
}

/// Live system queries used by preflight checks. None of them mutate.
#[async_trait]
pub trait SystemProbe: Send + Sync {
    async fn path_exists(&self, path: &Path) -> bool;

    /// Judged from metadata and permission bits only; never creates files.
    async fn path_writable(&self, path: &Path) -> bool;

    async fn running_apps(&self) -> Vec<RunningApp>;

    /// Free bytes on the volume holding `path`.
    async fn free_space(&self, path: &Path) -> Option<u64>;

    async fn sip_status(&self) -> SipStatus;
}

// ─────────────────────────────────────────────────────────────────────────────
// Production probe
// ─────────────────────────────────────────────────────────────────────────────

/// [`SystemProbe`] backed by the filesystem, `sysinfo` and `csrutil`.
#[derive(Debug, Clone, Default)]
pub struct SysinfoProbe;

impl SysinfoProbe {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SystemProbe for SysinfoProbe {
    async fn path_exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn path_writable(&self, path: &Path) -> bool {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            return caller_can_write(path, false);
        }
        // A missing file is writable when its directory is.
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                tokio::fs::metadata(parent).await.is_ok_and(|m| m.is_dir())
                    && caller_can_write(parent, true)
            }
            _ => false,
        }
    }

    async fn running_apps(&self) -> Vec<RunningApp> {
        let sys = System::new_all();
        sys.processes()
            .iter()
            .map(|(pid, process)| RunningApp {
                pid: pid.as_u32(),
                name: process.name().to_string_lossy().to_string(),
                exe: process.exe().map(Path::to_path_buf),
            })
            .collect()
    }

    async fn free_space(&self, path: &Path) -> Option<u64> {
        let target = tokio::fs::canonicalize(path)
            .await
            .unwrap_or_else(|_| path.to_path_buf());
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|d| target.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .map(|d| d.available_space())
    }

    async fn sip_status(&self) -> SipStatus {
        if !cfg!(target_os = "macos") {
            return SipStatus::NotApplicable;
        }
        match Command::new("/usr/bin/csrutil")
            .arg("status")
            .kill_on_drop(true)
            .output()
            .await
        {
            Ok(output) => parse_csrutil(&String::from_utf8_lossy(&output.stdout)),
            Err(e) => {
                debug!(error = %e, "csrutil unavailable");
                SipStatus::Unknown
            }
        }
    }
}

/// Interpret `csrutil status` output.
pub fn parse_csrutil(output: &str) -> SipStatus {
    let lower = output.to_lowercase();
    if lower.contains("status: enabled") {
        SipStatus::Enabled
    } else if lower.contains("status: disabled") {
        SipStatus::Disabled
    } else {
        SipStatus::Unknown
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(target: &str) -> PathBuf {
    match target.strip_prefix("~") {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => match dirs::home_dir() {
            Some(home) => home.join(rest.trim_start_matches('/')),
            None => PathBuf::from(target),
        },
        _ => PathBuf::from(target),
    }
}

/// Ask the kernel whether the calling user may write `path`, taking
/// ownership, groups and root into account. `create_in` also requires
/// search permission, as creating an entry in a directory does.
#[cfg(unix)]
fn caller_can_write(path: &Path, create_in: bool) -> bool {
    use nix::unistd::{AccessFlags, access};

    let mut mode = AccessFlags::W_OK;
    if create_in {
        mode |= AccessFlags::X_OK;
    }
    access(path, mode).is_ok()
}

#[cfg(not(unix))]
fn caller_can_write(path: &Path, _create_in: bool) -> bool {
    std::fs::metadata(path).is_ok_and(|m| !m.permissions().readonly())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_csrutil() {
        assert_eq!(
            parse_csrutil("System Integrity Protection status: enabled.\n"),
            SipStatus::Enabled
        );
        assert_eq!(
            parse_csrutil("System Integrity Protection status: disabled."),
            SipStatus::Disabled
        );
        assert_eq!(parse_csrutil("command not found"), SipStatus::Unknown);
    }

    #[test]
    fn test_running_app_matching() {
        let app = RunningApp {
            pid: 10,
            name: "Safari".into(),
            exe: Some(PathBuf::from("/Applications/Safari.app/Contents/MacOS/Safari")),
        };
        assert!(app.matches("safari"));
        assert!(app.matches("/Applications/Safari.app/Contents/MacOS/Safari"));

        let chrome = RunningApp {
            pid: 11,
            name: "Google Chrome Helper".into(),
            exe: Some(PathBuf::from(
                "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            )),
        };
        assert!(chrome.matches("Google Chrome"));
        assert!(!chrome.matches("Xcode"));
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/tmp/x"), PathBuf::from("/tmp/x"));
        assert_eq!(expand_home("~user/x"), PathBuf::from("~user/x"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/Library"), home.join("Library"));
        }
    }

    #[tokio::test]
    async fn test_sysinfo_probe_paths() {
        let dir = tempfile::tempdir().unwrap();
        let probe = SysinfoProbe::new();
        assert!(probe.path_exists(dir.path()).await);
        assert!(!probe.path_exists(&dir.path().join("missing")).await);
        assert!(probe.path_writable(&dir.path().join("new-file")).await);
        assert!(!dir.path().join("new-file").exists());
        assert!(!probe.path_writable(Path::new("/nonexistent/dir/file")).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_path_writable_follows_ownership() {
        use std::os::unix::fs::PermissionsExt;

        let is_root = nix::unistd::getuid().is_root();
        let probe = SysinfoProbe::new();

        // Root-owned and not group/world writable.
        assert_eq!(probe.path_writable(Path::new("/")).await, is_root);
        assert_eq!(
            probe.path_writable(Path::new("/caretaker-not-here")).await,
            is_root
        );

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("locked");
        std::fs::write(&file, "x").unwrap();
        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o444)).unwrap();
        assert_eq!(probe.path_writable(&file).await, is_root);

        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(probe.path_writable(&file).await);
    }
}
