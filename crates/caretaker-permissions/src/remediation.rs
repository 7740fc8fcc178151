//! System Settings deep links and user-facing fix instructions.

use caretaker_helper::InstallStatus;

use crate::types::PermissionKind;

/// Automation pane (Privacy & Security > Automation).
pub const AUTOMATION_URL: &str =
    "x-apple.systempreferences:com.apple.preference.security?Privacy_Automation";

/// Full Disk Access pane.
pub const FULL_DISK_ACCESS_URL: &str =
    "x-apple.systempreferences:com.apple.preference.security?Privacy_AllFiles";

/// Login Items & Extensions pane, where background helpers are listed.
pub const LOGIN_ITEMS_URL: &str = "x-apple.systempreferences:com.apple.LoginItems-Settings.extension";

/// Deep link into System Settings for a permission.
pub fn settings_url(kind: &PermissionKind) -> &'static str {
    match kind {
        PermissionKind::Automation(_) => AUTOMATION_URL,
        PermissionKind::FullDiskAccess => FULL_DISK_ACCESS_URL,
        PermissionKind::HelperInstallation => LOGIN_ITEMS_URL,
    }
}

/// Ordered steps the user can follow to grant a permission.
pub fn remediation_steps(kind: &PermissionKind) -> Vec<String> {
    match kind {
        PermissionKind::Automation(app) => vec![
            "Open System Settings > Privacy & Security > Automation.".to_string(),
            "Find Caretaker in the list and expand it.".to_string(),
            format!("Turn on the switch for {app}."),
            format!("If {app} is not listed, run `caretaker permissions request {app}` to trigger the prompt."),
        ],
        PermissionKind::FullDiskAccess => vec![
            "Open System Settings > Privacy & Security > Full Disk Access.".to_string(),
            "Click + and add Caretaker (or your terminal when using the CLI).".to_string(),
            "Turn on its switch.".to_string(),
            "Restart Caretaker so the new access takes effect.".to_string(),
        ],
        PermissionKind::HelperInstallation => vec![
            "Run `caretaker helper install`.".to_string(),
            "Enter an administrator password when prompted.".to_string(),
            "If the helper was blocked, allow it under System Settings > General > Login Items & Extensions.".to_string(),
        ],
    }
}

/// Extra guidance for a specific helper state.
pub fn helper_detail(status: &InstallStatus) -> Option<String> {
    match status {
        InstallStatus::Current { .. } => None,
        InstallStatus::NotInstalled => Some("not installed".to_string()),
        InstallStatus::Outdated {
            installed,
            required,
        } => Some(format!("outdated (installed {installed}, requires {required})")),
    }
}
