//! Permission Center for Caretaker.
//!
//! Tracks the three kinds of access capabilities depend on:
//!
//! - **Automation**: Apple Events control of a specific application
//! - **Full Disk Access**: reading protected user data
//! - **Helper installation**: the privileged helper being present and current
//!
//! Automation probes go through an [`ExternalControl`] adapter so that the
//! classification logic can be exercised without a scripting host. Probe
//! outcomes keep "target not installed" and "target not running" apart from
//! an actual grant or denial.
//!
//! ```rust,ignore
//! use caretaker_permissions::{PermissionCenter, platform_control};
//!
//! let center = PermissionCenter::new(platform_control(), helper)
//!     .with_target("com.apple.Safari", "Safari");
//! let snapshot = center.refresh_all().await;
//! ```

pub mod center;
pub mod control;
pub mod error;
pub mod remediation;
pub mod types;

pub use center::{helper_entry, AutomationTarget, PermissionCenter};
pub use control::{
    classify, is_valid_bundle_id, platform_control, ExternalControl, OsaScriptControl,
    ProbeIntensity, ProbeOutcome, UnsupportedControl,
};
pub use error::{PermissionError, Result};
pub use remediation::{remediation_steps, settings_url};
pub use types::{
    AutomationStatus, PermissionEntry, PermissionKind, PermissionSnapshot, PermissionState,
};
