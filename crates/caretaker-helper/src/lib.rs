//! Privileged helper for Caretaker.
//!
//! The helper is a small root daemon that runs a fixed set of system
//! programs on behalf of the app. This crate holds both sides of that
//! boundary:
//!
//! - [`protocol`]: the versioned, newline-delimited JSON messages
//! - [`allowlist`]: the helper's own compiled-in list of programs
//! - [`server`]: caller authentication and execution, used by the binary
//! - [`client`]: the app's single-connection client and [`HelperChannel`]
//! - [`install`]: installed/outdated detection and the install flow

pub mod allowlist;
pub mod client;
pub mod error;
pub mod install;
pub mod protocol;
pub mod server;

pub use allowlist::{Allowlist, Violation, BUILTIN_PROGRAMS};
pub use client::{HelperChannel, HelperClient};
pub use error::{HelperError, Result};
pub use install::{
    compare_versions, platform_authorizer, Authorizer, HelperInstallation, HelperManifest,
    HelperStatusProvider, InstallStatus, OsaScriptAuthorizer, PkexecAuthorizer,
    TrustedCaller,
};
pub use protocol::{
    ErrorCode, ExecuteRequest, ExecutedOutput, HelperRequest, HelperResponse, RequestEnvelope,
    ResponseEnvelope, PROTOCOL_VERSION,
};
pub use server::{CallerIdentity, CallerPolicy, HelperServer};
