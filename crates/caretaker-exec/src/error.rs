//! Execution error types.

use caretaker_catalog::{CatalogError, PrivilegeLevel};
use caretaker_helper::HelperError;
use thiserror::Error;

use crate::preflight::PreflightResult;

/// Result type alias for execution.
pub type Result<T> = std::result::Result<T, ExecError>;

/// Reasons a capability was refused or could not be dispatched.
///
/// A command that ran and exited non-zero, or timed out, is not an error;
/// it is an [`ExecutionResult`](crate::ExecutionResult) with that status.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("unknown capability '{0}'")]
    UnknownCapability(String),

    /// The catalog failed to load, so nothing may run.
    #[error("capability catalog is unavailable: {0}")]
    CatalogUnavailable(String),

    /// The executor does not serve this capability's privilege level.
    #[error("{executor} executor cannot run '{capability}' (privilege: {privilege})")]
    PrivilegeMismatch {
        capability: String,
        privilege: PrivilegeLevel,
        executor: &'static str,
    },

    /// No registered executor serves this privilege level.
    #[error("no executor available for {0} capabilities")]
    NoExecutor(PrivilegeLevel),

    /// Preconditions do not hold. Nothing was run.
    #[error("preflight failed: {}", .0.describe())]
    PreflightFailed(PreflightResult),

    #[error("capability '{capability}' needs argument '{name}'")]
    MissingArgument { capability: String, name: String },

    #[error("capability '{capability}' does not accept argument '{name}'")]
    UnexpectedArgument { capability: String, name: String },

    /// The value does not match the argument's declared pattern.
    #[error("value {value:?} is not allowed for argument '{name}' of '{capability}'")]
    RejectedArgument {
        capability: String,
        name: String,
        value: String,
    },

    /// The command template is malformed.
    #[error("invalid command template: {0}")]
    Template(#[from] CatalogError),

    /// The program could not be started.
    #[error("failed to start '{program}': {message}")]
    Spawn { program: String, message: String },

    #[error(transparent)]
    Helper(#[from] HelperError),
}

impl ExecError {
    /// What the user can do about it, when there is something to do.
    pub fn recovery_suggestion(&self) -> Option<String> {
        match self {
            Self::Helper(e) => e.recovery_suggestion().map(str::to_string),
            Self::PreflightFailed(result) => result.first_remedy(),
            Self::CatalogUnavailable(_) => {
                Some("Check the catalog file with `caretaker capabilities stats`.".to_string())
            }
            _ => None,
        }
    }
}
