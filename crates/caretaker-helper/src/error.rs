//! Error types for helper installation and communication.

use thiserror::Error;

use crate::protocol::ErrorCode;

/// Result type for helper operations.
pub type Result<T> = std::result::Result<T, HelperError>;

/// Errors on either side of the helper boundary.
#[derive(Debug, Error)]
pub enum HelperError {
    /// No helper manifest or binary is installed.
    #[error("privileged helper is not installed")]
    NotInstalled,

    /// The installed helper is older than this app requires.
    #[error("privileged helper {installed} is outdated (requires {required})")]
    Outdated { installed: String, required: String },

    /// The user dismissed or failed the administrator prompt.
    #[error("administrator authorization was denied")]
    AuthorizationDenied,

    /// The helper refused a program that is not on its allowlist.
    #[error("program is not allowlisted by the helper: {0}")]
    NotAllowlisted(String),

    /// The helper socket could not be reached or dropped mid-request.
    #[error("could not talk to the privileged helper: {0}")]
    ConnectionFailed(String),

    /// The helper rejected this process as a caller.
    #[error("helper rejected the caller: {0}")]
    UnauthorizedCaller(String),

    /// Malformed or unexpected message, or version mismatch.
    #[error("helper protocol error: {0}")]
    Protocol(String),

    /// The helper could not start the requested program.
    #[error("helper failed to spawn program: {0}")]
    SpawnFailed(String),

    /// The privileged install script failed for a reason other than a denial.
    #[error("helper installation failed: {0}")]
    InstallFailed(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HelperError {
    /// Create a connection failure.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Map an error response from the helper to a typed error.
    pub fn from_remote(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            ErrorCode::NotAllowlisted => Self::NotAllowlisted(message),
            ErrorCode::UnauthorizedCaller => Self::UnauthorizedCaller(message),
            ErrorCode::ProtocolMismatch | ErrorCode::BadRequest => Self::Protocol(message),
            ErrorCode::SpawnFailed => Self::SpawnFailed(message),
        }
    }

    /// What the user can do about it, when there is something to do.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Self::NotInstalled => Some("Run `caretaker helper install` to install the helper."),
            Self::Outdated { .. } => {
                Some("Run `caretaker helper install` to upgrade the helper to the required version.")
            }
            Self::AuthorizationDenied => {
                Some("Retry and enter an administrator password when prompted.")
            }
            Self::ConnectionFailed(_) => Some(
                "Check that the helper service is running; reinstalling it re-registers the service.",
            ),
            Self::UnauthorizedCaller(_) => {
                Some("Run Caretaker from its installed location as the user who installed the helper.")
            }
            Self::Protocol(_) => Some("Reinstall the helper so both sides speak the same protocol."),
            Self::NotAllowlisted(_) | Self::SpawnFailed(_) | Self::InstallFailed(_) | Self::Json(_) => {
                None
            }
        }
    }
}
