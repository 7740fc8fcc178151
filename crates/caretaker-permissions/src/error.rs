//! Permission Center error types.

/// Result type alias for permission operations.
pub type Result<T> = std::result::Result<T, PermissionError>;

/// Errors raised when a permission cannot even be asked about.
///
/// Ordinary outcomes (denied, not installed, probe failures) are statuses,
/// not errors.
#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    /// The target is not a well-formed bundle identifier.
    #[error("invalid automation target '{0}'")]
    InvalidTarget(String),

    /// The platform has no way to request this permission.
    #[error("cannot request permission on this platform: {0}")]
    Unsupported(String),
}
