//! Catalog error types.

/// Result type alias for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Errors raised while loading or validating a capability catalog.
///
/// Any of these aborts the whole load; a catalog is never partially populated.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The catalog file could not be read.
    #[error("failed to read catalog '{path}': {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },

    /// The document is not valid JSON or does not match the schema.
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),

    /// Two capabilities share an id.
    #[error("duplicate capability id '{0}'")]
    DuplicateId(String),

    /// A capability is structurally valid JSON but semantically wrong.
    #[error("invalid capability '{capability}': {message}")]
    Invalid { capability: String, message: String },

    /// A command template could not be tokenized.
    #[error("malformed command template: {0}")]
    Template(String),

    /// A disk quantity such as `500MB` could not be parsed.
    #[error("invalid disk quantity '{0}': expected a number followed by GB, MB, KB or B")]
    DiskQuantity(String),
}

impl CatalogError {
    /// Create a validation error for a capability.
    pub fn invalid(capability: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            capability: capability.into(),
            message: message.into(),
        }
    }
}
