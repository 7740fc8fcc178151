//! Error types for the audit crate.

use thiserror::Error;

/// Errors that can occur reading or writing the audit log.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Database connection or operation failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record's stored hash does not match its content.
    #[error("Integrity violation in record {record_id}: expected hash {expected}, found {found}")]
    IntegrityViolation {
        record_id: i64,
        expected: String,
        found: String,
    },

    /// A record does not point at its predecessor's hash.
    #[error("Chain broken at record {record_id}: expected previous hash {expected}, found {found}")]
    ChainBroken {
        record_id: i64,
        expected: String,
        found: String,
    },

    /// Stored data could not be interpreted.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type alias for audit operations.
pub type Result<T> = std::result::Result<T, AuditError>;
