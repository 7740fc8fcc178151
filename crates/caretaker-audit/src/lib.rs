//! Tamper-evident audit log for Caretaker.
//!
//! Every execution attempt produces exactly one [`RunRecord`]. Records are
//! chained: each stores the SHA-256 hash of its predecessor, and its own hash
//! covers all of its content plus that link. The first record links to
//! [`GENESIS_HASH`].
//!
//! The store never updates or deletes records. Every read recomputes hashes
//! and reports a mismatch as [`AuditError::IntegrityViolation`]; nothing is
//! repaired.

pub mod error;
pub mod export;
pub mod record;
pub mod store;

pub use error::{AuditError, Result};
pub use export::{AuditExport, EXPORT_FORMAT_VERSION};
pub use record::{
    verify_sequence, ChainReport, ExecutionStatus, NewRunRecord, RunRecord, GENESIS_HASH,
};
pub use store::AuditStore;
