//! Portable JSON export of the audit log.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::record::{verify_sequence, RunRecord};

/// Version of the export document layout.
pub const EXPORT_FORMAT_VERSION: u32 = 1;

/// An ordered slice of the chain, written for offline inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditExport {
    pub format_version: u32,
    pub exported_at: DateTime<Utc>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    /// Oldest first.
    pub records: Vec<RunRecord>,
}

impl AuditExport {
    /// Read an export file.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write as pretty JSON, creating parent directories.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Recompute every hash and check each record links to the one before.
    ///
    /// The first exported record is only linked to the genesis sentinel when
    /// it is the first record of the whole chain.
    pub fn verify(&self) -> Result<()> {
        verify_sequence(&self.records, None)
    }
}
