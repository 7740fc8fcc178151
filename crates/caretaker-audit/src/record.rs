//! Run records and the hash chain that links them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use caretaker_catalog::PrivilegeLevel;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AuditError, Result};

/// `previous_hash` of the first record.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

// ─────────────────────────────────────────────────────────────────────────────
// Execution status
// ─────────────────────────────────────────────────────────────────────────────

/// Terminal status of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    /// Non-zero exit, or the attempt failed before a process ran.
    Failed,
    /// Killed after exceeding its timeout.
    TimedOut,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }

    pub fn is_success(&self) -> bool {
        *self == Self::Success
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "timed_out" => Ok(Self::TimedOut),
            other => Err(AuditError::InvalidData(format!(
                "unknown execution status '{other}'"
            ))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// What an executor reports for one attempt, before it is chained.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRunRecord {
    pub capability_id: String,
    pub capability_title: String,
    pub privilege: PrivilegeLevel,
    /// Resolved arguments.
    pub arguments: BTreeMap<String, String>,
    pub duration_ms: u64,
    pub exit_code: Option<i32>,
    pub status: ExecutionStatus,
    /// Captured output; written to `<output_dir>/<id>.log` when set.
    pub output: Option<String>,
    /// Parsed summary.
    pub summary: Option<String>,
}

impl NewRunRecord {
    pub fn new(
        capability_id: impl Into<String>,
        capability_title: impl Into<String>,
        privilege: PrivilegeLevel,
        status: ExecutionStatus,
    ) -> Self {
        Self {
            capability_id: capability_id.into(),
            capability_title: capability_title.into(),
            privilege,
            arguments: BTreeMap::new(),
            duration_ms: 0,
            exit_code: None,
            status,
            output: None,
            summary: None,
        }
    }

    pub fn with_arguments(mut self, arguments: BTreeMap<String, String>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_exit_code(mut self, exit_code: Option<i32>) -> Self {
        self.exit_code = exit_code;
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }
}

/// A persisted, chained audit entry. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    /// Position in the chain, starting at 1.
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub capability_id: String,
    pub capability_title: String,
    pub privilege: PrivilegeLevel,
    pub arguments: BTreeMap<String, String>,
    pub duration_ms: u64,
    pub exit_code: Option<i32>,
    pub status: ExecutionStatus,
    pub output_size: u64,
    pub output_path: Option<String>,
    pub summary: Option<String>,
    pub previous_hash: String,
    pub hash: String,
}

impl RunRecord {
    /// Hash this record's content should have.
    pub fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        let mut field = |bytes: &[u8]| {
            hasher.update((bytes.len() as u64).to_be_bytes());
            hasher.update(bytes);
        };

        field(self.id.to_string().as_bytes());
        field(format_timestamp(&self.timestamp).as_bytes());
        field(self.capability_id.as_bytes());
        field(self.capability_title.as_bytes());
        field(self.privilege.as_str().as_bytes());
        field(&(self.arguments.len() as u64).to_be_bytes());
        for (name, value) in &self.arguments {
            field(name.as_bytes());
            field(value.as_bytes());
        }
        field(self.duration_ms.to_string().as_bytes());
        field(optional(self.exit_code.map(|c| c.to_string())).as_bytes());
        field(self.status.as_str().as_bytes());
        field(self.output_size.to_string().as_bytes());
        field(optional(self.output_path.clone()).as_bytes());
        field(optional(self.summary.clone()).as_bytes());
        field(self.previous_hash.as_bytes());

        hex::encode(hasher.finalize())
    }

    /// Check the stored hash against the content.
    pub fn verify(&self) -> Result<()> {
        let expected = self.compute_hash();
        if expected != self.hash {
            return Err(AuditError::IntegrityViolation {
                record_id: self.id,
                expected,
                found: self.hash.clone(),
            });
        }
        Ok(())
    }

    /// Check that this record follows `previous` (or the genesis sentinel).
    pub fn verify_link(&self, previous: Option<&RunRecord>) -> Result<()> {
        let expected = previous.map_or(GENESIS_HASH, |p| p.hash.as_str());
        if self.previous_hash != expected {
            return Err(AuditError::ChainBroken {
                record_id: self.id,
                expected: expected.to_string(),
                found: self.previous_hash.clone(),
            });
        }
        Ok(())
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Presence-tagged encoding so `None` and `Some("")` hash differently.
fn optional(value: Option<String>) -> String {
    match value {
        Some(v) => format!("1{v}"),
        None => "0".to_string(),
    }
}

/// Timestamps are stored and hashed at microsecond precision in UTC.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AuditError::InvalidData(format!("bad timestamp '{value}': {e}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Chain verification
// ─────────────────────────────────────────────────────────────────────────────

/// Result of walking the whole chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    pub total_records: u64,
    /// Hash of the newest record, or the genesis sentinel when empty.
    pub head_hash: String,
    /// First problem found, as a message. `None` when the chain verifies.
    pub violation: Option<String>,
    pub first_bad_record: Option<i64>,
}

impl ChainReport {
    pub fn is_valid(&self) -> bool {
        self.violation.is_none()
    }
}

/// Verify content hashes and links across an ordered run of records.
///
/// The first record is checked against `anchor` (its predecessor's hash),
/// or against the genesis sentinel when it is record 1.
pub fn verify_sequence(records: &[RunRecord], anchor: Option<&str>) -> Result<()> {
    let mut previous: Option<&RunRecord> = None;
    for record in records {
        record.verify()?;
        match (previous, anchor) {
            (Some(prev), _) => record.verify_link(Some(prev))?,
            (None, Some(expected)) if record.previous_hash != expected => {
                return Err(AuditError::ChainBroken {
                    record_id: record.id,
                    expected: expected.to_string(),
                    found: record.previous_hash.clone(),
                });
            }
            (None, None) if record.id == 1 => record.verify_link(None)?,
            (None, _) => {}
        }
        previous = Some(record);
    }
    Ok(())
}
