//! Audit log store backed by SQLite.
//!
//! Records are appended inside a single immediate transaction that reads the
//! current chain head, so two writers can never link to the same
//! predecessor. Triggers reject `UPDATE` and `DELETE` on the records table.

use std::path::{Path, PathBuf};

use caretaker_catalog::PrivilegeLevel;
use caretaker_config::CaretakerConfig;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::error::{AuditError, Result};
use crate::export::{AuditExport, EXPORT_FORMAT_VERSION};
use crate::record::{
    format_timestamp, parse_timestamp, verify_sequence, ChainReport, NewRunRecord, RunRecord,
    GENESIS_HASH,
};

// ─────────────────────────────────────────────────────────────────────────────
// Schema Version
// ─────────────────────────────────────────────────────────────────────────────

/// Current schema version for migrations.
const SCHEMA_VERSION: i32 = 2;

const SELECT_COLUMNS: &str = "id, timestamp, capability_id, capability_title, privilege, \
     arguments, duration_ms, exit_code, status, output_size, output_path, summary, \
     previous_hash, hash";

// ─────────────────────────────────────────────────────────────────────────────
// Audit Store
// ─────────────────────────────────────────────────────────────────────────────

/// Append-only, hash-chained store of execution attempts.
pub struct AuditStore {
    conn: Mutex<Connection>,
    /// Where captured output files go. Output is dropped when unset.
    output_dir: Option<PathBuf>,
}

impl std::fmt::Debug for AuditStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditStore")
            .field("output_dir", &self.output_dir)
            .finish_non_exhaustive()
    }
}

impl AuditStore {
    /// Open or create an audit database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )?;

        let store = Self {
            conn: Mutex::new(conn),
            output_dir: None,
        };
        store.initialize()?;

        info!("Audit store opened at {:?}", path);
        Ok(store)
    }

    /// Create an in-memory store (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            output_dir: None,
        };
        store.initialize()?;
        Ok(store)
    }

    /// Open the store at the configured database and output locations.
    pub fn from_config(config: &CaretakerConfig) -> Result<Self> {
        Ok(Self::open(config.audit_db_path())?.with_output_dir(config.audit_output_dir()))
    }

    /// Directory that receives `<record id>.log` output files.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let current_version: i32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if current_version >= SCHEMA_VERSION {
            debug!("Audit schema up to date (version {})", current_version);
            return Ok(());
        }

        info!(
            "Migrating audit schema from version {} to {}",
            current_version, SCHEMA_VERSION
        );

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS run_records (
                id INTEGER PRIMARY KEY,
                timestamp TEXT NOT NULL,
                capability_id TEXT NOT NULL,
                capability_title TEXT NOT NULL,
                privilege TEXT NOT NULL,
                arguments TEXT NOT NULL DEFAULT '{}',
                duration_ms INTEGER NOT NULL,
                exit_code INTEGER,
                status TEXT NOT NULL,
                output_size INTEGER NOT NULL DEFAULT 0,
                output_path TEXT,
                summary TEXT,
                previous_hash TEXT NOT NULL,
                hash TEXT NOT NULL UNIQUE
            );

            CREATE INDEX IF NOT EXISTS idx_run_records_capability
                ON run_records(capability_id);

            CREATE INDEX IF NOT EXISTS idx_run_records_timestamp
                ON run_records(timestamp);
            "#,
        )?;

        if current_version < 2 {
            Self::migrate_v2(&conn)?;
        }

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        info!("Audit schema created (version {})", SCHEMA_VERSION);
        Ok(())
    }

    /// Migration v2: make the records table append-only.
    fn migrate_v2(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TRIGGER IF NOT EXISTS run_records_no_update
                BEFORE UPDATE ON run_records
                BEGIN SELECT RAISE(ABORT, 'audit records are append-only'); END;

            CREATE TRIGGER IF NOT EXISTS run_records_no_delete
                BEFORE DELETE ON run_records
                BEGIN SELECT RAISE(ABORT, 'audit records are append-only'); END;
            "#,
        )?;
        Ok(())
    }

    // ── Writes ──────────────────────────────────────────────────────────────

    /// Append a record, linking it to the current chain head.
    pub fn save(&self, new: NewRunRecord) -> Result<RunRecord> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let head: Option<(i64, String)> = tx
            .query_row(
                "SELECT id, hash FROM run_records ORDER BY id DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (id, previous_hash) = match head {
            Some((last_id, hash)) => (last_id + 1, hash),
            None => (1, GENESIS_HASH.to_string()),
        };

        let output_size = new.output.as_ref().map_or(0, |o| o.len() as u64);
        let output_path = match &new.output {
            Some(output) if !output.is_empty() => self.write_output(id, output),
            _ => None,
        };

        let mut record = RunRecord {
            id,
            timestamp: Utc::now().trunc_subsecs(6),
            capability_id: new.capability_id,
            capability_title: new.capability_title,
            privilege: new.privilege,
            arguments: new.arguments,
            duration_ms: new.duration_ms,
            exit_code: new.exit_code,
            status: new.status,
            output_size,
            output_path,
            summary: new.summary,
            previous_hash,
            hash: String::new(),
        };
        record.hash = record.compute_hash();

        tx.execute(
            r#"
            INSERT INTO run_records (
                id, timestamp, capability_id, capability_title, privilege, arguments,
                duration_ms, exit_code, status, output_size, output_path, summary,
                previous_hash, hash
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            "#,
            params![
                record.id,
                format_timestamp(&record.timestamp),
                record.capability_id,
                record.capability_title,
                record.privilege.as_str(),
                serde_json::to_string(&record.arguments)?,
                record.duration_ms as i64,
                record.exit_code,
                record.status.as_str(),
                record.output_size as i64,
                record.output_path,
                record.summary,
                record.previous_hash,
                record.hash,
            ],
        )?;
        tx.commit()?;

        debug!(
            id = record.id,
            capability = %record.capability_id,
            status = %record.status,
            "Audit record saved"
        );
        Ok(record)
    }

    /// Write captured output for a record to `<output_dir>/<id>.log`.
    pub fn store_output(&self, record_id: i64, output: &str) -> Result<PathBuf> {
        let dir = self
            .output_dir
            .as_ref()
            .ok_or_else(|| AuditError::InvalidData("no output directory configured".into()))?;
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{record_id}.log"));
        std::fs::write(&path, output)?;
        Ok(path)
    }

    fn write_output(&self, id: i64, output: &str) -> Option<String> {
        self.output_dir.as_ref()?;
        match self.store_output(id, output) {
            Ok(path) => Some(path.display().to_string()),
            Err(e) => {
                warn!(id, error = %e, "Failed to store captured output");
                None
            }
        }
    }

    // ── Reads ───────────────────────────────────────────────────────────────

    /// Records newest first, optionally for one capability.
    pub fn fetch(
        &self,
        capability_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<RunRecord>> {
        let sql = match capability_id {
            Some(_) => format!(
                "SELECT {SELECT_COLUMNS} FROM run_records WHERE capability_id = ?1 \
                 ORDER BY id DESC LIMIT ?2 OFFSET ?3"
            ),
            None => format!(
                "SELECT {SELECT_COLUMNS} FROM run_records ORDER BY id DESC LIMIT ?1 OFFSET ?2"
            ),
        };
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = match capability_id {
            Some(cap) => stmt
                .query_map(params![cap, limit as i64, offset as i64], RawRecord::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
            None => stmt
                .query_map(params![limit as i64, offset as i64], RawRecord::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?,
        };
        verified(rows)
    }

    /// Records from the last `hours` hours, newest first.
    pub fn fetch_recent(&self, hours: u32) -> Result<Vec<RunRecord>> {
        let since = Utc::now() - Duration::hours(i64::from(hours));
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM run_records WHERE timestamp >= ?1 ORDER BY id DESC"
        ))?;
        let rows = stmt
            .query_map(params![format_timestamp(&since)], RawRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        verified(rows)
    }

    /// Most recent record whose status is not `success`.
    pub fn last_error(&self) -> Result<Option<RunRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM run_records WHERE status != 'success' \
             ORDER BY id DESC LIMIT 1"
        ))?;
        let rows = stmt
            .query_map([], RawRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(verified(rows)?.into_iter().next())
    }

    /// Number of records.
    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM run_records", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// All records oldest first, without verification.
    fn all_ascending(&self) -> Result<Vec<RunRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM run_records ORDER BY id ASC"
        ))?;
        let rows = stmt
            .query_map([], RawRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RawRecord::into_record).collect()
    }

    // ── Integrity ───────────────────────────────────────────────────────────

    /// Walk the whole chain from the genesis sentinel.
    ///
    /// Problems are reported in the returned [`ChainReport`]; only database
    /// failures are errors.
    pub fn verify_chain(&self) -> Result<ChainReport> {
        let records = self.all_ascending()?;
        let head_hash = records
            .last()
            .map_or(GENESIS_HASH.to_string(), |r| r.hash.clone());
        let mut report = ChainReport {
            total_records: records.len() as u64,
            head_hash,
            violation: None,
            first_bad_record: None,
        };

        let mut previous: Option<&RunRecord> = None;
        for record in &records {
            if let Err(e) = record
                .verify()
                .and_then(|_| record.verify_link(previous))
            {
                warn!(record = record.id, error = %e, "Audit chain verification failed");
                report.violation = Some(e.to_string());
                report.first_bad_record = Some(record.id);
                break;
            }
            previous = Some(record);
        }

        if report.is_valid() {
            debug!(records = report.total_records, "Audit chain verified");
        }
        Ok(report)
    }

    /// Export records with `from <= timestamp <= to`, oldest first, as JSON.
    ///
    /// `dest` may be a file path or an existing directory. The chain is
    /// verified first; a broken chain is not exported.
    pub fn export_logs(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        dest: impl AsRef<Path>,
    ) -> Result<PathBuf> {
        let all = self.all_ascending()?;
        verify_sequence(&all, None)?;

        let records: Vec<RunRecord> = all
            .into_iter()
            .filter(|r| r.timestamp >= from && r.timestamp <= to)
            .collect();

        let export = AuditExport {
            format_version: EXPORT_FORMAT_VERSION,
            exported_at: Utc::now(),
            from,
            to,
            records,
        };

        let dest = dest.as_ref();
        let path = if dest.is_dir() {
            dest.join(format!(
                "caretaker-audit-{}-{}.json",
                from.format("%Y%m%d%H%M%S"),
                to.format("%Y%m%d%H%M%S")
            ))
        } else {
            dest.to_path_buf()
        };
        export.write(&path)?;

        info!(
            records = export.records.len(),
            path = %path.display(),
            "Audit log exported"
        );
        Ok(path)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row mapping
// ─────────────────────────────────────────────────────────────────────────────

/// Column values as stored, before interpretation.
struct RawRecord {
    id: i64,
    timestamp: String,
    capability_id: String,
    capability_title: String,
    privilege: String,
    arguments: String,
    duration_ms: i64,
    exit_code: Option<i32>,
    status: String,
    output_size: i64,
    output_path: Option<String>,
    summary: Option<String>,
    previous_hash: String,
    hash: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            capability_id: row.get(2)?,
            capability_title: row.get(3)?,
            privilege: row.get(4)?,
            arguments: row.get(5)?,
            duration_ms: row.get(6)?,
            exit_code: row.get(7)?,
            status: row.get(8)?,
            output_size: row.get(9)?,
            output_path: row.get(10)?,
            summary: row.get(11)?,
            previous_hash: row.get(12)?,
            hash: row.get(13)?,
        })
    }

    fn into_record(self) -> Result<RunRecord> {
        let privilege: PrivilegeLevel = self
            .privilege
            .parse()
            .map_err(AuditError::InvalidData)?;
        Ok(RunRecord {
            id: self.id,
            timestamp: parse_timestamp(&self.timestamp)?,
            capability_id: self.capability_id,
            capability_title: self.capability_title,
            privilege,
            arguments: serde_json::from_str(&self.arguments)?,
            duration_ms: self.duration_ms.max(0) as u64,
            exit_code: self.exit_code,
            status: self.status.parse()?,
            output_size: self.output_size.max(0) as u64,
            output_path: self.output_path,
            summary: self.summary,
            previous_hash: self.previous_hash,
            hash: self.hash,
        })
    }
}

/// Convert rows and recompute each record's hash.
fn verified(rows: Vec<RawRecord>) -> Result<Vec<RunRecord>> {
    rows.into_iter()
        .map(|raw| {
            let record = raw.into_record()?;
            record.verify()?;
            Ok(record)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ExecutionStatus;
    use std::collections::BTreeMap;

    fn attempt(cap: &str, status: ExecutionStatus) -> NewRunRecord {
        NewRunRecord::new(cap, format!("{cap} title"), PrivilegeLevel::User, status)
            .with_duration_ms(5)
            .with_exit_code(Some(if status.is_success() { 0 } else { 1 }))
    }

    /// Bypass the append-only triggers to simulate tampering on disk.
    fn tamper(store: &AuditStore, sql: &str) {
        let conn = store.conn.lock();
        conn.execute_batch(&format!(
            "DROP TRIGGER run_records_no_update; DROP TRIGGER run_records_no_delete; {sql}"
        ))
        .unwrap();
    }

    #[test]
    fn test_save_links_records() {
        let store = AuditStore::open_in_memory().unwrap();
        let first = store.save(attempt("diag.mem", ExecutionStatus::Success)).unwrap();
        let second = store.save(attempt("diag.disk", ExecutionStatus::Failed)).unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(first.previous_hash, GENESIS_HASH);
        assert_eq!(second.previous_hash, first.hash);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_fetch_newest_first_and_filtered() {
        let store = AuditStore::open_in_memory().unwrap();
        for cap in ["a.one", "b.two", "a.one", "c.three"] {
            store.save(attempt(cap, ExecutionStatus::Success)).unwrap();
        }

        let all = store.fetch(None, 10, 0).unwrap();
        let ids: Vec<i64> = all.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![4, 3, 2, 1]);

        let page = store.fetch(None, 2, 1).unwrap();
        assert_eq!(page.iter().map(|r| r.id).collect::<Vec<_>>(), vec![3, 2]);

        let only_a = store.fetch(Some("a.one"), 10, 0).unwrap();
        assert_eq!(only_a.iter().map(|r| r.id).collect::<Vec<_>>(), vec![3, 1]);
    }

    #[test]
    fn test_fetch_returns_saved_record() {
        let store = AuditStore::open_in_memory().unwrap();
        let mut args = BTreeMap::new();
        args.insert("pid".to_string(), "123".to_string());
        let saved = store
            .save(
                attempt("proc.kill", ExecutionStatus::Success)
                    .with_arguments(args)
                    .with_summary("killed"),
            )
            .unwrap();
        let fetched = store.fetch(Some("proc.kill"), 1, 0).unwrap();
        assert_eq!(fetched, vec![saved]);
    }

    #[test]
    fn test_last_error() {
        let store = AuditStore::open_in_memory().unwrap();
        assert!(store.last_error().unwrap().is_none());
        store.save(attempt("a", ExecutionStatus::Failed)).unwrap();
        store.save(attempt("b", ExecutionStatus::TimedOut)).unwrap();
        store.save(attempt("c", ExecutionStatus::Success)).unwrap();

        let last = store.last_error().unwrap().unwrap();
        assert_eq!(last.capability_id, "b");
        assert_eq!(last.status, ExecutionStatus::TimedOut);
    }

    #[test]
    fn test_fetch_recent() {
        let store = AuditStore::open_in_memory().unwrap();
        store.save(attempt("a", ExecutionStatus::Success)).unwrap();
        store.save(attempt("b", ExecutionStatus::Success)).unwrap();
        assert_eq!(store.fetch_recent(1).unwrap().len(), 2);

        tamper(
            &store,
            "UPDATE run_records SET timestamp = '2020-01-01T00:00:00.000000Z' WHERE id = 1;",
        );
        let recent = store.fetch_recent(24).unwrap();
        assert_eq!(recent.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_records_are_append_only() {
        let store = AuditStore::open_in_memory().unwrap();
        store.save(attempt("a", ExecutionStatus::Success)).unwrap();
        let conn = store.conn.lock();
        assert!(conn.execute("DELETE FROM run_records", []).is_err());
        assert!(conn
            .execute("UPDATE run_records SET status = 'failed'", [])
            .is_err());
    }

    #[test]
    fn test_tampering_is_reported() {
        let store = AuditStore::open_in_memory().unwrap();
        for cap in ["a", "b", "c"] {
            store.save(attempt(cap, ExecutionStatus::Success)).unwrap();
        }
        assert!(store.verify_chain().unwrap().is_valid());

        tamper(&store, "UPDATE run_records SET duration_ms = 1 WHERE id = 2;");

        let report = store.verify_chain().unwrap();
        assert!(!report.is_valid());
        assert_eq!(report.first_bad_record, Some(2));
        assert!(matches!(
            store.fetch(None, 10, 0),
            Err(AuditError::IntegrityViolation { record_id: 2, .. })
        ));
        // Nothing was repaired.
        assert!(!store.verify_chain().unwrap().is_valid());
    }

    #[test]
    fn test_deleted_record_breaks_chain() {
        let store = AuditStore::open_in_memory().unwrap();
        for cap in ["a", "b", "c"] {
            store.save(attempt(cap, ExecutionStatus::Success)).unwrap();
        }
        tamper(&store, "DELETE FROM run_records WHERE id = 2;");

        let report = store.verify_chain().unwrap();
        assert_eq!(report.first_bad_record, Some(3));
        assert!(report.violation.unwrap().contains("Chain broken"));
    }

    #[test]
    fn test_output_written_to_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuditStore::open(dir.path().join("audit.db"))
            .unwrap()
            .with_output_dir(dir.path().join("output"));

        let record = store
            .save(attempt("diag.mem", ExecutionStatus::Success).with_output("free: 42%\n"))
            .unwrap();
        assert_eq!(record.output_size, 10);
        let path = PathBuf::from(record.output_path.unwrap());
        assert_eq!(path, dir.path().join("output").join("1.log"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "free: 42%\n");
    }

    #[test]
    fn test_reopen_keeps_chain() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("audit.db");
        let first = {
            let store = AuditStore::open(&db).unwrap();
            store.save(attempt("a", ExecutionStatus::Success)).unwrap()
        };
        let store = AuditStore::open(&db).unwrap();
        let second = store.save(attempt("b", ExecutionStatus::Success)).unwrap();
        assert_eq!(second.previous_hash, first.hash);
        assert!(store.verify_chain().unwrap().is_valid());
    }
}
