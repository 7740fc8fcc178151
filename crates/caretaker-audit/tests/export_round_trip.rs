//! Export the chain, re-read it, and verify it offline.

use std::collections::BTreeMap;

use caretaker_audit::{AuditExport, AuditStore, ExecutionStatus, NewRunRecord, GENESIS_HASH};
use caretaker_catalog::PrivilegeLevel;
use chrono::{Duration, Utc};

fn record(cap: &str, status: ExecutionStatus, pid: &str) -> NewRunRecord {
    let mut args = BTreeMap::new();
    args.insert("pid".to_string(), pid.to_string());
    NewRunRecord::new(cap, "Terminate process", PrivilegeLevel::User, status)
        .with_arguments(args)
        .with_duration_ms(40)
        .with_exit_code(Some(0))
        .with_summary("{\"terminated\":true}")
}

#[test]
fn export_reproduces_ordered_chain() {
    let dir = tempfile::tempdir().unwrap();
    let store = AuditStore::open(dir.path().join("audit.db"))
        .unwrap()
        .with_output_dir(dir.path().join("output"));

    let mut saved = Vec::new();
    for (i, status) in [
        ExecutionStatus::Success,
        ExecutionStatus::Failed,
        ExecutionStatus::TimedOut,
        ExecutionStatus::Success,
    ]
    .into_iter()
    .enumerate()
    {
        saved.push(store.save(record("proc.kill", status, &i.to_string())).unwrap());
    }

    let from = Utc::now() - Duration::hours(1);
    let to = Utc::now() + Duration::hours(1);
    let path = store.export_logs(from, to, dir.path()).unwrap();
    assert!(path.starts_with(dir.path()));

    let export = AuditExport::read(&path).unwrap();
    assert_eq!(export.records, saved);
    export.verify().unwrap();

    assert_eq!(export.records[0].previous_hash, GENESIS_HASH);
    for pair in export.records.windows(2) {
        assert_eq!(pair[1].previous_hash, pair[0].hash);
    }
}

#[test]
fn export_to_explicit_file_and_empty_range() {
    let dir = tempfile::tempdir().unwrap();
    let store = AuditStore::open(dir.path().join("audit.db")).unwrap();
    store
        .save(record("diag.mem", ExecutionStatus::Success, "1"))
        .unwrap();

    let dest = dir.path().join("out.json");
    let past = Utc::now() - Duration::days(30);
    let path = store
        .export_logs(past, past + Duration::days(1), &dest)
        .unwrap();
    assert_eq!(path, dest);
    let export = AuditExport::read(&path).unwrap();
    assert!(export.records.is_empty());
    export.verify().unwrap();
}
