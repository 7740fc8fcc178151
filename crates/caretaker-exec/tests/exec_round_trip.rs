//! End-to-end routing, execution and auditing against a fixture catalog.

#![cfg(unix)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use caretaker_audit::{AuditStore, ExecutionStatus};
use caretaker_catalog::{CapabilityCatalog, CheckType, PrivilegeLevel};
use caretaker_exec::{
    ElevatedExecutor, ExecError, ExecutionCore, ExecutionRouter, Executor, PreflightEngine,
    SysinfoProbe, UserExecutor,
};
use caretaker_helper::{
    ExecuteRequest, ExecutedOutput, HelperChannel, HelperError, HelperStatusProvider,
    InstallStatus,
};
use caretaker_permissions::{PermissionCenter, UnsupportedControl};
use parking_lot::Mutex;

const CATALOG: &str = r#"{
    "version": "test",
    "capabilities": [
        {
            "id": "diag.mem",
            "title": "Memory pressure",
            "description": "Report free memory",
            "group": "diagnostics",
            "command": "echo \"System-wide memory free percentage: 42%\"",
            "timeout_secs": 5,
            "privilege": "user",
            "risk": "safe",
            "output_parser": "memory_pressure"
        },
        {
            "id": "logs.archive",
            "title": "Archive logs",
            "description": "Archive logs from a missing directory",
            "group": "logs",
            "command": "tar -czf /tmp/x.tgz /definitely/missing/path",
            "timeout_secs": 5,
            "privilege": "user",
            "risk": "moderate",
            "required_paths": ["/definitely/missing/path"]
        },
        {
            "id": "diag.fail",
            "title": "Failing check",
            "description": "Exits non-zero",
            "group": "diagnostics",
            "command": "sh -c \"echo broken >&2; exit 2\"",
            "timeout_secs": 5,
            "privilege": "user",
            "risk": "safe"
        },
        {
            "id": "diag.slow",
            "title": "Slow check",
            "description": "Never finishes in time",
            "group": "diagnostics",
            "command": "sleep 10",
            "timeout_secs": 1,
            "privilege": "user",
            "risk": "safe"
        },
        {
            "id": "process.signal",
            "title": "Signal process",
            "description": "Send a signal",
            "group": "processes",
            "command": "echo {pid}",
            "arguments": ["pid"],
            "argument_patterns": { "pid": "[1-9][0-9]*" },
            "timeout_secs": 5,
            "privilege": "user",
            "risk": "moderate"
        },
        {
            "id": "memory.purge",
            "title": "Purge memory",
            "description": "Flush inactive memory",
            "group": "memory",
            "command": "/usr/sbin/purge",
            "timeout_secs": 30,
            "privilege": "elevated",
            "risk": "moderate"
        }
    ]
}"#;

struct FixedHelper(InstallStatus);

impl HelperStatusProvider for FixedHelper {
    fn helper_status(&self) -> InstallStatus {
        self.0.clone()
    }
}

#[derive(Default)]
struct RecordingChannel {
    requests: Mutex<Vec<ExecuteRequest>>,
    fail: bool,
}

#[async_trait]
impl HelperChannel for RecordingChannel {
    async fn execute(&self, request: ExecuteRequest) -> caretaker_helper::Result<ExecutedOutput> {
        self.requests.lock().push(request);
        if self.fail {
            return Err(HelperError::ConnectionFailed("socket closed".into()));
        }
        Ok(ExecutedOutput {
            exit_code: Some(0),
            stdout: "purged\n".into(),
            stderr: String::new(),
            timed_out: false,
            duration_ms: 120,
        })
    }
}

struct Harness {
    catalog: Arc<CapabilityCatalog>,
    core: Arc<ExecutionCore>,
    router: ExecutionRouter,
    audit: Arc<AuditStore>,
    channel: Arc<RecordingChannel>,
}

fn harness(helper: InstallStatus, failing_channel: bool) -> Harness {
    let catalog = Arc::new(CapabilityCatalog::from_json(CATALOG).unwrap());
    let status: Arc<dyn HelperStatusProvider> = Arc::new(FixedHelper(helper));
    let permissions = Arc::new(PermissionCenter::new(
        Arc::new(UnsupportedControl),
        status.clone(),
    ));
    let preflight = Arc::new(PreflightEngine::new(Arc::new(SysinfoProbe::new()), permissions));
    let audit = Arc::new(AuditStore::open_in_memory().unwrap());
    let core = Arc::new(ExecutionCore::new(preflight).with_audit(audit.clone()));
    let channel = Arc::new(RecordingChannel {
        fail: failing_channel,
        ..Default::default()
    });
    let router = ExecutionRouter::standard(catalog.clone(), core.clone(), channel.clone(), status);
    Harness {
        catalog,
        core,
        router,
        audit,
        channel,
    }
}

fn current() -> InstallStatus {
    InstallStatus::Current {
        version: "0.1.0".into(),
    }
}

#[tokio::test]
async fn diag_mem_succeeds_and_appends_one_record() {
    let h = harness(current(), false);

    let result = h.router.execute("diag.mem", &HashMap::new()).await.unwrap();
    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.exit_code, Some(0));
    let parsed = result.parsed.as_ref().unwrap();
    assert_eq!(parsed.data["free_percent"], 42);

    assert_eq!(h.audit.count().unwrap(), 1);
    let records = h.audit.fetch(Some("diag.mem"), 10, 0).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, ExecutionStatus::Success);
    assert_eq!(Some(records[0].id), result.audit_record_id);
    assert!(h.audit.verify_chain().unwrap().is_valid());
}

#[tokio::test]
async fn executors_only_accept_their_privilege() {
    let h = harness(current(), false);
    let user = UserExecutor::new(h.core.clone());
    let elevated = ElevatedExecutor::new(
        h.core.clone(),
        h.channel.clone(),
        Arc::new(FixedHelper(current())),
    );

    for cap in h.catalog.all() {
        match cap.privilege {
            PrivilegeLevel::Elevated => {
                assert!(!user.can_execute(cap));
                assert!(elevated.can_execute(cap));
            }
            PrivilegeLevel::User => {
                assert!(user.can_execute(cap));
                assert!(!elevated.can_execute(cap));
            }
            PrivilegeLevel::Automation => {}
        }
    }

    let purge = h.catalog.capability("memory.purge").unwrap();
    assert!(matches!(
        user.execute(purge, &HashMap::new()).await,
        Err(ExecError::PrivilegeMismatch { executor: "user", .. })
    ));
    assert!(h.channel.requests.lock().is_empty());
}

#[tokio::test]
async fn missing_required_path_refuses_before_running() {
    let h = harness(current(), false);

    let preflight = h.router.preflight("logs.archive").await.unwrap();
    assert!(!preflight.can_execute);
    assert!(preflight
        .failed_checks
        .iter()
        .any(|f| f.check.check_type == CheckType::PathExists
            && f.check.target == "/definitely/missing/path"));

    let err = h
        .router
        .execute("logs.archive", &HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::PreflightFailed(_)));
    assert_eq!(h.audit.count().unwrap(), 0);
}

#[tokio::test]
async fn failures_and_timeouts_are_results() {
    let h = harness(current(), false);

    let failed = h.router.execute("diag.fail", &HashMap::new()).await.unwrap();
    assert_eq!(failed.status, ExecutionStatus::Failed);
    assert_eq!(failed.exit_code, Some(2));
    assert!(failed.stderr.contains("broken"));

    let slow = h.router.execute("diag.slow", &HashMap::new()).await.unwrap();
    assert_eq!(slow.status, ExecutionStatus::TimedOut);

    let last = h.audit.last_error().unwrap().unwrap();
    assert_eq!(last.capability_id, "diag.slow");
    assert_eq!(last.status, ExecutionStatus::TimedOut);
}

#[tokio::test]
async fn arguments_are_validated() {
    let h = harness(current(), false);

    let missing = h.router.execute("process.signal", &HashMap::new()).await;
    assert!(matches!(missing, Err(ExecError::MissingArgument { .. })));

    let mut args = HashMap::new();
    args.insert("pid".to_string(), "4242".to_string());
    let ok = h.router.execute("process.signal", &args).await.unwrap();
    assert_eq!(ok.stdout.trim(), "4242");
    let record = &h.audit.fetch(Some("process.signal"), 1, 0).unwrap()[0];
    assert_eq!(record.arguments.get("pid").map(String::as_str), Some("4242"));

    args.insert("pid".to_string(), "-1".to_string());
    assert!(matches!(
        h.router.execute("process.signal", &args).await,
        Err(ExecError::RejectedArgument { .. })
    ));
    assert_eq!(h.audit.count().unwrap(), 1);

    args.insert("pid".to_string(), "4242".to_string());
    args.insert("signal".to_string(), "KILL".to_string());
    assert!(matches!(
        h.router.execute("process.signal", &args).await,
        Err(ExecError::UnexpectedArgument { .. })
    ));
}

#[tokio::test]
async fn elevated_goes_through_helper() {
    let h = harness(current(), false);
    let result = h.router.execute("memory.purge", &HashMap::new()).await.unwrap();
    assert!(result.is_success());
    assert_eq!(result.stdout, "purged\n");

    let requests = h.channel.requests.lock();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].program, "/usr/sbin/purge");
    assert_eq!(requests[0].timeout_secs, 30);
}

#[tokio::test]
async fn helper_not_installed_fails_fast() {
    let h = harness(InstallStatus::NotInstalled, false);
    let err = h
        .router
        .execute("memory.purge", &HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::Helper(HelperError::NotInstalled)));
    assert!(err.recovery_suggestion().unwrap().contains("helper install"));
    assert!(h.channel.requests.lock().is_empty());
}

#[tokio::test]
async fn helper_outdated_is_distinct() {
    let h = harness(
        InstallStatus::Outdated {
            installed: "0.0.1".into(),
            required: "0.1.0".into(),
        },
        false,
    );
    let err = h
        .router
        .execute("memory.purge", &HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ExecError::Helper(HelperError::Outdated { ref installed, .. }) if installed == "0.0.1"
    ));
}

#[tokio::test]
async fn helper_connection_failure_is_audited_not_retried() {
    let h = harness(current(), true);
    let err = h
        .router
        .execute("memory.purge", &HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ExecError::Helper(HelperError::ConnectionFailed(_))));
    assert_eq!(h.channel.requests.lock().len(), 1);

    let last = h.audit.last_error().unwrap().unwrap();
    assert_eq!(last.capability_id, "memory.purge");
    assert_eq!(last.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn unknown_and_unavailable_catalog() {
    let h = harness(current(), false);
    assert!(matches!(
        h.router.execute("nope", &HashMap::new()).await,
        Err(ExecError::UnknownCapability(_))
    ));

    let broken = Arc::new(CapabilityCatalog::from_json("{").map_or_else(
        CapabilityCatalog::degraded,
        |c| c,
    ));
    let router = ExecutionRouter::new(broken, h.core.clone());
    assert!(matches!(
        router.execute("diag.mem", &HashMap::new()).await,
        Err(ExecError::CatalogUnavailable(_))
    ));
}
