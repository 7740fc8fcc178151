//! The executor contract and the pipeline shared by every lane.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use caretaker_audit::{AuditStore, ExecutionStatus, NewRunRecord};
use caretaker_catalog::{Capability, PrivilegeLevel};
use caretaker_config::ExecutorConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ExecError, Result};
use crate::interpolate::{interpolate, ResolvedCommand};
use crate::parser::{parse_output, ParsedOutput};
use crate::preflight::PreflightEngine;
use crate::runner::ProcessOutput;

// ─────────────────────────────────────────────────────────────────────────────
// Result
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of a capability that was dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub capability_id: String,
    pub status: ExecutionStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    /// Output exceeded the capture limit.
    pub truncated: bool,
    /// Rendered argv, for display.
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed: Option<ParsedOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
    /// Id of the audit record, when the audit write succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_record_id: Option<i64>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Parsed summary, falling back to the first output line.
    pub fn summary(&self) -> String {
        match &self.parsed {
            Some(parsed) => parsed.summary.clone(),
            None => self
                .stdout
                .lines()
                .chain(self.stderr.lines())
                .find(|l| !l.trim().is_empty())
                .unwrap_or_default()
                .trim()
                .to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Executor trait
// ─────────────────────────────────────────────────────────────────────────────

/// Runs capabilities of exactly one privilege level.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Short name used in errors and logs.
    fn name(&self) -> &'static str;

    /// The privilege level this executor serves.
    fn lane(&self) -> PrivilegeLevel;

    fn can_execute(&self, capability: &Capability) -> bool {
        capability.privilege == self.lane()
    }

    async fn execute(
        &self,
        capability: &Capability,
        arguments: &HashMap<String, String>,
    ) -> Result<ExecutionResult>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared pipeline
// ─────────────────────────────────────────────────────────────────────────────

/// Preflight, interpolation, parsing and auditing, shared by all executors.
pub struct ExecutionCore {
    preflight: Arc<PreflightEngine>,
    audit: Option<Arc<AuditStore>>,
    config: ExecutorConfig,
}

impl ExecutionCore {
    pub fn new(preflight: Arc<PreflightEngine>) -> Self {
        Self {
            preflight,
            audit: None,
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditStore>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn preflight(&self) -> &Arc<PreflightEngine> {
        &self.preflight
    }

    pub fn max_output_bytes(&self) -> usize {
        self.config.max_output_bytes
    }

    /// Declared timeout, or the configured default when it is zero.
    pub fn timeout_for(&self, capability: &Capability) -> Duration {
        if capability.timeout_secs == 0 {
            Duration::from_secs(self.config.default_timeout_secs)
        } else {
            capability.timeout()
        }
    }

    /// Refuse the wrong lane, run preflight, then interpolate.
    pub async fn prepare(
        &self,
        executor: &dyn Executor,
        capability: &Capability,
        arguments: &HashMap<String, String>,
    ) -> Result<ResolvedCommand> {
        if !executor.can_execute(capability) {
            return Err(ExecError::PrivilegeMismatch {
                capability: capability.id.clone(),
                privilege: capability.privilege,
                executor: executor.name(),
            });
        }

        let preflight = self.preflight.validate(capability, executor.lane()).await;
        if !preflight.can_execute {
            info!(
                capability = %capability.id,
                reasons = %preflight.describe(),
                "Refusing capability after preflight"
            );
            return Err(ExecError::PreflightFailed(preflight));
        }

        interpolate(capability, arguments)
    }

    /// Parse, audit and build the result for a process that ran.
    pub fn finish(
        &self,
        capability: &Capability,
        arguments: &HashMap<String, String>,
        command: &ResolvedCommand,
        output: ProcessOutput,
    ) -> ExecutionResult {
        let status = if output.timed_out {
            ExecutionStatus::TimedOut
        } else if output.exit_code == Some(0) {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Failed
        };

        let (parsed, parse_error) = if status.is_success() {
            match parse_output(
                capability.output_parser,
                capability.output_pattern.as_deref(),
                &output.stdout,
            ) {
                Ok(parsed) => (Some(parsed), None),
                Err(e) => {
                    warn!(capability = %capability.id, error = %e, "Output parser failed");
                    (None, Some(e))
                }
            }
        } else {
            (None, None)
        };

        let mut result = ExecutionResult {
            capability_id: capability.id.clone(),
            status,
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            duration_ms: output.duration.as_millis() as u64,
            truncated: output.truncated,
            command: command.display(),
            parsed,
            parse_error,
            audit_record_id: None,
        };
        result.audit_record_id = self.record(capability, arguments, &result);

        info!(
            capability = %capability.id,
            status = %result.status,
            duration_ms = result.duration_ms,
            "Capability finished"
        );
        result
    }

    /// Audit an attempt that was dispatched but failed before producing output.
    pub fn record_dispatch_failure(
        &self,
        capability: &Capability,
        arguments: &HashMap<String, String>,
        error: &ExecError,
        duration: Duration,
    ) {
        let Some(audit) = &self.audit else { return };
        let record = NewRunRecord::new(
            &capability.id,
            &capability.title,
            capability.privilege,
            ExecutionStatus::Failed,
        )
        .with_arguments(sorted(arguments))
        .with_duration_ms(duration.as_millis() as u64)
        .with_summary(error.to_string());
        if let Err(e) = audit.save(record) {
            warn!(capability = %capability.id, error = %e, "Failed to write audit record");
        }
    }

    /// Append the audit record. Failures are logged and never surface.
    fn record(
        &self,
        capability: &Capability,
        arguments: &HashMap<String, String>,
        result: &ExecutionResult,
    ) -> Option<i64> {
        let audit = self.audit.as_ref()?;
        let mut output = result.stdout.clone();
        if !result.stderr.is_empty() {
            output.push_str("\n--- stderr ---\n");
            output.push_str(&result.stderr);
        }
        let record = NewRunRecord::new(
            &capability.id,
            &capability.title,
            capability.privilege,
            result.status,
        )
        .with_arguments(sorted(arguments))
        .with_duration_ms(result.duration_ms)
        .with_exit_code(result.exit_code)
        .with_output(output)
        .with_summary(result.summary());

        match audit.save(record) {
            Ok(saved) => Some(saved.id),
            Err(e) => {
                warn!(capability = %capability.id, error = %e, "Failed to write audit record");
                None
            }
        }
    }
}

fn sorted(arguments: &HashMap<String, String>) -> BTreeMap<String, String> {
    arguments
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
