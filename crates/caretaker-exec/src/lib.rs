//! Capability execution for Caretaker.
//!
//! Every capability goes through the same pipeline:
//!
//! 1. **Route**: the [`ExecutionRouter`] picks the executor for the
//!    capability's privilege level. Each executor refuses any other level.
//! 2. **Preflight**: the [`PreflightEngine`] checks privilege and declared
//!    conditions, and reports every failure at once.
//! 3. **Interpolate**: arguments are substituted into the command template
//!    as whole argv entries. There is no shell.
//! 4. **Run**: user and automation capabilities spawn a child process with a
//!    timeout; elevated ones are sent to the privileged helper.
//! 5. **Parse and audit**: output is parsed and one record is appended to the
//!    audit log. An audit failure is logged and never hides the result.

pub mod elevated;
pub mod error;
pub mod executor;
pub mod interpolate;
pub mod parser;
pub mod preflight;
pub mod probe;
pub mod router;
pub mod runner;
pub mod user;

pub use caretaker_audit::ExecutionStatus;
pub use elevated::ElevatedExecutor;
pub use error::{ExecError, Result};
pub use executor::{ExecutionCore, ExecutionResult, Executor};
pub use interpolate::{interpolate, ResolvedCommand};
pub use parser::{parse_output, ParsedOutput};
pub use preflight::{FailedCheck, MissingPermission, PreflightEngine, PreflightResult};
pub use probe::{RunningApp, SipStatus, SysinfoProbe, SystemProbe};
pub use router::ExecutionRouter;
pub use runner::{ProcessOutput, ProcessRunner};
pub use user::{AutomationExecutor, UserExecutor};
