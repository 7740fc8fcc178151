//! Wire protocol between the app and the privileged helper.
//!
//! Each message is one JSON object on its own line. Every message carries the
//! protocol version and a request id; responses echo the id of the request
//! they answer.
//!
//! ```text
//! → {"protocol_version":1,"id":1,"type":"hello","client_version":"0.1.0"}
//! ← {"protocol_version":1,"id":1,"type":"hello","helper_version":"0.1.0","protocol_version_supported":1}
//! → {"protocol_version":1,"id":2,"type":"execute","program":"/usr/sbin/purge","args":[],"timeout_secs":60}
//! ← {"protocol_version":1,"id":2,"type":"executed","exit_code":0,"stdout":"","stderr":"","timed_out":false,"duration_ms":812}
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{HelperError, Result};

/// Current protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Upper bound on a single encoded line. Larger messages are rejected.
pub const MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────────────────────────────────────

/// Run one program. The helper decides independently whether it may.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Absolute path of the program.
    pub program: String,
    /// Arguments, passed verbatim as argv entries.
    #[serde(default)]
    pub args: Vec<String>,
    /// Seconds before the helper kills the program.
    pub timeout_secs: u64,
    /// Working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

/// Request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HelperRequest {
    /// Handshake; must be the first message on a connection.
    Hello { client_version: String },
    /// Run a program.
    Execute(ExecuteRequest),
    /// Liveness check.
    Ping,
}

/// A request with its envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub protocol_version: u32,
    pub id: u64,
    #[serde(flatten)]
    pub request: HelperRequest,
}

impl RequestEnvelope {
    /// Wrap a request at the current protocol version.
    pub fn new(id: u64, request: HelperRequest) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            id,
            request,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Responses
// ─────────────────────────────────────────────────────────────────────────────

/// Machine-readable reason for an error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotAllowlisted,
    UnauthorizedCaller,
    ProtocolMismatch,
    BadRequest,
    SpawnFailed,
}

/// Result of running a program in the helper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutedOutput {
    /// Exit code; `None` when killed by a signal or the timeout.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub duration_ms: u64,
}

/// Response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HelperResponse {
    /// Handshake reply.
    Hello {
        helper_version: String,
        /// Protocol version the helper speaks. Named apart from the envelope field.
        protocol_version_supported: u32,
    },
    /// Program finished, failed or timed out.
    Executed(ExecutedOutput),
    Pong,
    Error { code: ErrorCode, message: String },
}

impl HelperResponse {
    /// Create an error response.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}

/// A response with its envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub protocol_version: u32,
    pub id: u64,
    #[serde(flatten)]
    pub response: HelperResponse,
}

impl ResponseEnvelope {
    /// Wrap a response at the current protocol version.
    pub fn new(id: u64, response: HelperResponse) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            id,
            response,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Framing
// ─────────────────────────────────────────────────────────────────────────────

/// Encode a message as one newline-terminated line.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Decode one line into a message.
pub fn decode_line<T: for<'de> Deserialize<'de>>(line: &str) -> Result<T> {
    if line.len() > MAX_LINE_BYTES {
        return Err(HelperError::protocol(format!(
            "message of {} bytes exceeds the {} byte limit",
            line.len(),
            MAX_LINE_BYTES
        )));
    }
    serde_json::from_str(line.trim_end()).map_err(|e| HelperError::protocol(e.to_string()))
}
