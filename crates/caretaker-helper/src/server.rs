//! Helper side of the socket: caller authentication and program execution.
//!
//! The server runs as root. Each connection is checked against a
//! [`CallerPolicy`] using the peer credentials of the socket, must open with
//! a `hello`, and may then issue `execute` and `ping` requests. Programs are
//! spawned directly with a fixed environment; nothing goes through a shell.

use std::collections::BTreeSet;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::{UnixListener, UnixStream};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::allowlist::Allowlist;
use crate::protocol::{
    decode_line, encode_line, ErrorCode, ExecuteRequest, ExecutedOutput, HelperRequest,
    HelperResponse, RequestEnvelope, ResponseEnvelope, PROTOCOL_VERSION,
};

/// Environment `PATH` given to spawned programs.
const SAFE_PATH: &str = "/usr/bin:/bin:/usr/sbin:/sbin";

// ─────────────────────────────────────────────────────────────────────────────
// Caller authentication
// ─────────────────────────────────────────────────────────────────────────────

/// Who is on the other end of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub uid: u32,
    pub pid: Option<i32>,
    /// Executable of the peer process, when it could be resolved.
    pub executable: Option<PathBuf>,
}

impl CallerIdentity {
    /// Read peer credentials from a connected stream.
    pub fn from_stream(stream: &UnixStream) -> io::Result<Self> {
        let cred = stream.peer_cred()?;
        let pid = cred.pid();
        let executable = pid
            .and_then(|p| u32::try_from(p).ok())
            .and_then(executable_of);
        Ok(Self {
            uid: cred.uid(),
            pid,
            executable,
        })
    }
}

fn executable_of(pid: u32) -> Option<PathBuf> {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::nothing().with_exe(UpdateKind::Always),
    );
    system
        .process(pid)
        .and_then(|p| p.exe())
        .map(Path::to_path_buf)
}

/// Which callers may use the helper.
///
/// A caller must match an allowed uid. When any executables are listed, the
/// caller's executable must also be one of them.
#[derive(Debug, Clone, Default)]
pub struct CallerPolicy {
    allowed_uids: BTreeSet<u32>,
    allowed_executables: Vec<PathBuf>,
}

impl CallerPolicy {
    /// A policy that admits nobody.
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a user id.
    pub fn allow_uid(mut self, uid: u32) -> Self {
        self.allowed_uids.insert(uid);
        self
    }

    /// Require the caller to be this executable (may be called repeatedly).
    pub fn allow_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.allowed_executables.push(path.into());
        self
    }

    /// Decide whether a caller may proceed.
    pub fn authorize(&self, caller: &CallerIdentity) -> Result<(), String> {
        if !self.allowed_uids.contains(&caller.uid) {
            return Err(format!("uid {} is not permitted", caller.uid));
        }
        if self.allowed_executables.is_empty() {
            return Ok(());
        }
        let Some(exe) = caller.executable.as_deref() else {
            return Err("caller executable could not be resolved".to_string());
        };
        let exe = exe.canonicalize().unwrap_or_else(|_| exe.to_path_buf());
        let permitted = self.allowed_executables.iter().any(|allowed| {
            allowed
                .canonicalize()
                .map(|a| a == exe)
                .unwrap_or_else(|_| allowed == &exe)
        });
        if permitted {
            Ok(())
        } else {
            Err(format!("executable {} is not permitted", exe.display()))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server
// ─────────────────────────────────────────────────────────────────────────────

/// The privileged request handler.
#[derive(Debug)]
pub struct HelperServer {
    policy: CallerPolicy,
    allowlist: Allowlist,
    max_output_bytes: usize,
    version: String,
}

/// Per-connection protocol state.
#[derive(Debug, Default)]
pub struct Session {
    handshaken: bool,
}

impl HelperServer {
    /// Create a server.
    pub fn new(policy: CallerPolicy, allowlist: Allowlist) -> Self {
        Self {
            policy,
            allowlist,
            max_output_bytes: caretaker_config::defaults::MAX_OUTPUT_BYTES,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Cap captured stdout/stderr.
    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    /// Bind the listening socket, replacing a stale one.
    ///
    /// The socket is world-connectable; access control happens per connection.
    pub fn bind(path: &Path) -> io::Result<UnixListener> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "Removed stale helper socket"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        let listener = UnixListener::bind(path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666))?;
        }
        info!(path = %path.display(), "Helper listening");
        Ok(listener)
    }

    /// Accept connections until `shutdown` resolves.
    pub async fn serve<F>(self: Arc<Self>, listener: UnixListener, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Helper shutting down");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let server = Arc::clone(&self);
                        tokio::spawn(async move {
                            if let Err(e) = server.handle_connection(stream).await {
                                warn!(error = %e, "Helper connection ended with error");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "Failed to accept helper connection"),
                }
            }
        }
    }

    async fn handle_connection(&self, stream: UnixStream) -> io::Result<()> {
        let caller = CallerIdentity::from_stream(&stream)?;
        let (reader, mut writer) = stream.into_split();

        if let Err(reason) = self.policy.authorize(&caller) {
            warn!(uid = caller.uid, pid = ?caller.pid, reason = %reason, "Rejected helper caller");
            let reply = ResponseEnvelope::new(
                0,
                HelperResponse::error(ErrorCode::UnauthorizedCaller, reason),
            );
            write_envelope(&mut writer, &reply).await?;
            return Ok(());
        }
        debug!(uid = caller.uid, executable = ?caller.executable, "Helper caller accepted");

        let mut lines = BufReader::new(reader).lines();
        let mut session = Session::default();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let (reply, close) = match decode_line::<RequestEnvelope>(&line) {
                Ok(envelope) => {
                    let reply = self.handle_request(&mut session, envelope).await;
                    let close = matches!(
                        reply.response,
                        HelperResponse::Error {
                            code: ErrorCode::ProtocolMismatch,
                            ..
                        }
                    );
                    (reply, close)
                }
                Err(e) => (
                    ResponseEnvelope::new(
                        salvage_id(&line),
                        HelperResponse::error(ErrorCode::BadRequest, e.to_string()),
                    ),
                    false,
                ),
            };
            write_envelope(&mut writer, &reply).await?;
            if close {
                break;
            }
        }
        Ok(())
    }

    /// Answer one request within a connection's session.
    pub async fn handle_request(
        &self,
        session: &mut Session,
        envelope: RequestEnvelope,
    ) -> ResponseEnvelope {
        let id = envelope.id;
        if envelope.protocol_version != PROTOCOL_VERSION {
            return ResponseEnvelope::new(
                id,
                HelperResponse::error(
                    ErrorCode::ProtocolMismatch,
                    format!(
                        "helper speaks protocol {PROTOCOL_VERSION}, request used {}",
                        envelope.protocol_version
                    ),
                ),
            );
        }

        let response = match envelope.request {
            HelperRequest::Hello { client_version } => {
                debug!(client_version = %client_version, "Helper handshake");
                session.handshaken = true;
                HelperResponse::Hello {
                    helper_version: self.version.clone(),
                    protocol_version_supported: PROTOCOL_VERSION,
                }
            }
            _ if !session.handshaken => {
                HelperResponse::error(ErrorCode::BadRequest, "hello must be sent first")
            }
            HelperRequest::Ping => HelperResponse::Pong,
            HelperRequest::Execute(request) => self.execute(request).await,
        };
        ResponseEnvelope::new(id, response)
    }

    async fn execute(&self, request: ExecuteRequest) -> HelperResponse {
        if let Err(violation) = self.allowlist.check(&request.program, &request.args) {
            warn!(program = %request.program, reason = %violation, "Refused helper request");
            return HelperResponse::error(ErrorCode::NotAllowlisted, violation.to_string());
        }
        if request.timeout_secs == 0 {
            return HelperResponse::error(ErrorCode::BadRequest, "timeout_secs must be positive");
        }

        info!(program = %request.program, args = ?request.args, "Helper executing");

        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .env_clear()
            .env("PATH", SAFE_PATH)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &request.working_dir {
            cmd.current_dir(dir);
        }

        let started = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return HelperResponse::error(
                    ErrorCode::SpawnFailed,
                    format!("{}: {e}", request.program),
                );
            }
        };
        let mut stdout = OutputTap::spawn(child.stdout.take(), self.max_output_bytes);
        let mut stderr = OutputTap::spawn(child.stderr.take(), self.max_output_bytes);

        let limit = Duration::from_secs(request.timeout_secs);
        let finished = timeout(limit, async {
            let status = child.wait().await;
            stdout.closed().await;
            stderr.closed().await;
            status
        })
        .await;

        match finished {
            Ok(Ok(status)) => HelperResponse::Executed(ExecutedOutput {
                exit_code: status.code(),
                stdout: stdout.into_string(),
                stderr: stderr.into_string(),
                timed_out: false,
                duration_ms: elapsed_ms(started),
            }),
            Ok(Err(e)) => HelperResponse::error(ErrorCode::SpawnFailed, e.to_string()),
            Err(_) => {
                warn!(program = %request.program, ?limit, "Helper program timed out");
                if let Err(e) = child.start_kill() {
                    warn!(program = %request.program, error = %e, "Failed to kill helper program");
                }
                let _ = child.wait().await;
                let _ = timeout(DRAIN_GRACE, async {
                    stdout.closed().await;
                    stderr.closed().await;
                })
                .await;

                let mut stderr = stderr.into_string();
                if !stderr.is_empty() && !stderr.ends_with('\n') {
                    stderr.push('\n');
                }
                stderr.push_str(&format!("killed after {limit:?} timeout"));
                HelperResponse::Executed(ExecutedOutput {
                    exit_code: None,
                    stdout: stdout.into_string(),
                    stderr,
                    timed_out: true,
                    duration_ms: elapsed_ms(started),
                })
            }
        }
    }
}

/// How long to keep reading after a timed-out program was killed.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// Reads one pipe of a child on a separate task into a capped buffer.
struct OutputTap {
    bytes: Arc<Mutex<Vec<u8>>>,
    reader: JoinHandle<()>,
    closed: bool,
}

impl OutputTap {
    fn spawn<R>(pipe: Option<R>, max: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let bytes = Arc::new(Mutex::new(Vec::new()));
        let sink = bytes.clone();
        let reader = tokio::spawn(async move {
            let Some(mut pipe) = pipe else {
                return;
            };
            let mut chunk = [0u8; 8192];
            while let Ok(n) = pipe.read(&mut chunk).await {
                if n == 0 {
                    break;
                }
                let mut bytes = sink.lock();
                let room = max.saturating_sub(bytes.len());
                bytes.extend_from_slice(&chunk[..n.min(room)]);
            }
        });
        Self {
            bytes,
            reader,
            closed: false,
        }
    }

    async fn closed(&mut self) {
        if !self.closed {
            let _ = (&mut self.reader).await;
            self.closed = true;
        }
    }

    fn into_string(self) -> String {
        self.reader.abort();
        String::from_utf8_lossy(&self.bytes.lock()).into_owned()
    }
}

async fn write_envelope<W>(writer: &mut W, envelope: &ResponseEnvelope) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = encode_line(envelope).map_err(io::Error::other)?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

/// Best-effort id extraction from a request that failed to decode.
fn salvage_id(line: &str) -> u64 {
    serde_json::from_str::<serde_json::Value>(line)
        .ok()
        .and_then(|v| v.get("id").and_then(serde_json::Value::as_u64))
        .unwrap_or(0)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
