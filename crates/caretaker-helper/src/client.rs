//! App side of the helper socket.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{HelperError, Result};
use crate::protocol::{
    decode_line, encode_line, ExecuteRequest, ExecutedOutput, HelperRequest, HelperResponse,
    RequestEnvelope, ResponseEnvelope, PROTOCOL_VERSION,
};

/// Time allowed for connect, handshake and ping.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

/// Extra time over the program timeout before giving up on a response.
const RESPONSE_GRACE: Duration = Duration::from_secs(5);

/// Something that can run a program with elevated privileges.
#[async_trait]
pub trait HelperChannel: Send + Sync {
    /// Run a program; a non-zero exit or timeout is an `Ok` result.
    async fn execute(&self, request: ExecuteRequest) -> Result<ExecutedOutput>;
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    helper_version: String,
}

/// Client holding a single connection to the helper.
///
/// Concurrent callers queue on the connection mutex. A failed connection is
/// dropped and reported; it is only re-established by the next request.
pub struct HelperClient {
    socket_path: PathBuf,
    client_version: String,
    next_id: AtomicU64,
    connection: Mutex<Option<Connection>>,
}

impl HelperClient {
    /// Create a client for a socket; no connection is made yet.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            next_id: AtomicU64::new(1),
            connection: Mutex::new(None),
        }
    }

    /// Socket this client talks to.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Connect and handshake if needed; returns the helper version.
    pub async fn connect(&self) -> Result<String> {
        let mut guard = self.connection.lock().await;
        let conn = self.ensure_connected(&mut guard).await?;
        Ok(conn.helper_version.clone())
    }

    /// Liveness check.
    pub async fn ping(&self) -> Result<()> {
        match self.request(HelperRequest::Ping, CONTROL_TIMEOUT).await? {
            HelperResponse::Pong => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn request(&self, request: HelperRequest, wait: Duration) -> Result<HelperResponse> {
        let mut guard = self.connection.lock().await;
        let conn = self.ensure_connected(&mut guard).await?;
        let id = self.next_id();
        match round_trip(conn, RequestEnvelope::new(id, request), wait).await {
            Ok(response) => Ok(response),
            Err(e) => {
                if matches!(e, HelperError::ConnectionFailed(_) | HelperError::Protocol(_)) {
                    *guard = None;
                }
                Err(e)
            }
        }
    }

    async fn ensure_connected<'a>(
        &self,
        slot: &'a mut Option<Connection>,
    ) -> Result<&'a mut Connection> {
        if slot.is_none() {
            *slot = Some(self.open().await?);
        }
        slot.as_mut()
            .ok_or_else(|| HelperError::connection("connection unavailable"))
    }

    async fn open(&self) -> Result<Connection> {
        let stream = timeout(CONTROL_TIMEOUT, UnixStream::connect(&self.socket_path))
            .await
            .map_err(|_| HelperError::connection("timed out connecting to helper"))?
            .map_err(|e| {
                HelperError::connection(format!("{}: {e}", self.socket_path.display()))
            })?;
        let (reader, writer) = stream.into_split();
        let mut conn = Connection {
            reader: BufReader::new(reader),
            writer,
            helper_version: String::new(),
        };

        let hello = RequestEnvelope::new(
            self.next_id(),
            HelperRequest::Hello {
                client_version: self.client_version.clone(),
            },
        );
        match round_trip(&mut conn, hello, CONTROL_TIMEOUT).await? {
            HelperResponse::Hello {
                helper_version,
                protocol_version_supported,
            } => {
                if protocol_version_supported != PROTOCOL_VERSION {
                    return Err(HelperError::protocol(format!(
                        "helper speaks protocol {protocol_version_supported}, client speaks {PROTOCOL_VERSION}"
                    )));
                }
                info!(helper_version = %helper_version, "Connected to privileged helper");
                conn.helper_version = helper_version;
                Ok(conn)
            }
            other => Err(unexpected(&other)),
        }
    }
}

#[async_trait]
impl HelperChannel for HelperClient {
    async fn execute(&self, request: ExecuteRequest) -> Result<ExecutedOutput> {
        let wait = Duration::from_secs(request.timeout_secs) + RESPONSE_GRACE;
        debug!(program = %request.program, "Sending request to helper");
        match self.request(HelperRequest::Execute(request), wait).await? {
            HelperResponse::Executed(output) => Ok(output),
            other => Err(unexpected(&other)),
        }
    }
}

/// Send one request and read its response. Error responses become errors.
async fn round_trip(
    conn: &mut Connection,
    envelope: RequestEnvelope,
    wait: Duration,
) -> Result<HelperResponse> {
    let id = envelope.id;
    let line = encode_line(&envelope)?;
    conn.writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| HelperError::connection(e.to_string()))?;
    conn.writer
        .flush()
        .await
        .map_err(|e| HelperError::connection(e.to_string()))?;

    let mut buf = String::new();
    let read = timeout(wait, conn.reader.read_line(&mut buf))
        .await
        .map_err(|_| HelperError::connection("timed out waiting for helper response"))?
        .map_err(|e| HelperError::connection(e.to_string()))?;
    if read == 0 {
        return Err(HelperError::connection("helper closed the connection"));
    }

    let reply: ResponseEnvelope = decode_line(&buf)?;
    // The helper answers with id 0 when it rejects a connection before
    // reading any request.
    let connection_error =
        reply.id == 0 && matches!(reply.response, HelperResponse::Error { .. });
    if reply.id != id && !connection_error {
        return Err(HelperError::protocol(format!(
            "response id {} does not match request id {id}",
            reply.id
        )));
    }
    if let HelperResponse::Error { code, message } = reply.response {
        warn!(?code, message = %message, "Helper returned an error");
        return Err(HelperError::from_remote(code, message));
    }
    Ok(reply.response)
}

fn unexpected(response: &HelperResponse) -> HelperError {
    HelperError::protocol(format!("unexpected helper response: {response:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ErrorCode;

    fn ping(id: u64) -> RequestEnvelope {
        RequestEnvelope::new(id, HelperRequest::Ping)
    }

    /// A connection whose peer answers the first request with `reply`.
    fn answered_by(reply: ResponseEnvelope) -> Connection {
        let (ours, theirs) = UnixStream::pair().unwrap();
        tokio::spawn(async move {
            let (reader, mut writer) = theirs.into_split();
            let mut line = String::new();
            BufReader::new(reader).read_line(&mut line).await.unwrap();
            let out = encode_line(&reply).unwrap();
            writer.write_all(out.as_bytes()).await.unwrap();
        });
        let (reader, writer) = ours.into_split();
        Connection {
            reader: BufReader::new(reader),
            writer,
            helper_version: String::new(),
        }
    }

    #[tokio::test]
    async fn test_mismatched_error_reply_is_protocol_error() {
        let mut conn = answered_by(ResponseEnvelope::new(
            7,
            HelperResponse::error(ErrorCode::NotAllowlisted, "/bin/sh"),
        ));
        let err = round_trip(&mut conn, ping(3), CONTROL_TIMEOUT).await.unwrap_err();
        assert!(matches!(err, HelperError::Protocol(ref m) if m.contains("id 7")), "{err}");
    }

    #[tokio::test]
    async fn test_connection_rejection_uses_id_zero() {
        let mut conn = answered_by(ResponseEnvelope::new(
            0,
            HelperResponse::error(ErrorCode::UnauthorizedCaller, "uid 502 is not permitted"),
        ));
        let err = round_trip(&mut conn, ping(3), CONTROL_TIMEOUT).await.unwrap_err();
        assert!(matches!(err, HelperError::UnauthorizedCaller(_)));

        let mut conn = answered_by(ResponseEnvelope::new(0, HelperResponse::Pong));
        let err = round_trip(&mut conn, ping(3), CONTROL_TIMEOUT).await.unwrap_err();
        assert!(matches!(err, HelperError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_matching_reply_is_returned() {
        let mut conn = answered_by(ResponseEnvelope::new(3, HelperResponse::Pong));
        let reply = round_trip(&mut conn, ping(3), CONTROL_TIMEOUT).await.unwrap();
        assert_eq!(reply, HelperResponse::Pong);
    }

    #[tokio::test]
    async fn test_missing_socket_is_connection_failure() {
        let dir = tempfile::tempdir().unwrap();
        let client = HelperClient::new(dir.path().join("absent.sock"));
        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, HelperError::ConnectionFailed(_)));
    }

    #[tokio::test]
    async fn test_execute_without_helper_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let client = HelperClient::new(dir.path().join("absent.sock"));
        let err = client
            .execute(ExecuteRequest {
                program: "/usr/sbin/purge".into(),
                args: vec![],
                timeout_secs: 60,
                working_dir: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, HelperError::ConnectionFailed(_)));
    }
}
