//! Child process runner with timeout and capped output capture.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{ExecError, Result};
use crate::interpolate::ResolvedCommand;

/// What a finished (or killed) process produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when killed by a signal or on timeout.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    /// Either stream exceeded the capture limit.
    pub truncated: bool,
    pub duration: Duration,
}

/// Spawns resolved commands directly, without a shell.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    max_output_bytes: usize,
}

impl ProcessRunner {
    pub fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }

    /// Run `command`, killing it after `limit`.
    pub async fn run(&self, command: &ResolvedCommand, limit: Duration) -> Result<ProcessOutput> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|e| ExecError::Spawn {
            program: command.program.clone(),
            message: e.to_string(),
        })?;
        let mut stdout = Capture::spawn(child.stdout.take(), self.max_output_bytes);
        let mut stderr = Capture::spawn(child.stderr.take(), self.max_output_bytes);

        let finished = timeout(limit, async {
            let status = child.wait().await;
            stdout.drained().await;
            stderr.drained().await;
            status
        })
        .await;

        match finished {
            Ok(status) => {
                let status = status.map_err(|e| ExecError::Spawn {
                    program: command.program.clone(),
                    message: e.to_string(),
                })?;
                let (stdout, out_truncated) = stdout.finish();
                let (stderr, err_truncated) = stderr.finish();
                let output = ProcessOutput {
                    exit_code: status.code(),
                    stdout,
                    stderr,
                    timed_out: false,
                    truncated: out_truncated || err_truncated,
                    duration: start.elapsed(),
                };
                debug!(
                    program = %command.program,
                    exit_code = ?output.exit_code,
                    duration_ms = output.duration.as_millis() as u64,
                    "Process finished"
                );
                Ok(output)
            }
            Err(_) => {
                if let Err(e) = child.start_kill() {
                    warn!(program = %command.program, error = %e, "Failed to kill timed-out process");
                }
                let _ = child.wait().await;
                // Grandchildren may still hold the pipes open.
                let _ = timeout(DRAIN_GRACE, async {
                    stdout.drained().await;
                    stderr.drained().await;
                })
                .await;
                warn!(program = %command.program, ?limit, "Process timed out");

                let (stdout, out_truncated) = stdout.finish();
                let (mut stderr, err_truncated) = stderr.finish();
                if !stderr.is_empty() && !stderr.ends_with('\n') {
                    stderr.push('\n');
                }
                stderr.push_str(&format!("timed out after {limit:?}"));
                Ok(ProcessOutput {
                    exit_code: None,
                    stdout,
                    stderr,
                    timed_out: true,
                    truncated: out_truncated || err_truncated,
                    duration: start.elapsed(),
                })
            }
        }
    }
}

/// How long to keep reading after a timed-out process was killed.
const DRAIN_GRACE: Duration = Duration::from_millis(200);

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

/// One output stream read on its own task into a shared, capped buffer, so
/// whatever arrived before a timeout is still available.
struct Capture {
    buffer: Arc<Mutex<Captured>>,
    reader: JoinHandle<()>,
    done: bool,
}

impl Capture {
    fn spawn<R>(stream: Option<R>, max: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Captured::default()));
        let sink = buffer.clone();
        let reader = tokio::spawn(async move {
            let Some(mut stream) = stream else {
                return;
            };
            let mut chunk = [0u8; 8192];
            loop {
                match stream.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let mut captured = sink.lock();
                        let room = max.saturating_sub(captured.bytes.len());
                        if n > room {
                            captured.truncated = true;
                        }
                        captured.bytes.extend_from_slice(&chunk[..n.min(room)]);
                    }
                }
            }
        });
        Self {
            buffer,
            reader,
            done: false,
        }
    }

    /// Wait for the stream to reach end of file.
    async fn drained(&mut self) {
        if !self.done {
            let _ = (&mut self.reader).await;
            self.done = true;
        }
    }

    fn finish(self) -> (String, bool) {
        self.reader.abort();
        let captured = self.buffer.lock();
        (
            String::from_utf8_lossy(&captured.bytes).into_owned(),
            captured.truncated,
        )
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> ResolvedCommand {
        ResolvedCommand {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            working_dir: None,
        }
    }

    #[tokio::test]
    async fn test_captures_output_and_exit_code() {
        let runner = ProcessRunner::new(1024);
        let out = runner
            .run(&sh("echo out; echo err >&2; exit 3"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.stderr, "err\n");
        assert!(!out.timed_out);
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let runner = ProcessRunner::new(1024);
        let out = runner
            .run(&sh("sleep 5"), Duration::from_millis(200))
            .await
            .unwrap();
        assert!(out.timed_out);
        assert_eq!(out.exit_code, None);
        assert!(out.duration < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_timeout_keeps_partial_output() {
        let runner = ProcessRunner::new(1024);
        let out = runner
            .run(&sh("echo partial; sleep 5"), Duration::from_millis(500))
            .await
            .unwrap();
        assert!(out.timed_out);
        assert!(out.stdout.contains("partial"), "stdout: {:?}", out.stdout);
        assert!(out.stderr.contains("timed out after 500ms"), "stderr: {:?}", out.stderr);
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let runner = ProcessRunner::new(10);
        let out = runner
            .run(&sh("printf '0123456789abcdef'"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.stdout, "0123456789");
        assert!(out.truncated);
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let runner = ProcessRunner::new(10);
        let missing = ResolvedCommand {
            program: "/nonexistent/program".into(),
            args: vec![],
            working_dir: None,
        };
        assert!(matches!(
            runner.run(&missing, Duration::from_secs(1)).await,
            Err(ExecError::Spawn { .. })
        ));
    }

    #[tokio::test]
    async fn test_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut cmd = sh("pwd");
        cmd.working_dir = Some(dir.path().to_path_buf());
        let out = ProcessRunner::new(4096)
            .run(&cmd, Duration::from_secs(5))
            .await
            .unwrap();
        let reported = std::path::PathBuf::from(out.stdout.trim());
        assert_eq!(
            reported.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }
}
