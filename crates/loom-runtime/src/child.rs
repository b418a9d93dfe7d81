//! Spawns and drives the opaque agent CLI subprocess (spec §1 "the agent
//! CLI binary itself... treated as an opaque child process with a
//! documented stdio protocol").
//!
//! Stdout is newline-delimited JSON, read line-by-line on its own task and
//! forwarded raw; `Process` parses each line. Stdin carries the same
//! shape, one JSON object per line. Stderr is drained and logged only —
//! the documented protocol carries errors on stdout.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::errors::ProcessResult;
use loom_core::errors::{ProcessError, ProcessErrorKind};

/// Parameters for spawning the agent CLI.
pub struct SpawnSpec {
    /// Executable path or name on `PATH`.
    pub program: String,
    /// Arguments, e.g. `["--resume", sessionId]`.
    pub args: Vec<String>,
    /// Working directory (the project path).
    pub cwd: std::path::PathBuf,
}

/// A running child subprocess: a stdin writer and a channel of its stdout
/// lines. Dropping this does not kill the child — call [`ChildHandle::kill`]
/// explicitly.
pub struct ChildHandle {
    child: Child,
    stdin: ChildStdin,
    lines: Option<mpsc::Receiver<String>>,
}

impl ChildHandle {
    /// The OS process id, when the platform exposes one.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Take ownership of the stdout-line receiver, leaving `self` usable
    /// only for writes (`write_line`) and lifecycle control (`kill`,
    /// `suspend`, `resume`). Lets a dedicated reader task own the receiver
    /// while the stdin writer stays behind a serializing lock.
    pub fn take_lines(&mut self) -> Option<mpsc::Receiver<String>> {
        self.lines.take()
    }

    /// Write one line (a JSON object, newline-terminated by this call) to
    /// the child's stdin.
    pub async fn write_line(&mut self, line: &str) -> ProcessResult<()> {
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ProcessError::new(ProcessErrorKind::StdioError, "write to child stdin").with_source(e))?;
        self.stdin
            .write_all(b"\n")
            .await
            .map_err(|e| ProcessError::new(ProcessErrorKind::StdioError, "write to child stdin").with_source(e))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| ProcessError::new(ProcessErrorKind::StdioError, "flush child stdin").with_source(e))
    }

    /// Suspend the child (SIGSTOP) if the platform supports it. Used by
    /// `Process::setHold(true)` to actually pause CPU-bound work, not just
    /// stop forwarding queued input.
    #[cfg(unix)]
    pub fn suspend(&self) {
        if let Some(pid) = self.pid() {
            // SAFETY: signaling our own child by its own reported pid.
            #[allow(unsafe_code)]
            unsafe {
                libc::kill(i32::try_from(pid).unwrap_or(0), libc::SIGSTOP);
            }
        }
    }

    /// Resume a previously suspended child (SIGCONT).
    #[cfg(unix)]
    pub fn resume(&self) {
        if let Some(pid) = self.pid() {
            #[allow(unsafe_code)]
            unsafe {
                libc::kill(i32::try_from(pid).unwrap_or(0), libc::SIGCONT);
            }
        }
    }

    #[cfg(not(unix))]
    pub fn suspend(&self) {}

    #[cfg(not(unix))]
    pub fn resume(&self) {}

    /// Resume if suspended, then terminate the child.
    pub async fn kill(mut self) {
        self.resume();
        let _ = self.child.kill().await;
    }
}

/// Spawn the agent CLI with stdio piped, returning a handle whose stdout is
/// already being drained on a background task.
pub async fn spawn(spec: SpawnSpec) -> ProcessResult<ChildHandle> {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .current_dir(&spec.cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .map_err(|e| ProcessError::new(ProcessErrorKind::SpawnFailed, format!("spawn `{}`", spec.program)).with_source(e))?;

    let stdin = child.stdin.take().ok_or_else(|| ProcessError::new(ProcessErrorKind::StdioError, "no stdin on spawned child"))?;
    let stdout = child.stdout.take().ok_or_else(|| ProcessError::new(ProcessErrorKind::StdioError, "no stdout on spawned child"))?;
    let stderr = child.stderr.take().ok_or_else(|| ProcessError::new(ProcessErrorKind::StdioError, "no stderr on spawned child"))?;

    let (tx, lines) = mpsc::channel(256);
    tokio::spawn(async move {
        let mut reader = BufReader::new(stdout).lines();
        loop {
            match reader.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "error reading child stdout");
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            debug!(target: "agent_stderr", "{line}");
        }
    });

    Ok(ChildHandle { child, stdin, lines })
}

/// The stdout-line channel simply closes (`take_lines().recv()` returns
/// `None`) when the child exits; this helper turns that into a `ChildExit`.
#[must_use]
pub fn exit_error() -> ProcessError {
    ProcessError::new(ProcessErrorKind::ChildExit, "child process exited")
}
