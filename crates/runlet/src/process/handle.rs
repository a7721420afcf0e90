//! Handle to a single spawned process.
//!
//! Spawning hands the `Child` to a detached watcher task. The watcher reaps the
//! process, gives the output readers a short window to drain and then records
//! the terminal state. Readers still blocked after that window (a grandchild
//! holding the pipe open) are aborted, so the buffer is frozen once a handle
//! reports "terminated". Kill requests are routed through the watcher because
//! it owns the child.

use std::fmt;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use runlet_protocol::{ProcessStatus, ProcessSummary, TerminalState};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::error::{ProcessError, ProcessResult};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// How long output readers may keep draining after the process was reaped.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Opaque 128-bit process identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(Uuid);

impl ProcessId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for ProcessId {
    type Err = ProcessError;

    /// Accepts any well-formed UUID, not only ones this server issued.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ProcessError::InvalidId(s.to_string()))
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Append-only buffer shared by the stdout and stderr readers.
#[derive(Debug)]
pub struct OutputBuffer {
    bytes: RwLock<Vec<u8>>,
    limit: Option<usize>,
    truncated: AtomicBool,
}

impl OutputBuffer {
    /// Create a buffer, optionally capped at `limit` bytes.
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            bytes: RwLock::new(Vec::new()),
            limit,
            truncated: AtomicBool::new(false),
        }
    }

    /// Append a chunk. Bytes past the cap are dropped and the buffer is
    /// flagged as truncated.
    pub fn append(&self, chunk: &[u8]) {
        let mut bytes = self.bytes.write().unwrap_or_else(PoisonError::into_inner);
        let take = match self.limit {
            Some(limit) => limit.saturating_sub(bytes.len()).min(chunk.len()),
            None => chunk.len(),
        };
        bytes.extend_from_slice(&chunk[..take]);
        if take < chunk.len() {
            self.truncated.store(true, Ordering::Relaxed);
        }
    }

    /// Copy of everything captured so far.
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated.load(Ordering::Relaxed)
    }
}

type KillRequest = oneshot::Sender<io::Result<()>>;

/// Handle to a spawned process.
#[derive(Debug)]
pub struct ProcessHandle {
    id: ProcessId,
    /// Program that was invoked.
    name: String,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    output: Arc<OutputBuffer>,
    /// Written once by the watcher when the process has exited.
    state: Arc<OnceLock<TerminalState>>,
    kill_tx: mpsc::UnboundedSender<KillRequest>,
}

impl ProcessHandle {
    /// Spawn `program` with `args`, capturing stdout and stderr into one buffer.
    ///
    /// Must be called from within a tokio runtime. If the spawn fails nothing
    /// is left running and no task is started.
    pub fn spawn(
        id: ProcessId,
        program: &str,
        args: &[&str],
        max_log_bytes: Option<usize>,
    ) -> ProcessResult<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ProcessError::SpawnFailed {
                program: program.to_string(),
                source,
            })?;

        let pid = child.id();
        let output = Arc::new(OutputBuffer::new(max_log_bytes));

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(capture(stdout, Arc::clone(&output))));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(capture(stderr, Arc::clone(&output))));
        }

        let state = Arc::new(OnceLock::new());
        let (kill_tx, kill_rx) = mpsc::unbounded_channel();
        tokio::spawn(watch(id, child, readers, kill_rx, Arc::clone(&state)));

        info!("Spawned {} (PID {:?}) as process {}", program, pid, id);

        Ok(Self {
            id,
            name: program.to_string(),
            pid,
            started_at: Utc::now(),
            output,
            state,
            kill_tx,
        })
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Terminal state, or `None` while the process is still running.
    pub fn status(&self) -> Option<TerminalState> {
        self.state.get().cloned()
    }

    pub fn is_running(&self) -> bool {
        self.state.get().is_none()
    }

    /// Combined stdout and stderr captured so far.
    pub fn log(&self) -> Vec<u8> {
        self.output.snapshot()
    }

    /// Whether output was dropped because of the log cap.
    pub fn is_log_truncated(&self) -> bool {
        self.output.is_truncated()
    }

    /// Send SIGKILL to the process.
    ///
    /// Does not wait for the process to exit. Fails once the watcher has
    /// observed the exit, or with the OS error if the signal can't be sent.
    pub async fn kill(&self) -> ProcessResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.kill_tx.send(reply_tx).map_err(|_| already_finished())?;
        reply_rx
            .await
            .map_err(|_| already_finished())?
            .map_err(ProcessError::KillFailed)
    }

    pub fn summary(&self) -> ProcessSummary {
        ProcessSummary {
            id: self.id.to_string(),
            name: self.name.clone(),
            status: if self.is_running() {
                ProcessStatus::Active
            } else {
                ProcessStatus::Terminated
            },
            started_at: self.started_at,
        }
    }
}

fn already_finished() -> ProcessError {
    ProcessError::KillFailed(io::Error::other("process already finished"))
}

async fn capture<R>(mut reader: R, output: Arc<OutputBuffer>)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => output.append(&chunk[..n]),
            Err(e) => {
                debug!("Output stream closed with error: {:?}", e);
                break;
            }
        }
    }
}

async fn watch(
    id: ProcessId,
    mut child: Child,
    readers: Vec<JoinHandle<()>>,
    mut kill_rx: mpsc::UnboundedReceiver<KillRequest>,
    state: Arc<OnceLock<TerminalState>>,
) {
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            Some(reply) = kill_rx.recv() => {
                debug!("Sending SIGKILL to process {}", id);
                let _ = reply.send(child.start_kill());
            }
        }
    };
    // Pending and later kill requests now fail with "already finished".
    drop(kill_rx);

    let deadline = tokio::time::Instant::now() + DRAIN_GRACE;
    for mut reader in readers {
        match tokio::time::timeout_at(deadline, &mut reader).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Output reader for process {} failed: {:?}", id, e),
            Err(_) => {
                debug!(
                    "Output of process {} still open after exit, closing capture",
                    id
                );
                reader.abort();
                // Wait for the cancellation so no append lands after the state is set.
                let _ = reader.await;
            }
        }
    }

    let terminal = terminal_state(status);
    info!("Process {} {}", id, terminal);
    let _ = state.set(terminal);
}

fn terminal_state(status: io::Result<ExitStatus>) -> TerminalState {
    let finished_at = Utc::now();
    match status {
        Ok(status) => {
            #[cfg(unix)]
            let signal = {
                use std::os::unix::process::ExitStatusExt;
                status.signal()
            };
            #[cfg(not(unix))]
            let signal = None;

            TerminalState {
                exit_code: status.code(),
                signal,
                success: status.success(),
                finished_at,
            }
        }
        Err(e) => {
            warn!("Error waiting for process: {:?}", e);
            TerminalState {
                exit_code: None,
                signal: None,
                success: false,
                finished_at,
            }
        }
    }
}
