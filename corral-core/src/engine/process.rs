//! Child-process lifecycle for one engine instance.
//!
//! The spawned child is owned by a single supervising task; the rest of the
//! gateway interacts with it through a stop signal and an exit watch, so
//! stopping and crash detection never contend for the process handle.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Grace period after SIGTERM before the child is killed.
const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(10);
/// Wait after SIGKILL; the kernel reaps well within this.
const FORCEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(5);
/// Outer bound a `stop` caller waits for the exit record to land.
const STOP_WAIT_TIMEOUT: Duration = Duration::from_secs(20);
/// Drain tasks exit at pipe EOF; joining them is bounded regardless.
const DRAIN_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn engine binary {binary}")]
    Spawn {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// How the child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
    /// True when the exit was requested through [`EngineProcess::stop`];
    /// false means the engine died on its own.
    pub requested: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    Stopped,
    Crashed,
}

/// Handle to a spawned engine process.
#[derive(Debug)]
pub struct EngineProcess {
    pid: u32,
    command_line: String,
    started_at: Instant,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
}

impl EngineProcess {
    /// Spawn `binary` with the exact `args` vector.
    ///
    /// Environment is inherited and the working directory is the gateway's;
    /// there is no shell in between. stdout and stderr are drained line by
    /// line into the log (stdout at info, stderr at warn).
    pub fn spawn(binary: &Path, args: &[String]) -> Result<Self, ProcessError> {
        let mut child = Command::new(binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                binary: binary.to_path_buf(),
                source,
            })?;

        // Pipes were requested just above; both takes succeed.
        let pid = child.id().unwrap_or(0);
        let stdout = child.stdout.take().expect("stdout piped at spawn");
        let stderr = child.stderr.take().expect("stderr piped at spawn");

        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.is_empty() {
                    info!(pid, "{line}");
                }
            }
        });
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.is_empty() {
                    warn!(pid, "{line}");
                }
            }
        });

        let command_line = format!(
            "{} {}",
            binary.display(),
            args.join(" ")
        );
        info!(pid, command = %command_line, "engine process started");

        let (stop_tx, stop_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(supervise_child(
            child, pid, stop_rx, exit_tx, stdout_task, stderr_task,
        ));

        Ok(Self {
            pid,
            command_line,
            started_at: Instant::now(),
            stop_tx: Mutex::new(Some(stop_tx)),
            exit_rx,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn is_running(&self) -> bool {
        self.exit_rx.borrow().is_none()
    }

    pub fn status(&self) -> ProcessStatus {
        match *self.exit_rx.borrow() {
            None => ProcessStatus::Running,
            Some(ProcessExit { requested: true, .. }) => ProcessStatus::Stopped,
            Some(ProcessExit { requested: false, .. }) => ProcessStatus::Crashed,
        }
    }

    /// A watch that resolves to `Some` once the child has exited.
    pub fn exit_watch(&self) -> watch::Receiver<Option<ProcessExit>> {
        self.exit_rx.clone()
    }

    /// Stop the engine: SIGTERM, then SIGKILL if it lingers.
    ///
    /// Idempotent and infallible; returns once the exit has been recorded
    /// and both drain tasks have been joined.
    pub async fn stop(&self) {
        let stop_tx = self
            .stop_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(tx) = stop_tx {
            let _ = tx.send(());
        }

        let mut exit_rx = self.exit_rx.clone();
        let _ = timeout(STOP_WAIT_TIMEOUT, async {
            while exit_rx.borrow_and_update().is_none() {
                if exit_rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;
    }
}

/// Owns the child: waits for either a stop request or a spontaneous exit,
/// then records the outcome and joins the drain tasks.
async fn supervise_child(
    mut child: Child,
    pid: u32,
    stop_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<ProcessExit>>,
    stdout_task: JoinHandle<()>,
    stderr_task: JoinHandle<()>,
) {
    let exit = tokio::select! {
        _ = stop_rx => {
            debug!(pid, "sending SIGTERM to engine");
            // pid 0 would address the whole process group
            if pid > 0 {
                unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            }

            let code = match timeout(GRACEFUL_STOP_TIMEOUT, child.wait()).await {
                Ok(result) => result.ok().and_then(|status| status.code()),
                Err(_) => {
                    warn!(pid, "engine ignored SIGTERM; killing");
                    let _ = child.start_kill();
                    match timeout(FORCEFUL_STOP_TIMEOUT, child.wait()).await {
                        Ok(result) => result.ok().and_then(|status| status.code()),
                        Err(_) => None,
                    }
                }
            };
            ProcessExit { code, requested: true }
        }
        result = child.wait() => {
            let code = result.ok().and_then(|status| status.code());
            ProcessExit { code, requested: false }
        }
    };

    // The pipes hit EOF once the child is gone; the drains exit on their own.
    let _ = timeout(DRAIN_JOIN_TIMEOUT, stdout_task).await;
    let _ = timeout(DRAIN_JOIN_TIMEOUT, stderr_task).await;

    if exit.requested {
        info!(pid, code = ?exit.code, "engine process stopped");
    } else {
        warn!(pid, code = ?exit.code, "engine process exited on its own");
    }
    let _ = exit_tx.send(Some(exit));
}

// ── Tests ──────────────────────────────────────────────────────────────────────
