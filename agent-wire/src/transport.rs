//! Subprocess transport: piped stdio plus process control.
//!
//! The session actor owns the read and write halves; process control is a
//! separate shared handle so cancellation can reach the child while a read
//! is in flight.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// How to launch the assistant CLI for one session.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_directory: PathBuf,
    pub env: HashMap<String, String>,
    /// Environment variables scrubbed from the inherited environment.
    pub env_remove: Vec<String>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_directory: working_directory.into(),
            env: HashMap::new(),
            env_remove: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Control handle for the peer behind a transport.
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Cooperative interrupt (SIGINT on unix); best-effort.
    async fn interrupt(&self) -> Result<()>;

    /// Forcible termination.
    async fn kill(&self) -> Result<()>;

    /// Wait up to `grace` for the peer to exit; true if it did.
    async fn wait_exit(&self, grace: Duration) -> bool;
}

/// The I/O bundle a session actor drives.
pub struct SessionIo {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
    pub control: Arc<dyn ProcessControl>,
}

struct ChildControl {
    child: Mutex<Child>,
}

#[async_trait]
impl ProcessControl for ChildControl {
    async fn interrupt(&self) -> Result<()> {
        let child = self.child.lock().await;
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            kill(Pid::from_raw(pid as i32), Signal::SIGINT)
                .context("failed to deliver SIGINT")?;
            return Ok(());
        }
        let _ = child;
        Ok(())
    }

    async fn kill(&self) -> Result<()> {
        let mut child = self.child.lock().await;
        match child.start_kill() {
            Ok(()) => Ok(()),
            // Already exited.
            Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(err) => Err(err).context("failed to kill subprocess"),
        }
    }

    async fn wait_exit(&self, grace: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            {
                let mut child = self.child.lock().await;
                match child.try_wait() {
                    Ok(Some(_)) => return true,
                    Ok(None) => {}
                    Err(_) => return true,
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

/// Spawn the assistant subprocess with piped stdio.
///
/// Stderr is drained line-by-line into `stderr_tx` (telemetry); dropping the
/// receiver silently discards further lines.
pub fn spawn_process(
    spec: &LaunchSpec,
    stderr_tx: Option<mpsc::UnboundedSender<String>>,
) -> Result<SessionIo> {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .current_dir(&spec.working_directory)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    for key in &spec.env_remove {
        command.env_remove(key);
    }
    for (key, value) in &spec.env {
        command.env(key, value);
    }

    let mut child = command
        .spawn()
        .with_context(|| format!("failed to spawn assistant process '{}'", spec.program))?;

    let stdin = child.stdin.take().context("subprocess stdin unavailable")?;
    let stdout = child
        .stdout
        .take()
        .context("subprocess stdout unavailable")?;
    let stderr = child
        .stderr
        .take()
        .context("subprocess stderr unavailable")?;

    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "agent_wire::stderr", "{}", line);
            if let Some(tx) = &stderr_tx {
                if tx.send(line).is_err() {
                    break;
                }
            }
        }
    });

    debug!(program = %spec.program, cwd = %spec.working_directory.display(), "spawned assistant subprocess");

    Ok(SessionIo {
        reader: Box::new(stdout),
        writer: Box::new(stdin),
        control: Arc::new(ChildControl {
            child: Mutex::new(child),
        }),
    })
}

/// No-op control for in-memory transports (tests).
pub struct NoopControl;

#[async_trait]
impl ProcessControl for NoopControl {
    async fn interrupt(&self) -> Result<()> {
        Ok(())
    }

    async fn kill(&self) -> Result<()> {
        warn!("kill requested on in-memory transport");
        Ok(())
    }

    async fn wait_exit(&self, _grace: Duration) -> bool {
        true
    }
}

/// Build a [`SessionIo`] over an in-memory duplex pipe. Returns the session
/// side plus the far end a test drives to play the subprocess.
pub fn duplex_io(capacity: usize) -> (SessionIo, tokio::io::DuplexStream) {
    let (near, far) = tokio::io::duplex(capacity);
    let (read_half, write_half) = tokio::io::split(near);
    (
        SessionIo {
            reader: Box::new(read_half),
            writer: Box::new(write_half),
            control: Arc::new(NoopControl),
        },
        far,
    )
}
