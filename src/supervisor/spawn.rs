//! Starting probe processes.
//!
//! The supervisor never touches `tokio::process` directly; it goes through
//! [`ProbeSpawner`] so tests can substitute scripted children.

use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tracing::debug;

use crate::error::CheckError;

/// Shell used to interpret probe commands.
pub const DEFAULT_SHELL: &str = "sh";

/// Readable half of a probe's captured stdout.
pub type ProbeStream = Box<dyn AsyncRead + Send + Unpin>;

/// A running probe process.
#[async_trait]
pub trait ProbeChild: Send {
    /// OS process id, if still known.
    fn pid(&self) -> Option<u32>;

    /// Reap the process without blocking: `Ok(Some(code))` once it has exited.
    fn try_wait(&mut self) -> io::Result<Option<i32>>;

    /// Wait for the process to exit and return its exit code.
    async fn wait(&mut self) -> io::Result<i32>;

    /// Ask the process to terminate without waiting for it.
    fn start_kill(&mut self) -> io::Result<()>;
}

/// A freshly started probe: the process plus its stdout.
pub struct SpawnedProbe {
    pub child: Box<dyn ProbeChild>,
    pub stdout: ProbeStream,
}

/// Starts the process behind one check.
pub trait ProbeSpawner: Send + Sync {
    fn spawn(&self, command: &str) -> Result<SpawnedProbe, CheckError>;
}

/// Runs probe commands through `<shell> -c <command>`.
///
/// Stdout is captured; stdin and stderr are discarded. The process is killed
/// if its handle is dropped.
#[derive(Debug, Clone)]
pub struct ShellSpawner {
    shell: String,
}

impl ShellSpawner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }
}

impl Default for ShellSpawner {
    fn default() -> Self {
        Self::new(DEFAULT_SHELL)
    }
}

impl ProbeSpawner for ShellSpawner {
    fn spawn(&self, command: &str) -> Result<SpawnedProbe, CheckError> {
        let spawn_error = |source: io::Error| CheckError::Spawn {
            command: command.to_string(),
            source,
        };

        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let stdout = child.stdout.take().ok_or_else(|| {
            spawn_error(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "probe stdout was not captured",
            ))
        })?;

        debug!(pid = ?child.id(), command, "spawned probe");
        Ok(SpawnedProbe {
            child: Box::new(TokioChild(child)),
            stdout: Box::new(stdout),
        })
    }
}

/// Signal-terminated processes have no exit code.
const SIGNALLED_EXIT_CODE: i32 = -1;

struct TokioChild(Child);

#[async_trait]
impl ProbeChild for TokioChild {
    fn pid(&self) -> Option<u32> {
        self.0.id()
    }

    fn try_wait(&mut self) -> io::Result<Option<i32>> {
        Ok(self
            .0
            .try_wait()?
            .map(|status| status.code().unwrap_or(SIGNALLED_EXIT_CODE)))
    }

    async fn wait(&mut self) -> io::Result<i32> {
        let status = self.0.wait().await?;
        Ok(status.code().unwrap_or(SIGNALLED_EXIT_CODE))
    }

    fn start_kill(&mut self) -> io::Result<()> {
        self.0.start_kill()
    }
}
