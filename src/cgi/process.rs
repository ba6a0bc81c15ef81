//! A child process with a hard deadline.
//!
//! Every read and the final wait are bounded by the same deadline, fixed at
//! spawn time. Expiry kills the child and reaps it before returning.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use super::CgiError;

pub struct BoundedProcess {
    child: Child,
    stdout: ChildStdout,
    deadline: Instant,
}

impl BoundedProcess {
    /// Spawn `command` with stdout captured and stdin closed.
    pub fn spawn(mut command: Command, limit: Duration) -> io::Result<Self> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        let mut child = command.spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("child stdout not captured"))?;
        Ok(Self {
            child,
            stdout,
            deadline: Instant::now() + limit,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Read from the child's stdout. `Ok(0)` is end of output.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, CgiError> {
        match timeout_at(self.deadline, self.stdout.read(buf)).await {
            Ok(result) => result.map_err(CgiError::Io),
            Err(_) => {
                self.terminate().await;
                Err(CgiError::Timeout)
            }
        }
    }

    /// Wait for exit within the deadline.
    pub async fn wait(mut self) -> Result<ExitStatus, CgiError> {
        match timeout_at(self.deadline, self.child.wait()).await {
            Ok(result) => result.map_err(CgiError::Io),
            Err(_) => {
                self.terminate().await;
                Err(CgiError::Timeout)
            }
        }
    }

    /// Kill the child and reap it.
    pub async fn terminate(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!(error = %e, "CGI child already gone");
        }
        if let Err(e) = self.child.wait().await {
            debug!(error = %e, "Failed to reap CGI child");
        }
    }
}
