//! Process boundary of the lifecycle state machine.
//!
//! The state machine never spawns processes itself; it hands the command
//! line built by a capability to a [`Launcher`] and keeps the returned
//! [`RunningProcess`] for polling and termination. [`OsLauncher`] is the
//! real implementation.

use std::io;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::debug;

use crate::model::CommandLineDetails;

/// How long a server may take to exit after SIGTERM before it is killed.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// A spawned server process.
#[async_trait]
pub trait RunningProcess: Send + Sync {
    /// Operating system process id.
    fn id(&self) -> String;

    /// Returns `true` once the process has exited.
    ///
    /// # Errors
    ///
    /// Returns an error if the process status cannot be queried.
    fn has_exited(&mut self) -> io::Result<bool>;

    /// Stops the process and reaps it.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be signalled or waited for.
    async fn terminate(&mut self) -> io::Result<()>;
}

/// Spawns server processes.
pub trait Launcher: Send + Sync {
    /// Starts the command described by `details`.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned.
    fn launch(&self, details: &CommandLineDetails) -> io::Result<Box<dyn RunningProcess>>;
}

/// Launches processes with [`tokio::process::Command`].
///
/// The child's standard streams are detached so its output can never
/// interleave with protocol traffic on stdio. A process whose handle is
/// dropped is killed.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsLauncher;

impl Launcher for OsLauncher {
    fn launch(&self, details: &CommandLineDetails) -> io::Result<Box<dyn RunningProcess>> {
        let (program, args) = details
            .cmd_line
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command line"))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        if !details.working_dir.is_empty() {
            command.current_dir(&details.working_dir);
        }
        for entry in &details.envp {
            if let Some((key, value)) = entry.split_once('=') {
                command.env(key, value);
            }
        }

        let child = command.spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| io::Error::other("spawned process has no pid"))?;
        debug!(pid, program = %program, "Spawned server process");
        Ok(Box::new(OsProcess { child, pid }))
    }
}

struct OsProcess {
    child: Child,
    pid: u32,
}

#[async_trait]
impl RunningProcess for OsProcess {
    fn id(&self) -> String {
        self.pid.to_string()
    }

    fn has_exited(&mut self) -> io::Result<bool> {
        Ok(self.child.try_wait()?.is_some())
    }

    async fn terminate(&mut self) -> io::Result<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }

        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            let pid = i32::try_from(self.pid).map_err(io::Error::other)?;
            match signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
                Ok(()) => {
                    let exited = tokio::time::timeout(TERMINATE_GRACE, self.child.wait()).await;
                    if let Ok(status) = exited {
                        return status.map(|_| ());
                    }
                    debug!(pid = self.pid, "Server process ignored SIGTERM, killing it");
                }
                Err(Errno::ESRCH) => return self.child.wait().await.map(|_| ()),
                Err(e) => return Err(io::Error::other(e)),
            }
        }

        // SIGKILL on unix, TerminateProcess elsewhere; waits for the exit
        self.child.kill().await
    }
}
