//! Privileged command execution.
//!
//! The environment probe only needs "run this command as root, give me its
//! text and exit code" plus "do we hold root right now". [`PrivilegedShell`]
//! is that seam; [`SuShell`] is the production implementation on top of
//! [`runner::CommandRunner`].

pub mod runner;

use runner::{CommandRunner, RunnerConfig, RunnerError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

/// Errors from a privileged command.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error("command `{command}` timed out after {timeout:?}")]
    TimedOut { command: String, timeout: Duration },
}

/// Result of one privileged command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShellOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl ShellOutput {
    /// Exit code 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// A facility that runs textual commands with elevated privileges.
pub trait PrivilegedShell: Send + Sync {
    /// Run `command` through the privileged shell.
    fn run(&self, command: &str) -> Result<ShellOutput, ShellError>;

    /// Whether the caller currently holds root.
    fn has_root(&self) -> bool;
}

/// Runs commands through `su -c`, or `sh -c` when already root.
#[derive(Debug, Clone)]
pub struct SuShell {
    runner: CommandRunner,
    su_path: String,
}

impl SuShell {
    pub fn new(su_path: impl Into<String>, timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            runner: CommandRunner::new(RunnerConfig {
                default_timeout: timeout,
                max_output_bytes,
            }),
            su_path: su_path.into(),
        }
    }

    fn launcher(&self) -> &str {
        if running_as_root() {
            "sh"
        } else {
            &self.su_path
        }
    }
}

impl PrivilegedShell for SuShell {
    fn run(&self, command: &str) -> Result<ShellOutput, ShellError> {
        let output = self.runner.run(self.launcher(), &["-c", command], None)?;
        if output.timed_out {
            return Err(ShellError::TimedOut {
                command: command.to_string(),
                timeout: self.runner.config().default_timeout,
            });
        }
        trace!(command, exit_code = ?output.exit_code, "privileged command finished");
        Ok(ShellOutput {
            stdout: output.stdout_str(),
            stderr: output.stderr_str(),
            exit_code: output.exit_code,
        })
    }

    fn has_root(&self) -> bool {
        if running_as_root() {
            return true;
        }
        match self.run("id -u") {
            Ok(output) => output.success() && output.stdout.trim() == "0",
            Err(e) => {
                debug!(error = %e, "root check failed");
                false
            }
        }
    }
}

/// Effective uid is 0.
pub fn running_as_root() -> bool {
    #[cfg(unix)]
    {
        // SAFETY: geteuid has no preconditions.
        unsafe { libc::geteuid() == 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// Effective uid of the calling process.
pub fn effective_uid() -> u32 {
    #[cfg(unix)]
    {
        // SAFETY: geteuid has no preconditions.
        unsafe { libc::geteuid() }
    }
    #[cfg(not(unix))]
    {
        u32::MAX
    }
}
