//! Subprocess runner with timeout and output cap.
//!
//! Every privileged probe goes through [`CommandRunner`], which provides:
//!
//! - Per-command timeout with SIGTERM → SIGKILL escalation
//! - Output size caps to prevent memory exhaustion
//! - Non-blocking pipe reads so a grandchild holding stdout open cannot hang us
//! - A minimal, locale-neutral environment for the child
//!
//! # Example
//!
//! ```ignore
//! use rootenv_core::shell::runner::{CommandRunner, RunnerConfig};
//!
//! let runner = CommandRunner::new(RunnerConfig::default());
//! let output = runner.run("magisk", &["-V"], None)?;
//! println!("{}", output.stdout_str());
//! ```

use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, instrument, trace, warn};

/// Default timeout per command in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Default maximum output size per stream in bytes (64 KiB).
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// Grace period between SIGTERM and SIGKILL in milliseconds.
const SIGTERM_GRACE_MS: u64 = 500;

/// Errors that can occur while running a command.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("command failed to spawn: {0}")]
    SpawnFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid command path: {0}")]
    InvalidPath(String),
}

/// Output from a finished (or killed) command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Program that was executed.
    pub program: String,

    /// Arguments passed to the program.
    pub args: Vec<String>,

    /// Standard output (may be truncated).
    pub stdout: Vec<u8>,

    /// Standard error (may be truncated).
    pub stderr: Vec<u8>,

    /// Exit code, if the process exited normally.
    pub exit_code: Option<i32>,

    /// Whether output was truncated.
    pub truncated: bool,

    /// Execution duration.
    pub duration: Duration,

    /// Whether the command was killed for exceeding its timeout.
    pub timed_out: bool,
}

impl CommandOutput {
    /// Get stdout as string (lossy UTF-8 conversion).
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Get stderr as string (lossy UTF-8 conversion).
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    /// Check if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Configuration for the command runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Default timeout per command.
    pub default_timeout: Duration,

    /// Maximum output size per stream in bytes.
    pub max_output_bytes: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

/// Blocking subprocess runner.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    config: RunnerConfig,
}

impl CommandRunner {
    /// Create a runner with the given configuration.
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// The runner's configuration.
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run `program` with `args`, killing it if it outlives `timeout`
    /// (or the configured default).
    ///
    /// A timeout is reported through [`CommandOutput::timed_out`], not as an error.
    #[instrument(skip(self, args), fields(program = %program))]
    pub fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, RunnerError> {
        validate_program(program)?;

        let timeout = timeout.unwrap_or(self.config.default_timeout);
        let max_output = self.config.max_output_bytes;

        debug!(
            args = ?args,
            timeout_ms = timeout.as_millis() as u64,
            max_output,
            "running command"
        );

        let start = Instant::now();
        let mut child = build_command(program, args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    debug!("program not found");
                    RunnerError::CommandNotFound(program.to_string())
                } else {
                    error!(error = %e, "failed to spawn");
                    RunnerError::SpawnFailed(e.to_string())
                }
            })?;

        let captured = execute_with_timeout(&mut child, timeout, max_output);
        let duration = start.elapsed();

        match captured {
            Ok(captured) => {
                debug!(
                    duration_ms = duration.as_millis() as u64,
                    exit_code = ?captured.exit_code,
                    timed_out = captured.timed_out,
                    "command finished"
                );
                Ok(CommandOutput {
                    program: program.to_string(),
                    args: args.iter().map(|s| s.to_string()).collect(),
                    stdout: captured.stdout,
                    stderr: captured.stderr,
                    exit_code: captured.exit_code,
                    truncated: captured.truncated,
                    duration,
                    timed_out: captured.timed_out,
                })
            }
            Err(e) => {
                warn!(error = %e, "command execution failed");
                Err(e)
            }
        }
    }
}

/// Reject program names that would only make sense to a shell.
fn validate_program(program: &str) -> Result<(), RunnerError> {
    if program.is_empty() {
        return Err(RunnerError::InvalidPath("empty program name".to_string()));
    }

    if program.contains(['|', '&', ';', '$', '`', '\n', '\r', ' ']) {
        return Err(RunnerError::InvalidPath(format!(
            "program contains shell metacharacters: {}",
            program
        )));
    }

    if program.starts_with('/') && !Path::new(program).exists() {
        return Err(RunnerError::CommandNotFound(program.to_string()));
    }

    Ok(())
}

fn build_command(program: &str, args: &[&str]) -> Command {
    let mut command = Command::new(program);
    command.args(args);

    command.env_clear();
    if let Ok(path) = std::env::var("PATH") {
        command.env("PATH", path);
    }
    command.env("LC_ALL", "C");
    command.env("LANG", "C");

    command
}

struct Captured {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_code: Option<i32>,
    truncated: bool,
    timed_out: bool,
}

fn execute_with_timeout(
    child: &mut Child,
    timeout: Duration,
    max_output: usize,
) -> Result<Captured, RunnerError> {
    let deadline = Instant::now() + timeout;
    let mut captured = Captured {
        stdout: Vec::with_capacity(max_output.min(8192)),
        stderr: Vec::with_capacity(max_output.min(8192)),
        exit_code: None,
        truncated: false,
        timed_out: false,
    };

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut chunk = vec![0u8; 8192];

    loop {
        if Instant::now() >= deadline {
            captured.timed_out = true;
            warn!("command timed out, sending SIGTERM");
            kill_with_grace(child);
            break;
        }

        let mut did_read = false;

        if let Some(out) = stdout.as_mut() {
            if let Ok(n) = try_read_nonblocking(out, &mut chunk) {
                if n > 0 {
                    did_read = true;
                    append_capped(
                        &mut captured.stdout,
                        &chunk[..n],
                        max_output,
                        &mut captured.truncated,
                    );
                }
            }
        }

        if let Some(err) = stderr.as_mut() {
            if let Ok(n) = try_read_nonblocking(err, &mut chunk) {
                if n > 0 {
                    did_read = true;
                    append_capped(
                        &mut captured.stderr,
                        &chunk[..n],
                        max_output,
                        &mut captured.truncated,
                    );
                }
            }
        }

        match child.try_wait() {
            Ok(Some(status)) => {
                if let Some(out) = stdout.as_mut() {
                    let _ = drain_to_limit(
                        out,
                        &mut captured.stdout,
                        max_output,
                        &mut captured.truncated,
                    );
                }
                if let Some(err) = stderr.as_mut() {
                    let _ = drain_to_limit(
                        err,
                        &mut captured.stderr,
                        max_output,
                        &mut captured.truncated,
                    );
                }
                captured.exit_code = status.code();
                trace!(exit_code = ?captured.exit_code, "process exited");
                return Ok(captured);
            }
            Ok(None) => {
                if !did_read {
                    thread::sleep(Duration::from_millis(5));
                }
            }
            Err(e) => {
                error!(error = %e, "failed to wait for child");
                return Err(RunnerError::Io(e));
            }
        }
    }

    // Timed out: reap whatever is left.
    captured.exit_code = child.wait().ok().and_then(|s| s.code());
    Ok(captured)
}

fn append_capped(buf: &mut Vec<u8>, data: &[u8], max: usize, truncated: &mut bool) {
    let space = max.saturating_sub(buf.len());
    if data.len() > space {
        *truncated = true;
    }
    buf.extend_from_slice(&data[..data.len().min(space)]);
}

/// Drain what is immediately readable from a stream, up to the limit.
///
/// Non-blocking so a grandchild that still holds the pipe cannot stall us.
fn drain_to_limit<R: Read + ReadFd>(
    stream: &mut R,
    buf: &mut Vec<u8>,
    max: usize,
    truncated: &mut bool,
) -> std::io::Result<()> {
    let mut chunk = vec![0u8; 8192];
    while !*truncated {
        match try_read_nonblocking(stream, &mut chunk) {
            Ok(0) => break,
            Ok(n) => append_capped(buf, &chunk[..n], max, truncated),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Kill a process with SIGTERM, then SIGKILL after grace period.
#[cfg(unix)]
fn kill_with_grace(child: &mut Child) {
    let pid = child.id() as libc::pid_t;

    // SAFETY: pid belongs to a child we spawned and have not yet reaped.
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
    debug!(pid, "sent SIGTERM");

    thread::sleep(Duration::from_millis(SIGTERM_GRACE_MS));

    match child.try_wait() {
        Ok(Some(_)) => trace!(pid, "process exited after SIGTERM"),
        Ok(None) => {
            warn!(pid, "process did not exit after SIGTERM, sending SIGKILL");
            let _ = child.kill();
            let _ = child.wait();
        }
        Err(e) => error!(pid, error = %e, "failed to check process status"),
    }
}

#[cfg(not(unix))]
fn kill_with_grace(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
use std::os::unix::io::AsRawFd as ReadFd;

#[cfg(not(unix))]
trait ReadFd {}
#[cfg(not(unix))]
impl<T> ReadFd for T {}

/// Try to read from a stream without blocking.
///
/// Sets O_NONBLOCK for the duration of the read and restores the original
/// flags. Returns Ok(0) if no data is available.
#[cfg(unix)]
fn try_read_nonblocking<R: Read + ReadFd>(
    stream: &mut R,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    let fd = stream.as_raw_fd();

    // SAFETY: fd is owned by `stream`, which outlives this call.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }

    let was_nonblocking = (flags & libc::O_NONBLOCK) != 0;
    if !was_nonblocking {
        // SAFETY: as above.
        let result = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
        if result < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }

    let result = stream.read(buf);

    if !was_nonblocking {
        // SAFETY: as above.
        unsafe {
            libc::fcntl(fd, libc::F_SETFL, flags);
        }
    }

    match result {
        Ok(n) => Ok(n),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
        Err(e) => Err(e),
    }
}

#[cfg(not(unix))]
fn try_read_nonblocking<R: Read>(stream: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    stream.read(buf)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn test_runner() -> CommandRunner {
        CommandRunner::new(RunnerConfig {
            default_timeout: Duration::from_secs(10),
            ..Default::default()
        })
    }

    #[test]
    fn test_run_echo() {
        let output = test_runner().run("echo", &["20.4:MAGISK"], None).unwrap();
        assert!(output.success());
        assert_eq!(output.stdout_str().trim(), "20.4:MAGISK");
        assert!(!output.truncated);
        assert!(!output.timed_out);
    }

    #[test]
    fn test_nonzero_exit() {
        let output = test_runner().run("sh", &["-c", "exit 1"], None).unwrap();
        assert!(!output.success());
        assert_eq!(output.exit_code, Some(1));
    }

    #[test]
    fn test_stderr_captured() {
        let output = test_runner()
            .run("sh", &["-c", "echo denied >&2"], None)
            .unwrap();
        assert!(output.stderr_str().contains("denied"));
    }

    #[test]
    fn test_missing_absolute_program() {
        let result = test_runner().run("/nonexistent/magisk", &["-v"], None);
        assert!(matches!(result, Err(RunnerError::CommandNotFound(_))));
    }

    #[test]
    fn test_missing_program_on_path() {
        let result = test_runner().run("rootenv-definitely-not-installed", &[], None);
        assert!(matches!(result, Err(RunnerError::CommandNotFound(_))));
    }

    #[test]
    fn test_shell_metachar_rejected() {
        match test_runner().run("su; reboot", &[], None) {
            Err(RunnerError::InvalidPath(_)) => {}
            other => panic!("expected InvalidPath, got {:?}", other),
        }
    }

    #[test]
    fn test_timeout_kills_child() {
        let runner = CommandRunner::new(RunnerConfig {
            default_timeout: Duration::from_millis(100),
            ..Default::default()
        });
        let output = runner.run("sleep", &["10"], None).unwrap();
        assert!(output.timed_out, "expected timeout: {:?}", output);
        assert!(output.duration < Duration::from_secs(3));
    }

    #[test]
    fn test_output_truncation() {
        let runner = CommandRunner::new(RunnerConfig {
            max_output_bytes: 100,
            ..Default::default()
        });
        let output = runner.run("sh", &["-c", "yes | head -n 1000"], None).unwrap();
        assert!(output.truncated);
        assert!(output.stdout.len() <= 100);
    }

    #[test]
    fn test_grandchild_holding_pipe_does_not_hang() {
        let start = Instant::now();
        let output = test_runner()
            .run("sh", &["-c", "(sleep 5; echo late) & exit 0"], Some(Duration::from_secs(2)))
            .unwrap();
        assert!(start.elapsed() < Duration::from_secs(4));
        assert_eq!(output.exit_code, Some(0));
    }

    #[test]
    fn test_config_defaults() {
        let config = RunnerConfig::default();
        assert_eq!(config.default_timeout, Duration::from_millis(5000));
        assert_eq!(config.max_output_bytes, 64 * 1024);
    }
}
