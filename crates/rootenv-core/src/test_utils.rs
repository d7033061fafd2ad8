//! Test utilities for rootenv-core.
//!
//! [`ScriptedShell`] stands in for the privileged shell so probe behavior can
//! be exercised without a rooted device. Available to unit tests and, with the
//! `test-utils` feature, to downstream crates.

use crate::shell::runner::RunnerError;
use crate::shell::{PrivilegedShell, ShellError, ShellOutput};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Scripted {
    Output(ShellOutput),
    Failure,
}

/// Fake [`PrivilegedShell`] answering from a fixed script.
///
/// Commands without a script entry fail as if the binary were missing.
#[derive(Debug)]
pub struct ScriptedShell {
    has_root: bool,
    script: HashMap<String, Scripted>,
    delay: Option<Duration>,
    calls: Mutex<HashMap<String, usize>>,
    root_checks: AtomicUsize,
}

impl ScriptedShell {
    pub fn new(has_root: bool) -> Self {
        Self {
            has_root,
            script: HashMap::new(),
            delay: None,
            calls: Mutex::new(HashMap::new()),
            root_checks: AtomicUsize::new(0),
        }
    }

    /// Answer `command` with `stdout` and `exit_code`.
    pub fn with_output(mut self, command: &str, stdout: &str, exit_code: i32) -> Self {
        self.script.insert(
            command.to_string(),
            Scripted::Output(ShellOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                exit_code: Some(exit_code),
            }),
        );
        self
    }

    /// Make `command` fail to launch.
    pub fn with_failure(mut self, command: &str) -> Self {
        self.script.insert(command.to_string(), Scripted::Failure);
        self
    }

    /// Sleep before answering each command.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of times `command` was run.
    pub fn calls(&self, command: &str) -> usize {
        self.lock_calls().get(command).copied().unwrap_or(0)
    }

    /// Total commands run across all scripts.
    pub fn total_calls(&self) -> usize {
        self.lock_calls().values().sum()
    }

    pub fn root_checks(&self) -> usize {
        self.root_checks.load(Ordering::SeqCst)
    }

    fn lock_calls(&self) -> std::sync::MutexGuard<'_, HashMap<String, usize>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PrivilegedShell for ScriptedShell {
    fn run(&self, command: &str) -> Result<ShellOutput, ShellError> {
        *self.lock_calls().entry(command.to_string()).or_insert(0) += 1;
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        match self.script.get(command) {
            Some(Scripted::Output(output)) => Ok(output.clone()),
            Some(Scripted::Failure) | None => Err(ShellError::Runner(
                RunnerError::CommandNotFound(command.to_string()),
            )),
        }
    }

    fn has_root(&self) -> bool {
        self.root_checks.fetch_add(1, Ordering::SeqCst);
        self.has_root
    }
}

/// A healthy, rooted toolkit at `version_code` with the hide feature on.
pub fn toolkit_shell(version: &str, version_code: i32) -> ScriptedShell {
    ScriptedShell::new(true)
        .with_output("magisk -v", &format!("{}:MAGISK\n", version), 0)
        .with_output("magisk -V", &format!("{}\n", version_code), 0)
        .with_output("magiskhide --status", "MagiskHide is enabled\n", 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unscripted_command_fails() {
        let shell = ScriptedShell::new(false);
        assert!(shell.run("magisk -v").is_err());
        assert_eq!(shell.calls("magisk -v"), 1);
    }

    #[test]
    fn test_toolkit_shell_answers() {
        let shell = toolkit_shell("21.0", 21000);
        let out = shell.run("magisk -V").unwrap();
        assert_eq!(out.stdout.trim(), "21000");
        assert!(shell.has_root());
        assert_eq!(shell.root_checks(), 1);
        assert_eq!(shell.total_calls(), 1);
    }
}
