//! Cached probe of the privileged toolkit.
//!
//! [`EnvironmentProbe`] answers "is the toolkit installed, which version, is
//! the hide feature on" without spawning privileged subprocesses on every
//! query. The snapshot is computed on first access and kept until
//! [`EnvironmentProbe::invalidate`] is called (e.g. after the toolkit was
//! installed or removed).
//!
//! Each of the three commands degrades independently: a failure to run or
//! parse one leaves that field at its default and never aborts the snapshot.
//!
//! Persisting the hide flag is a separate, explicit step ([`EnvironmentProbe::apply`]).
//! [`EnvironmentProbe::current_applied`] does it at most once per snapshot, so a
//! flag toggled after the probe is not overwritten by a cache hit.

mod snapshot;

pub use snapshot::{EnvironmentSnapshot, ProbeReadings, UNKNOWN_VERSION_CODE};

use crate::cache::{CacheError, LazyProbeCache};
use crate::config::ProbeConfig;
use crate::logging::{event_names, Stage};
use crate::shell::{PrivilegedShell, ShellOutput};
use crate::store::{StateStore, StoreError};
use std::convert::Infallible;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors surfaced by the probe.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("environment probe was abandoned before producing a snapshot")]
    Abandoned,

    #[error("failed to persist probe result: {0}")]
    Apply(#[from] StoreError),
}

/// Memoized toolkit probe.
pub struct EnvironmentProbe {
    cache: LazyProbeCache<EnvironmentSnapshot, Infallible>,
    store: Arc<dyn StateStore>,
    last_applied: Mutex<Option<Arc<EnvironmentSnapshot>>>,
}

impl EnvironmentProbe {
    pub fn new(
        shell: Arc<dyn PrivilegedShell>,
        store: Arc<dyn StateStore>,
        config: ProbeConfig,
    ) -> Self {
        let cache = LazyProbeCache::new(move || Ok(probe_environment(shell.as_ref(), &config)));
        Self {
            cache,
            store,
            last_applied: Mutex::new(None),
        }
    }

    /// The current snapshot, probing on first access.
    pub fn current(&self) -> Result<Arc<EnvironmentSnapshot>, ProbeError> {
        self.cache.get().map_err(|e| match e {
            CacheError::Failed(never) => match *never {},
            CacheError::Abandoned => ProbeError::Abandoned,
        })
    }

    /// The cached snapshot, if one exists. Never probes.
    pub fn cached(&self) -> Option<Arc<EnvironmentSnapshot>> {
        self.cache.peek()
    }

    /// Force the next [`current`](Self::current) to re-probe.
    pub fn invalidate(&self) {
        info!(
            event = event_names::PROBE_INVALIDATED,
            stage = %Stage::Probe,
            "environment snapshot invalidated"
        );
        self.cache.invalidate();
    }

    /// Write the snapshot's hide flag into persisted state.
    pub fn apply(&self, snapshot: &EnvironmentSnapshot) -> Result<(), ProbeError> {
        self.store.set_hide_enabled(snapshot.hide_enabled)?;
        debug!(
            event = event_names::PROBE_APPLIED,
            stage = %Stage::Probe,
            hide_enabled = snapshot.hide_enabled,
            "hide flag persisted"
        );
        Ok(())
    }

    /// The current snapshot, applied the first time it is seen.
    ///
    /// Returns the snapshot and whether this call persisted it. A cached
    /// snapshot that was already applied is returned without touching the store.
    pub fn current_applied(&self) -> Result<(Arc<EnvironmentSnapshot>, bool), ProbeError> {
        let snapshot = self.current()?;
        let mut last = self.last_applied.lock().unwrap_or_else(PoisonError::into_inner);
        if last.as_ref().is_some_and(|prev| Arc::ptr_eq(prev, &snapshot)) {
            return Ok((snapshot, false));
        }
        self.apply(&snapshot)?;
        *last = Some(Arc::clone(&snapshot));
        Ok((snapshot, true))
    }
}

impl std::fmt::Debug for EnvironmentProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentProbe")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// Run all three toolkit queries plus the privilege check and classify.
pub fn probe_environment(
    shell: &dyn PrivilegedShell,
    config: &ProbeConfig,
) -> EnvironmentSnapshot {
    let start = Instant::now();
    info!(
        event = event_names::PROBE_STARTED,
        stage = %Stage::Probe,
        "probing toolkit environment"
    );

    let version_string =
        read_version_string(shell, &config.version_command, &config.version_delimiter);
    let raw_version_code = read_version_code(shell, &config.version_code_command);
    let has_root = shell.has_root();
    let hide_enabled = read_hide_status(shell, &config.hide_status_command);

    let snapshot = EnvironmentSnapshot::classify(
        ProbeReadings {
            version_string,
            raw_version_code,
            hide_enabled,
            has_root,
        },
        config.min_version_code,
    );

    info!(
        event = event_names::PROBE_FINISHED,
        stage = %Stage::Probe,
        summary = %snapshot.summary(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "environment probe complete"
    );
    snapshot
}

fn run_probe(shell: &dyn PrivilegedShell, command: &str) -> Option<ShellOutput> {
    match shell.run(command) {
        Ok(output) => Some(output),
        Err(e) => {
            warn!(command, error = %e, "probe command failed");
            None
        }
    }
}

/// Last non-empty line of the output, trimmed.
fn last_line(stdout: &str) -> &str {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .unwrap_or("")
}

/// First delimiter-separated segment of the version output; empty on failure.
pub fn read_version_string(
    shell: &dyn PrivilegedShell,
    command: &str,
    delimiter: &str,
) -> String {
    match run_probe(shell, command) {
        Some(output) if output.success() => parse_version_string(&output.stdout, delimiter),
        Some(output) => {
            debug!(command, exit_code = ?output.exit_code, "version query exited non-zero");
            String::new()
        }
        None => String::new(),
    }
}

/// Parsed version code; -1 on failure.
pub fn read_version_code(shell: &dyn PrivilegedShell, command: &str) -> i32 {
    match run_probe(shell, command) {
        Some(output) if output.success() => parse_version_code(&output.stdout),
        Some(output) => {
            debug!(command, exit_code = ?output.exit_code, "version code query exited non-zero");
            UNKNOWN_VERSION_CODE
        }
        None => UNKNOWN_VERSION_CODE,
    }
}

/// Exit code 0 means the hide feature is enabled.
pub fn read_hide_status(shell: &dyn PrivilegedShell, command: &str) -> bool {
    run_probe(shell, command).is_some_and(|output| output.success())
}

/// `"20.4:MAGISK\n"` with delimiter `":"` → `"20.4"`.
pub fn parse_version_string(stdout: &str, delimiter: &str) -> String {
    let line = last_line(stdout);
    line.split(delimiter)
        .next()
        .unwrap_or("")
        .trim()
        .to_string()
}

/// `"20400\n"` → `20400`; anything unparseable → -1.
pub fn parse_version_code(stdout: &str) -> i32 {
    last_line(stdout)
        .parse::<i32>()
        .unwrap_or(UNKNOWN_VERSION_CODE)
}
