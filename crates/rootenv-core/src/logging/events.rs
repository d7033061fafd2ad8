//! Stage labels and event names for structured log fields.

use serde::{Deserialize, Serialize};

/// Areas of the environment core, recorded as the `stage` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Startup and configuration.
    Init,
    /// Toolkit subprocess queries.
    Probe,
    /// Network availability tracking.
    Connectivity,
    /// Reboot detection.
    Boot,
    /// Config loading and validation.
    Config,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Init => "init",
            Stage::Probe => "probe",
            Stage::Connectivity => "connectivity",
            Stage::Boot => "boot",
            Stage::Config => "config",
        };
        write!(f, "{}", s)
    }
}

/// Standard event names used in logging.
pub mod event_names {
    // Run lifecycle
    pub const RUN_STARTED: &str = "run.started";
    pub const RUN_FINISHED: &str = "run.finished";

    // Probe
    pub const PROBE_STARTED: &str = "probe.started";
    pub const PROBE_FINISHED: &str = "probe.finished";
    pub const PROBE_APPLIED: &str = "probe.applied";
    pub const PROBE_INVALIDATED: &str = "probe.invalidated";

    // Connectivity
    pub const NET_STARTED: &str = "connectivity.started";
    pub const NET_CHANGED: &str = "connectivity.changed";
    pub const NET_STOPPED: &str = "connectivity.stopped";

    // Boot
    pub const BOOT_CHECKED: &str = "boot.checked";

    // Config
    pub const CONFIG_LOADED: &str = "config.loaded";
    pub const CONFIG_DEFAULT_USED: &str = "config.default_used";
    pub const CONFIG_ERROR: &str = "config.error";

    pub const INTERNAL_ERROR: &str = "internal_error";
}

/// Correlation fields shared by every event of one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogContext {
    pub run_id: String,
}

impl LogContext {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
        }
    }
}
