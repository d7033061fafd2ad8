//! Error types for rootenv.
//!
//! This module provides structured error handling with:
//! - Stable error codes for machine parsing
//! - Category classification for error grouping
//! - Recoverability hints for automation
//! - Remediation suggestions for humans
//!
//! # Human-Facing Output
//!
//! ```text
//! ✗ Invalid Configuration
//!   Reason: invalid configuration: probe.min_version_code must be positive
//!   Fix: Run 'rootenv config validate' and correct the reported field.
//! ```
//!
//! # Agent-Facing Output
//!
//! ```json
//! {
//!   "code": 11,
//!   "category": "config",
//!   "message": "invalid configuration: probe.min_version_code must be positive",
//!   "recoverable": true
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for rootenv operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration file errors.
    Config,
    /// Toolkit probing errors.
    Probe,
    /// Persisted state errors.
    State,
    /// Connectivity observation errors.
    Connectivity,
    /// File I/O and serialization errors.
    Io,
    /// Platform and privilege errors.
    Platform,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Probe => write!(f, "probe"),
            ErrorCategory::State => write!(f, "state"),
            ErrorCategory::Connectivity => write!(f, "connectivity"),
            ErrorCategory::Io => write!(f, "io"),
            ErrorCategory::Platform => write!(f, "platform"),
        }
    }
}

/// Unified error type for rootenv.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // Probe errors (20-29)
    #[error("environment probe failed: {0}")]
    ProbeFailed(String),

    #[error("environment probe was abandoned before producing a snapshot")]
    ProbeAbandoned,

    #[error("privileged shell unavailable: {0}")]
    ShellUnavailable(String),

    // State errors (30-39)
    #[error("state store error: {0}")]
    StateStore(String),

    #[error("boot identifier unreadable at {path}")]
    BootIdUnreadable { path: String },

    // Connectivity errors (40-49)
    #[error("connectivity observer error: {0}")]
    Connectivity(String),

    // I/O errors (60-69)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Platform errors (70-79)
    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

impl Error {
    /// Returns the error code for this error type.
    ///
    /// Error codes are stable and grouped by category:
    /// - 10-19: Configuration errors
    /// - 20-29: Probe errors
    /// - 30-39: State errors
    /// - 40-49: Connectivity errors
    /// - 60-69: I/O errors
    /// - 70-79: Platform errors
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::InvalidConfig(_) => 11,
            Error::ProbeFailed(_) => 20,
            Error::ProbeAbandoned => 21,
            Error::ShellUnavailable(_) => 22,
            Error::StateStore(_) => 30,
            Error::BootIdUnreadable { .. } => 31,
            Error::Connectivity(_) => 40,
            Error::Io(_) => 60,
            Error::Json(_) => 61,
            Error::PermissionDenied(_) => 71,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) | Error::InvalidConfig(_) => ErrorCategory::Config,
            Error::ProbeFailed(_) | Error::ProbeAbandoned | Error::ShellUnavailable(_) => {
                ErrorCategory::Probe
            }
            Error::StateStore(_) | Error::BootIdUnreadable { .. } => ErrorCategory::State,
            Error::Connectivity(_) => ErrorCategory::Connectivity,
            Error::Io(_) | Error::Json(_) => ErrorCategory::Io,
            Error::PermissionDenied(_) => ErrorCategory::Platform,
        }
    }

    /// Returns whether this error is potentially recoverable.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Config(_) | Error::InvalidConfig(_) => true,

            // Probes are retried on the next cache read
            Error::ProbeFailed(_) | Error::ProbeAbandoned => true,
            Error::ShellUnavailable(_) => true,

            Error::StateStore(_) => true,
            Error::BootIdUnreadable { .. } => false,

            Error::Connectivity(_) => true,

            Error::Io(_) => true,
            Error::Json(_) => true,

            Error::PermissionDenied(_) => true,
        }
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::Config(_) => {
                "Check config.toml syntax, or run 'rootenv config show' to see defaults."
            }
            Error::InvalidConfig(_) => {
                "Run 'rootenv config validate' and correct the reported field."
            }
            Error::ProbeFailed(_) => "Retry with 'rootenv probe'.",
            Error::ProbeAbandoned => {
                "The probe was interrupted. Retry with 'rootenv probe' and report if persistent."
            }
            Error::ShellUnavailable(_) => {
                "Ensure the su binary is installed and shell.su_path points at it."
            }
            Error::StateStore(_) => {
                "Check that the state file directory is writable, or point state.path elsewhere."
            }
            Error::BootIdUnreadable { .. } => {
                "The boot identifier is not exposed here; reboot detection is disabled."
            }
            Error::Connectivity(_) => {
                "Check that connectivity.sysfs_dir exists, or set connectivity.source to 'manual'."
            }
            Error::Io(_) => {
                "Check disk space and permissions on the config and state directories."
            }
            Error::Json(_) => "Invalid JSON in state file. Delete it to reset persisted state.",
            Error::PermissionDenied(_) => "Grant root access to the calling process and retry.",
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::Config(_) => "Configuration Error",
            Error::InvalidConfig(_) => "Invalid Configuration",
            Error::ProbeFailed(_) => "Probe Failed",
            Error::ProbeAbandoned => "Probe Abandoned",
            Error::ShellUnavailable(_) => "Privileged Shell Unavailable",
            Error::StateStore(_) => "State Store Error",
            Error::BootIdUnreadable { .. } => "Boot Identifier Unreadable",
            Error::Connectivity(_) => "Connectivity Error",
            Error::Io(_) => "I/O Error",
            Error::Json(_) => "JSON Parse Error",
            Error::PermissionDenied(_) => "Permission Denied",
        }
    }

    /// Format for human consumption: headline, reason, and fix.
    pub fn format_human(&self) -> String {
        format!(
            "✗ {}\n  Reason: {}\n  Fix: {}",
            self.headline(),
            self,
            self.remediation()
        )
    }
}

/// Structured error response for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Stable error code.
    pub code: u32,

    /// Error category for grouping.
    pub category: ErrorCategory,

    /// Human-readable error message.
    pub message: String,

    /// Whether the error is potentially recoverable.
    pub recoverable: bool,

    /// Remediation hint.
    pub remediation: String,

    /// Additional structured context (e.g., file path).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        let mut context = HashMap::new();

        if let Error::BootIdUnreadable { path } = err {
            context.insert("path".to_string(), serde_json::json!(path));
        }

        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            remediation: err.remediation().to_string(),
            context,
        }
    }
}

impl StructuredError {
    /// Add additional context to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"code":{},"error":"serialization_failed"}}"#, self.code)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_match_categories() {
        let cases = [
            (Error::Config("x".into()), ErrorCategory::Config),
            (Error::ProbeAbandoned, ErrorCategory::Probe),
            (Error::StateStore("x".into()), ErrorCategory::State),
            (Error::Connectivity("x".into()), ErrorCategory::Connectivity),
            (Error::PermissionDenied("x".into()), ErrorCategory::Platform),
        ];
        for (err, category) in cases {
            assert_eq!(err.category(), category, "{err}");
            let range_start = match category {
                ErrorCategory::Config => 10,
                ErrorCategory::Probe => 20,
                ErrorCategory::State => 30,
                ErrorCategory::Connectivity => 40,
                ErrorCategory::Io => 60,
                ErrorCategory::Platform => 70,
            };
            assert!((range_start..range_start + 10).contains(&err.code()));
        }
    }

    #[test]
    fn test_structured_error_carries_path() {
        let err = Error::BootIdUnreadable {
            path: "/proc/sys/kernel/random/boot_id".into(),
        };
        let structured = StructuredError::from(&err);
        assert_eq!(structured.code, 31);
        assert!(!structured.recoverable);
        assert_eq!(
            structured.context.get("path"),
            Some(&serde_json::json!("/proc/sys/kernel/random/boot_id"))
        );
        assert!(structured.to_json().contains(r#""category":"state""#));
    }

    #[test]
    fn test_format_human() {
        let text = Error::InvalidConfig("probe.timeout_ms must be positive".into()).format_human();
        assert!(text.starts_with("✗ Invalid Configuration"));
        assert!(text.contains("Fix: Run 'rootenv config validate'"));
    }
}
