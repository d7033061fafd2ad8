//! Exit codes for the rootenv CLI.
//!
//! Exit code ranges:
//! - 0-1: Success/operational outcomes (parse outcome from code, not output)
//! - 10-19: User/environment errors (recoverable by user action)
//! - 20-29: Internal errors (bugs, should be reported)

use rootenv_common::{Error, ErrorCategory};

/// Exit codes for rootenv operations.
///
/// These codes are a stable contract for scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Success: nothing to report
    Clean = 0,

    /// `boot`: this is the first run since the device booted
    NewBoot = 1,

    /// Invalid arguments or configuration
    ArgsError = 10,

    /// Required capability missing (no su, no sysfs)
    CapabilityError = 11,

    /// Permission denied
    PermissionError = 12,

    /// Internal error (bug - please report)
    InternalError = 20,

    /// I/O error
    IoError = 21,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        matches!(self, ExitCode::Clean | ExitCode::NewBoot)
    }

    pub fn is_user_error(self) -> bool {
        let code = self as i32;
        (10..20).contains(&code)
    }

    pub fn is_internal_error(self) -> bool {
        let code = self as i32;
        (20..30).contains(&code)
    }

    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Clean => "CLEAN",
            ExitCode::NewBoot => "NEW_BOOT",
            ExitCode::ArgsError => "ARGS_ERROR",
            ExitCode::CapabilityError => "CAPABILITY_ERROR",
            ExitCode::PermissionError => "PERMISSION_ERROR",
            ExitCode::InternalError => "INTERNAL_ERROR",
            ExitCode::IoError => "IO_ERROR",
        }
    }

    /// Exit code for a failed command.
    pub fn for_error(error: &Error) -> Self {
        match error {
            Error::PermissionDenied(_) => ExitCode::PermissionError,
            Error::ShellUnavailable(_) => ExitCode::CapabilityError,
            _ => match error.category() {
                ErrorCategory::Config => ExitCode::ArgsError,
                ErrorCategory::Io | ErrorCategory::State => ExitCode::IoError,
                ErrorCategory::Connectivity | ErrorCategory::Platform => {
                    ExitCode::CapabilityError
                }
                ErrorCategory::Probe => ExitCode::InternalError,
            },
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ExitCode::Clean.as_i32(), 0);
        assert_eq!(ExitCode::NewBoot.as_i32(), 1);
        assert_eq!(ExitCode::ArgsError.as_i32(), 10);
        assert_eq!(ExitCode::CapabilityError.as_i32(), 11);
        assert_eq!(ExitCode::PermissionError.as_i32(), 12);
        assert_eq!(ExitCode::InternalError.as_i32(), 20);
        assert_eq!(ExitCode::IoError.as_i32(), 21);
    }

    #[test]
    fn test_ranges() {
        assert!(ExitCode::NewBoot.is_success());
        assert!(ExitCode::ArgsError.is_user_error());
        assert!(!ExitCode::IoError.is_user_error());
        assert!(ExitCode::IoError.is_internal_error());
    }

    #[test]
    fn test_for_error() {
        assert_eq!(
            ExitCode::for_error(&Error::InvalidConfig("x".into())),
            ExitCode::ArgsError
        );
        assert_eq!(
            ExitCode::for_error(&Error::ShellUnavailable("su".into())),
            ExitCode::CapabilityError
        );
        assert_eq!(
            ExitCode::for_error(&Error::StateStore("disk full".into())),
            ExitCode::IoError
        );
        assert_eq!(ExitCode::NewBoot.to_string(), "NEW_BOOT (1)");
    }
}
