//! Conversions from module errors into the workspace [`rootenv_common::Error`].

use crate::boot::BootIdError;
use crate::config::ConfigError;
use crate::connectivity::ConnectivityError;
use crate::probe::ProbeError;
use crate::shell::runner::RunnerError;
use crate::shell::ShellError;
use crate::store::StoreError;
use rootenv_common::Error;

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation(msg) => Error::InvalidConfig(msg),
            ConfigError::Io { source, .. }
                if source.kind() == std::io::ErrorKind::PermissionDenied =>
            {
                Error::PermissionDenied(source.to_string())
            }
            other => Error::Config(other.to_string()),
        }
    }
}

impl From<ProbeError> for Error {
    fn from(err: ProbeError) -> Self {
        match err {
            ProbeError::Abandoned => Error::ProbeAbandoned,
            ProbeError::Apply(store) => store.into(),
        }
    }
}

impl From<ShellError> for Error {
    fn from(err: ShellError) -> Self {
        match err {
            ShellError::Runner(RunnerError::CommandNotFound(cmd)) => Error::ShellUnavailable(cmd),
            other => Error::ProbeFailed(other.to_string()),
        }
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::Io { source, .. }
                if source.kind() == std::io::ErrorKind::PermissionDenied =>
            {
                Error::PermissionDenied(err.to_string())
            }
            _ => Error::StateStore(err.to_string()),
        }
    }
}

impl From<BootIdError> for Error {
    fn from(err: BootIdError) -> Self {
        match err {
            BootIdError::Io { path, .. } | BootIdError::Empty { path } => Error::BootIdUnreadable {
                path: path.display().to_string(),
            },
        }
    }
}

impl From<ConnectivityError> for Error {
    fn from(err: ConnectivityError) -> Self {
        Error::Connectivity(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_validation_maps_to_invalid_config() {
        let err: Error = ConfigError::Validation("bad".into()).into();
        assert_eq!(err.code(), 11);
    }

    #[test]
    fn test_missing_su_maps_to_shell_unavailable() {
        let err: Error = ShellError::Runner(RunnerError::CommandNotFound("su".into())).into();
        assert!(matches!(err, Error::ShellUnavailable(_)));
    }

    #[test]
    fn test_store_permission_denied() {
        let err: Error = StoreError::Io {
            path: PathBuf::from("/state.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope"),
        }
        .into();
        assert!(matches!(err, Error::PermissionDenied(_)));
    }

    #[test]
    fn test_probe_abandoned() {
        let err: Error = ProbeError::Abandoned.into();
        assert_eq!(err.code(), 21);
    }
}
