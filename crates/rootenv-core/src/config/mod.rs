//! Configuration loading and validation for rootenv-core.
//!
//! This module handles:
//! - The `config.toml` document and its built-in defaults
//! - Config resolution order (CLI > env > XDG > defaults)
//! - Semantic validation (positive timeouts, non-empty commands)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::boot::DEFAULT_BOOT_ID_PATH;
use crate::connectivity::{DEFAULT_POLL_INTERVAL_MS, DEFAULT_SYSFS_NET_DIR};
use crate::logging::{event_names, Stage};
use crate::shell::runner::{DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_TIMEOUT_MS};
use crate::store::FileStateStore;

/// Config directory name under the XDG config home.
const CONFIG_DIR_NAME: &str = "rootenv";

/// Config file name inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Environment variable overriding the config directory.
pub const CONFIG_DIR_ENV: &str = "ROOTENV_CONFIG_DIR";

/// Lowest toolkit version code whose reported code is trusted.
pub const DEFAULT_MIN_VERSION_CODE: i32 = 19000;

/// Errors that can occur during config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Invalid TOML in config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Semantic validation failed: {0}")]
    Validation(String),

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Toolkit probe commands and gating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProbeConfig {
    pub version_command: String,
    /// Only the text before the first delimiter is kept.
    pub version_delimiter: String,
    pub version_code_command: String,
    pub hide_status_command: String,
    pub min_version_code: i32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            version_command: "magisk -v".to_string(),
            version_delimiter: ":".to_string(),
            version_code_command: "magisk -V".to_string(),
            hide_status_command: "magiskhide --status".to_string(),
            min_version_code: DEFAULT_MIN_VERSION_CODE,
        }
    }
}

/// Privileged shell invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShellConfig {
    pub su_path: String,
    pub timeout_ms: u64,
    pub max_output_bytes: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            su_path: "su".to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

impl ShellConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Which reachability source backs the connectivity observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Poll interface link state in sysfs.
    #[default]
    Sysfs,
    /// Events are pushed by the embedding application.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectivityConfig {
    pub source: SourceKind,
    pub sysfs_dir: PathBuf,
    pub poll_interval_ms: u64,
    /// How long `status` waits for the first reachability event.
    pub settle_timeout_ms: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Sysfs,
            sysfs_dir: PathBuf::from(DEFAULT_SYSFS_NET_DIR),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            settle_timeout_ms: 500,
        }
    }
}

impl ConnectivityConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BootConfig {
    pub boot_id_path: PathBuf,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            boot_id_path: PathBuf::from(DEFAULT_BOOT_ID_PATH),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StateConfig {
    /// State file location; defaults under the user data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StateConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(FileStateStore::default_path)
    }
}

/// The whole `config.toml` document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub probe: ProbeConfig,
    pub shell: ShellConfig,
    pub connectivity: ConnectivityConfig,
    pub boot: BootConfig,
    pub state: StateConfig,
}

impl AppConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a specific file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content, path)
    }

    /// Semantic checks serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let probe = &self.probe;
        if probe.min_version_code <= 0 {
            return Err(ConfigError::Validation(format!(
                "probe.min_version_code must be positive, got {}",
                probe.min_version_code
            )));
        }
        for (field, value) in [
            ("probe.version_command", &probe.version_command),
            ("probe.version_code_command", &probe.version_code_command),
            ("probe.hide_status_command", &probe.hide_status_command),
            ("probe.version_delimiter", &probe.version_delimiter),
            ("shell.su_path", &self.shell.su_path),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation(format!("{} must not be empty", field)));
            }
        }
        if self.shell.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "shell.timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.shell.max_output_bytes == 0 {
            return Err(ConfigError::Validation(
                "shell.max_output_bytes must be greater than 0".to_string(),
            ));
        }
        if self.connectivity.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "connectivity.poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Configuration resolution options.
#[derive(Debug, Default, Clone)]
pub struct ConfigOptions {
    /// Explicit config directory (highest priority).
    pub config_dir: Option<PathBuf>,
}

/// Loaded configuration with provenance.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: AppConfig,
    /// File the config was read from (None if using defaults).
    pub path: Option<PathBuf>,
    /// The config directory used for resolution.
    pub config_dir: PathBuf,
}

/// Load configuration with the standard resolution order.
///
/// Resolution order (highest to lowest priority):
/// 1. Explicit CLI flag (via ConfigOptions)
/// 2. Environment variable (ROOTENV_CONFIG_DIR)
/// 3. XDG config home (~/.config/rootenv/)
/// 4. Built-in defaults
pub fn load_config(options: &ConfigOptions) -> Result<ResolvedConfig, ConfigError> {
    let config_dir = resolve_config_dir(options);
    let path = config_dir.join(CONFIG_FILE_NAME);

    if path.exists() {
        let config = AppConfig::from_file(&path).map_err(|e| {
            warn!(
                event = event_names::CONFIG_ERROR,
                stage = %Stage::Config,
                path = %path.display(),
                error = %e,
                "config rejected"
            );
            e
        })?;
        debug!(
            event = event_names::CONFIG_LOADED,
            stage = %Stage::Config,
            path = %path.display(),
            "config loaded"
        );
        return Ok(ResolvedConfig {
            config,
            path: Some(path),
            config_dir,
        });
    }

    debug!(
        event = event_names::CONFIG_DEFAULT_USED,
        stage = %Stage::Config,
        dir = %config_dir.display(),
        "no config file, using defaults"
    );
    Ok(ResolvedConfig {
        config: AppConfig::default(),
        path: None,
        config_dir,
    })
}

/// Resolve the config directory using the standard resolution order.
pub fn resolve_config_dir(options: &ConfigOptions) -> PathBuf {
    if let Some(dir) = &options.config_dir {
        return dir.clone();
    }

    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        return PathBuf::from(dir);
    }

    let xdg_config = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config")
        });

    xdg_config.join(CONFIG_DIR_NAME)
}
