//! Persisted environment state.
//!
//! Two durable values are owned by this crate: the toolkit's hide-feature flag
//! (written after each probe) and the last-seen boot identifier (written by
//! the reboot detector). [`FileStateStore`] keeps both in one JSON document
//! that is replaced atomically on every write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Schema version of the state document.
pub const STATE_SCHEMA_VERSION: u32 = 1;

/// Default state file name under the data directory.
pub const STATE_FILE_NAME: &str = "state.json";

/// Errors from the state store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt state file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported state schema version {found} in {path}")]
    SchemaVersion { path: PathBuf, found: u32 },
}

/// Durable key-value entries read and written by the environment core.
pub trait StateStore: Send + Sync {
    fn hide_enabled(&self) -> Result<bool, StoreError>;
    fn set_hide_enabled(&self, enabled: bool) -> Result<(), StoreError>;
    fn boot_id(&self) -> Result<Option<String>, StoreError>;
    fn set_boot_id(&self, boot_id: &str) -> Result<(), StoreError>;
}

/// On-disk document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub schema_version: u32,
    #[serde(default)]
    pub hide_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            hide_enabled: false,
            boot_id: None,
            updated_at: None,
        }
    }
}

/// JSON-file backed store.
///
/// Reads go to disk every time so a value written by another process is
/// picked up; writes are serialized in-process and land via temp file + rename.
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// `<data_local_dir>/rootenv/state.json`, falling back to the working directory.
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rootenv")
            .join(STATE_FILE_NAME)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document; a missing file yields defaults.
    pub fn load(&self) -> Result<PersistedState, StoreError> {
        if !self.path.exists() {
            trace!(path = %self.path.display(), "state file absent, using defaults");
            return Ok(PersistedState::default());
        }

        let file = File::open(&self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        let state: PersistedState =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| StoreError::Parse {
                path: self.path.clone(),
                source,
            })?;

        if state.schema_version != STATE_SCHEMA_VERSION {
            return Err(StoreError::SchemaVersion {
                path: self.path.clone(),
                found: state.schema_version,
            });
        }
        Ok(state)
    }

    /// Read-modify-write. An unreadable document is replaced, starting from defaults.
    fn update(&self, mutate: impl FnOnce(&mut PersistedState)) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut state = match self.load() {
            Ok(state) => state,
            Err(err @ (StoreError::Parse { .. } | StoreError::SchemaVersion { .. })) => {
                warn!(error = %err, "replacing unreadable state file");
                PersistedState::default()
            }
            Err(err) => return Err(err),
        };
        mutate(&mut state);
        state.updated_at = Some(Utc::now());
        self.write(&state)
    }

    fn write(&self, state: &PersistedState) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let tmp_path = self.path.with_extension("json.tmp");
        {
            let file = File::create(&tmp_path).map_err(io_err)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, state).map_err(|source| StoreError::Parse {
                path: tmp_path.clone(),
                source,
            })?;
            writer.flush().map_err(io_err)?;
        }
        fs::rename(&tmp_path, &self.path).map_err(io_err)?;
        debug!(path = %self.path.display(), "state file written");
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn hide_enabled(&self) -> Result<bool, StoreError> {
        Ok(self.load()?.hide_enabled)
    }

    fn set_hide_enabled(&self, enabled: bool) -> Result<(), StoreError> {
        self.update(|state| state.hide_enabled = enabled)
    }

    fn boot_id(&self) -> Result<Option<String>, StoreError> {
        Ok(self.load()?.boot_id)
    }

    fn set_boot_id(&self, boot_id: &str) -> Result<(), StoreError> {
        self.update(|state| state.boot_id = Some(boot_id.to_string()))
    }
}

/// In-memory store for tests and embedders that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<PersistedState>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a previously persisted boot identifier.
    pub fn with_boot_id(boot_id: impl Into<String>) -> Self {
        let store = Self::default();
        store.lock().boot_id = Some(boot_id.into());
        store
    }

    pub fn snapshot(&self) -> PersistedState {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PersistedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StateStore for MemoryStateStore {
    fn hide_enabled(&self) -> Result<bool, StoreError> {
        Ok(self.lock().hide_enabled)
    }

    fn set_hide_enabled(&self, enabled: bool) -> Result<(), StoreError> {
        self.lock().hide_enabled = enabled;
        Ok(())
    }

    fn boot_id(&self) -> Result<Option<String>, StoreError> {
        Ok(self.lock().boot_id.clone())
    }

    fn set_boot_id(&self, boot_id: &str) -> Result<(), StoreError> {
        self.lock().boot_id = Some(boot_id.to_string());
        Ok(())
    }
}
