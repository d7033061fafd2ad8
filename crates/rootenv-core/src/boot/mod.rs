//! Reboot detection.
//!
//! The kernel publishes a random identifier that changes on every boot. A
//! [`RebootDetector`] compares it with the identifier persisted by the
//! previous run and remembers the answer for its own lifetime, so everything
//! that asks during one run sees the same result.

use crate::logging::{event_names, Stage};
use crate::store::StateStore;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Kernel boot identifier on Linux.
pub const DEFAULT_BOOT_ID_PATH: &str = "/proc/sys/kernel/random/boot_id";

/// Errors reading the boot identifier.
#[derive(Debug, Error)]
pub enum BootIdError {
    #[error("failed to read boot id from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("boot id source {path} is empty")]
    Empty { path: PathBuf },
}

/// Read the first line of the boot-id source, trimmed.
pub fn read_boot_id(path: &Path) -> Result<String, BootIdError> {
    let contents = fs::read_to_string(path).map_err(|source| BootIdError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let id = contents.lines().next().unwrap_or("").trim();
    if id.is_empty() {
        return Err(BootIdError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(id.to_string())
}

/// Once-per-instance "is this the first run since boot" check.
pub struct RebootDetector {
    boot_id_path: PathBuf,
    store: Arc<dyn StateStore>,
    answer: OnceLock<bool>,
}

impl RebootDetector {
    pub fn new(boot_id_path: impl Into<PathBuf>, store: Arc<dyn StateStore>) -> Self {
        Self {
            boot_id_path: boot_id_path.into(),
            store,
            answer: OnceLock::new(),
        }
    }

    pub fn boot_id_path(&self) -> &Path {
        &self.boot_id_path
    }

    /// True when the current boot id differs from the persisted one.
    ///
    /// Evaluated once; later calls return the memoized answer even if the
    /// source or the store changes.
    pub fn is_new_boot(&self) -> bool {
        *self.answer.get_or_init(|| self.evaluate())
    }

    /// The memoized answer, if already evaluated.
    pub fn evaluated(&self) -> Option<bool> {
        self.answer.get().copied()
    }

    fn evaluate(&self) -> bool {
        let current = match read_boot_id(&self.boot_id_path) {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "boot id unavailable, assuming same boot");
                return false;
            }
        };

        let previous = match self.store.boot_id() {
            Ok(previous) => previous,
            Err(e) => {
                warn!(error = %e, "persisted boot id unreadable, treating as first boot");
                None
            }
        };

        if previous.as_deref() == Some(current.as_str()) {
            debug!(
                event = event_names::BOOT_CHECKED,
                stage = %Stage::Boot,
                boot_id = %current,
                new_boot = false,
                "boot id unchanged"
            );
            return false;
        }

        info!(
            event = event_names::BOOT_CHECKED,
            stage = %Stage::Boot,
            boot_id = %current,
            previous = ?previous,
            new_boot = true,
            "new boot detected"
        );
        if let Err(e) = self.store.set_boot_id(&current) {
            warn!(error = %e, "failed to persist boot id");
        }
        true
    }
}

impl std::fmt::Debug for RebootDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RebootDetector")
            .field("boot_id_path", &self.boot_id_path)
            .field("answer", &self.answer.get())
            .finish_non_exhaustive()
    }
}
