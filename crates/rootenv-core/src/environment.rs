//! Process-wide environment state.
//!
//! [`EnvironmentState`] is built once by the composition root and shared by
//! reference. It owns the cached toolkit probe, the connectivity observer and
//! the reboot detector, and derives which toolkit features the UI may offer.

use crate::boot::RebootDetector;
use crate::config::{AppConfig, SourceKind};
use crate::connectivity::{
    ConnectivityObserver, ManualHandle, ManualSource, ReachabilitySource, SysfsLinkSource,
};
use crate::probe::{EnvironmentProbe, EnvironmentSnapshot, ProbeError};
use crate::shell::{effective_uid, PrivilegedShell, SuShell};
use crate::store::{FileStateStore, StateStore, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Android assigns each user a block of this many uids.
const PER_USER_UID_RANGE: u32 = 100_000;

/// Which toolkit features may be offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    /// Toolkit-specific settings sections.
    pub toolkit_sections: bool,
    /// Hiding or restoring the manager app; needs the toolkit, the primary
    /// user and a network connection.
    pub manager_hide: bool,
}

impl Availability {
    pub fn evaluate(snapshot: &EnvironmentSnapshot, uid: u32, connected: bool) -> Self {
        let primary_user = uid / PER_USER_UID_RANGE == 0;
        Self {
            toolkit_sections: snapshot.is_active,
            manager_hide: snapshot.is_active && primary_user && connected,
        }
    }
}

/// Everything `status` reports, in one serializable record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub snapshot: EnvironmentSnapshot,
    pub connected: bool,
    pub new_boot: bool,
    /// Persisted hide flag, which may differ from the snapshot after a toggle.
    pub hide_enabled: bool,
    pub availability: Availability,
    pub generated_at: DateTime<Utc>,
}

/// Shared view of the toolkit, network and boot state.
pub struct EnvironmentState {
    probe: EnvironmentProbe,
    connectivity: ConnectivityObserver,
    reboot: RebootDetector,
    store: Arc<dyn StateStore>,
    manual: Option<ManualHandle>,
    settle_timeout: Duration,
}

impl EnvironmentState {
    /// Assemble from explicit collaborators.
    pub fn new(
        shell: Arc<dyn PrivilegedShell>,
        store: Arc<dyn StateStore>,
        source: Arc<dyn ReachabilitySource>,
        config: &AppConfig,
    ) -> Self {
        Self {
            probe: EnvironmentProbe::new(shell, Arc::clone(&store), config.probe.clone()),
            connectivity: ConnectivityObserver::new(source),
            reboot: RebootDetector::new(config.boot.boot_id_path.clone(), Arc::clone(&store)),
            store,
            manual: None,
            settle_timeout: config.connectivity.settle_timeout(),
        }
    }

    /// Production wiring: `su`-backed shell, file state store, configured
    /// reachability source.
    pub fn from_config(config: &AppConfig) -> Self {
        let shell = Arc::new(SuShell::new(
            config.shell.su_path.clone(),
            config.shell.timeout(),
            config.shell.max_output_bytes,
        ));
        let store = Arc::new(FileStateStore::new(config.state.resolved_path()));

        let mut manual = None;
        let source: Arc<dyn ReachabilitySource> = match config.connectivity.source {
            SourceKind::Sysfs => Arc::new(SysfsLinkSource::new(
                config.connectivity.sysfs_dir.clone(),
                config.connectivity.poll_interval(),
            )),
            SourceKind::Manual => {
                let source = ManualSource::new();
                manual = Some(source.handle());
                Arc::new(source)
            }
        };

        let mut state = Self::new(shell, store, source, config);
        state.manual = manual;
        state
    }

    /// Current toolkit snapshot; probes on first access.
    pub fn environment(&self) -> Result<Arc<EnvironmentSnapshot>, ProbeError> {
        self.probe.current()
    }

    /// Discard the cached snapshot.
    pub fn invalidate(&self) {
        self.probe.invalidate();
    }

    /// Persist the snapshot's hide flag.
    pub fn apply(&self, snapshot: &EnvironmentSnapshot) -> Result<(), ProbeError> {
        self.probe.apply(snapshot)
    }

    /// Current snapshot, with its hide flag persisted once per probe.
    pub fn environment_applied(&self) -> Result<Arc<EnvironmentSnapshot>, ProbeError> {
        Ok(self.probe.current_applied()?.0)
    }

    pub fn probe(&self) -> &EnvironmentProbe {
        &self.probe
    }

    pub fn is_connected(&self) -> bool {
        self.connectivity.is_connected()
    }

    pub fn connectivity(&self) -> &ConnectivityObserver {
        &self.connectivity
    }

    /// Handle for pushing reachability events when the manual source is configured.
    pub fn manual_handle(&self) -> Option<&ManualHandle> {
        self.manual.as_ref()
    }

    pub fn is_new_boot(&self) -> bool {
        self.reboot.is_new_boot()
    }

    /// Persisted hide flag, read fresh from the store.
    pub fn hide_enabled(&self) -> Result<bool, StoreError> {
        self.store.hide_enabled()
    }

    /// Feature gating for the current user.
    pub fn availability(&self) -> Result<Availability, ProbeError> {
        let snapshot = self.environment()?;
        Ok(Availability::evaluate(
            &snapshot,
            effective_uid(),
            self.connectivity.is_connected_within(self.settle_timeout),
        ))
    }

    /// Probe, apply a fresh snapshot, and gather every signal into one report.
    ///
    /// A cached snapshot is not re-applied, so a hide toggle made since the
    /// probe shows up in `hide_enabled`.
    pub fn status(&self) -> Result<StatusReport, rootenv_common::Error> {
        let snapshot = self.environment_applied()?;
        let connected = self.connectivity.is_connected_within(self.settle_timeout);
        let report = StatusReport {
            availability: Availability::evaluate(&snapshot, effective_uid(), connected),
            hide_enabled: self.hide_enabled()?,
            new_boot: self.is_new_boot(),
            connected,
            snapshot: snapshot.as_ref().clone(),
            generated_at: Utc::now(),
        };
        debug!(connected, new_boot = report.new_boot, "status gathered");
        Ok(report)
    }

    /// Stop background threads.
    pub fn shutdown(&self) {
        self.connectivity.stop();
    }
}

impl std::fmt::Debug for EnvironmentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentState")
            .field("probe", &self.probe)
            .field("connectivity", &self.connectivity)
            .field("reboot", &self.reboot)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeReadings;
    use crate::store::MemoryStateStore;
    use crate::test_utils::toolkit_shell;

    fn active_snapshot() -> EnvironmentSnapshot {
        EnvironmentSnapshot::classify(
            ProbeReadings {
                version_string: "21.0".into(),
                raw_version_code: 21000,
                hide_enabled: false,
                has_root: true,
            },
            19000,
        )
    }

    #[test]
    fn test_availability_gating() {
        let snap = active_snapshot();
        let all = Availability::evaluate(&snap, 10_123, true);
        assert!(all.toolkit_sections && all.manager_hide);

        let secondary_user = Availability::evaluate(&snap, 1_010_123, true);
        assert!(secondary_user.toolkit_sections);
        assert!(!secondary_user.manager_hide);

        let offline = Availability::evaluate(&snap, 0, false);
        assert!(!offline.manager_hide);

        let absent = Availability::evaluate(&EnvironmentSnapshot::absent(), 0, true);
        assert!(!absent.toolkit_sections && !absent.manager_hide);
    }

    #[test]
    fn test_state_wires_components() {
        let dir = tempfile::tempdir().unwrap();
        let boot_id = dir.path().join("boot_id");
        std::fs::write(&boot_id, "b1\n").unwrap();

        let mut config = AppConfig::default();
        config.boot.boot_id_path = boot_id;
        config.connectivity.settle_timeout_ms = 10;

        let store = Arc::new(MemoryStateStore::new());
        let source = ManualSource::new();
        let handle = source.handle();
        let state = EnvironmentState::new(
            Arc::new(toolkit_shell("21.0", 21000)),
            store.clone(),
            Arc::new(source),
            &config,
        );

        let report = state.status().unwrap();
        assert!(report.snapshot.is_active);
        assert!(report.hide_enabled, "status applies the hide flag");
        assert!(report.new_boot);
        assert!(!report.connected);
        assert!(handle.is_started());

        // Toggle after the snapshot; read-back reflects the store.
        store.set_hide_enabled(false).unwrap();
        assert!(!state.hide_enabled().unwrap());
        assert!(state.environment().unwrap().hide_enabled);

        state.shutdown();
        assert!(!handle.is_started());
    }

    #[test]
    fn test_status_keeps_toggle_made_after_probe() {
        let dir = tempfile::tempdir().unwrap();
        let boot_id = dir.path().join("boot_id");
        std::fs::write(&boot_id, "b1\n").unwrap();
        let mut config = AppConfig::default();
        config.boot.boot_id_path = boot_id;
        config.connectivity.settle_timeout_ms = 10;

        let store = Arc::new(MemoryStateStore::new());
        let state = EnvironmentState::new(
            Arc::new(toolkit_shell("21.0", 21000)),
            store.clone(),
            Arc::new(ManualSource::new()),
            &config,
        );

        assert!(state.status().unwrap().hide_enabled);
        store.set_hide_enabled(false).unwrap();
        let second = state.status().unwrap();
        assert!(!second.hide_enabled);
        assert!(second.snapshot.hide_enabled);

        state.invalidate();
        assert!(state.status().unwrap().hide_enabled, "a new probe is applied again");
        state.shutdown();
    }

    #[test]
    fn test_from_config_manual_source_exposes_handle() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.connectivity.source = SourceKind::Manual;
        config.state.path = Some(dir.path().join("state.json"));

        let state = EnvironmentState::from_config(&config);
        let handle = state.manual_handle().unwrap().clone();
        assert!(!state.is_connected());
        assert!(handle.set_available(true));
        assert!(state.connectivity().subscribe().is_ok());
    }
}
