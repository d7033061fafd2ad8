//! End-to-end tests for EnvironmentState with a scripted shell.
//!
//! Requires the `test-utils` feature for `ScriptedShell`.

use rootenv_core::config::AppConfig;
use rootenv_core::connectivity::ManualSource;
use rootenv_core::store::{FileStateStore, StateStore};
use rootenv_core::test_utils::{toolkit_shell, ScriptedShell};
use rootenv_core::EnvironmentState;
use std::sync::{Arc, Barrier};
use std::time::Duration;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    config: AppConfig,
    store: Arc<FileStateStore>,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let boot_id = dir.path().join("boot_id");
    std::fs::write(&boot_id, "5e1f\n").unwrap();

    let mut config = AppConfig::default();
    config.boot.boot_id_path = boot_id;
    config.connectivity.settle_timeout_ms = 20;
    let store = Arc::new(FileStateStore::new(dir.path().join("state.json")));

    Fixture {
        _dir: dir,
        config,
        store,
    }
}

#[test]
fn concurrent_first_access_probes_once() {
    let fx = fixture();
    let shell = Arc::new(toolkit_shell("21.0", 21000).with_delay(Duration::from_millis(30)));
    let state = Arc::new(EnvironmentState::new(
        shell.clone(),
        fx.store.clone(),
        Arc::new(ManualSource::new()),
        &fx.config,
    ));

    let barrier = Arc::new(Barrier::new(8));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let state = Arc::clone(&state);
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                state.environment().unwrap()
            })
        })
        .collect();
    let snapshots: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for snap in &snapshots[1..] {
        assert!(Arc::ptr_eq(&snapshots[0], snap));
    }
    assert_eq!(shell.calls("magisk -v"), 1);
    assert_eq!(shell.calls("magisk -V"), 1);
    assert_eq!(shell.calls("magiskhide --status"), 1);
    assert_eq!(shell.root_checks(), 1);
}

#[test]
fn invalidate_picks_up_new_install() {
    let fx = fixture();
    let state = EnvironmentState::new(
        Arc::new(ScriptedShell::new(true)),
        fx.store.clone(),
        Arc::new(ManualSource::new()),
        &fx.config,
    );

    let before = state.environment().unwrap();
    assert_eq!(before.state_label(), "absent");

    // Same state object, cache still holds the old answer.
    assert!(Arc::ptr_eq(&before, &state.environment().unwrap()));
    state.invalidate();
    let after = state.environment().unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
}

#[test]
fn unsupported_toolkit_is_reported() {
    let fx = fixture();
    let state = EnvironmentState::new(
        Arc::new(toolkit_shell("18.1", 18100)),
        fx.store.clone(),
        Arc::new(ManualSource::new()),
        &fx.config,
    );

    let snap = state.environment().unwrap();
    assert!(snap.is_unsupported);
    assert_eq!(snap.version_code, -1);
    assert_eq!(snap.version_string, "18.1");
    assert!(!state.availability().unwrap().toolkit_sections);
}

#[test]
fn hide_flag_persists_across_instances() {
    let fx = fixture();
    let state = EnvironmentState::new(
        Arc::new(toolkit_shell("21.0", 21000)),
        fx.store.clone(),
        Arc::new(ManualSource::new()),
        &fx.config,
    );
    let snap = state.environment().unwrap();
    state.apply(&snap).unwrap();

    let reopened = FileStateStore::new(fx.store.path());
    assert!(reopened.hide_enabled().unwrap());
}

#[test]
fn connectivity_gates_manager_hide() {
    let fx = fixture();
    let source = ManualSource::new();
    let handle = source.handle();
    let state = EnvironmentState::new(
        Arc::new(toolkit_shell("21.0", 21000)),
        fx.store.clone(),
        Arc::new(source),
        &fx.config,
    );

    let changes = state.connectivity().subscribe().unwrap();
    assert!(!state.availability().unwrap().manager_hide);

    handle.set_available(true);
    assert_eq!(changes.recv_timeout(Duration::from_secs(2)).unwrap(), true);
    let availability = state.availability().unwrap();
    assert!(availability.toolkit_sections);
    // Secondary Android users never get the manager hide option.
    let primary = rootenv_core::shell::effective_uid() / 100_000 == 0;
    assert_eq!(availability.manager_hide, primary);

    state.shutdown();
}

#[test]
fn reboot_answer_is_stable_for_one_state() {
    let fx = fixture();
    let state = EnvironmentState::new(
        Arc::new(ScriptedShell::new(false)),
        fx.store.clone(),
        Arc::new(ManualSource::new()),
        &fx.config,
    );

    assert!(state.is_new_boot());
    std::fs::write(&fx.config.boot.boot_id_path, "other\n").unwrap();
    assert!(state.is_new_boot());
    assert_eq!(fx.store.boot_id().unwrap().as_deref(), Some("5e1f"));
}
