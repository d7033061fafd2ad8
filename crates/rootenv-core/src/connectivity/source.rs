//! Platform reachability sources.

use super::ConnectivityError;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Default sysfs directory listing network interfaces.
pub const DEFAULT_SYSFS_NET_DIR: &str = "/sys/class/net";

/// Default interval between sysfs polls.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// A live registration with a reachability source.
pub trait Subscription: Send {
    /// Stop delivering events. Idempotent.
    fn cancel(&mut self);
}

/// Something that reports "network available" transitions.
pub trait ReachabilitySource: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Begin delivering availability events into `sink`.
    fn start(&self, sink: mpsc::Sender<bool>) -> Result<Box<dyn Subscription>, ConnectivityError>;
}

/// Polls interface link state under `/sys/class/net`.
///
/// Any non-loopback interface whose `operstate` reads `up` counts as
/// available. The current state is reported once on start, then on change.
#[derive(Debug, Clone)]
pub struct SysfsLinkSource {
    net_dir: PathBuf,
    interval: Duration,
}

impl SysfsLinkSource {
    pub fn new(net_dir: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            net_dir: net_dir.into(),
            interval,
        }
    }
}

impl Default for SysfsLinkSource {
    fn default() -> Self {
        Self::new(
            DEFAULT_SYSFS_NET_DIR,
            Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        )
    }
}

/// Whether any non-loopback interface under `net_dir` is up.
pub fn link_available(net_dir: &Path) -> io::Result<bool> {
    for entry in fs::read_dir(net_dir)? {
        let entry = entry?;
        if entry.file_name() == "lo" {
            continue;
        }
        match fs::read_to_string(entry.path().join("operstate")) {
            Ok(state) if state.trim() == "up" => return Ok(true),
            Ok(_) => {}
            Err(e) => trace!(interface = ?entry.file_name(), error = %e, "operstate unreadable"),
        }
    }
    Ok(false)
}

impl ReachabilitySource for SysfsLinkSource {
    fn name(&self) -> &'static str {
        "sysfs"
    }

    fn start(&self, sink: mpsc::Sender<bool>) -> Result<Box<dyn Subscription>, ConnectivityError> {
        if !self.net_dir.is_dir() {
            return Err(ConnectivityError::SourceUnavailable {
                source_name: self.name(),
                reason: format!("{} is not a directory", self.net_dir.display()),
            });
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let net_dir = self.net_dir.clone();
        let interval = self.interval;

        let handle = std::thread::Builder::new()
            .name("rootenv-sysfs-poll".to_string())
            .spawn(move || {
                let mut last: Option<bool> = None;
                loop {
                    match link_available(&net_dir) {
                        Ok(available) if last != Some(available) => {
                            trace!(available, "link state changed");
                            if sink.send(available).is_err() {
                                break;
                            }
                            last = Some(available);
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "failed to read link state"),
                    }
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        _ => break,
                    }
                }
                debug!("sysfs poller exited");
            })
            .map_err(ConnectivityError::Spawn)?;

        Ok(Box::new(PollSubscription {
            stop: Some(stop_tx),
            handle: Some(handle),
        }))
    }
}

struct PollSubscription {
    stop: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Subscription for PollSubscription {
    fn cancel(&mut self) {
        // Dropping the sender wakes the poller.
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("sysfs poller panicked");
            }
        }
    }
}

impl Drop for PollSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

type SharedSink = Arc<Mutex<Option<mpsc::Sender<bool>>>>;

/// Source driven by the embedding application.
///
/// Useful where platform callbacks arrive through some other channel, and in
/// tests. Events pushed before [`start`](ReachabilitySource::start) or after
/// cancellation are dropped.
#[derive(Debug, Default, Clone)]
pub struct ManualSource {
    sink: SharedSink,
}

impl ManualSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for pushing availability events.
    pub fn handle(&self) -> ManualHandle {
        ManualHandle {
            sink: Arc::clone(&self.sink),
        }
    }
}

impl ReachabilitySource for ManualSource {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn start(&self, sink: mpsc::Sender<bool>) -> Result<Box<dyn Subscription>, ConnectivityError> {
        let mut slot = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(ConnectivityError::SourceUnavailable {
                source_name: "manual",
                reason: "already started".to_string(),
            });
        }
        *slot = Some(sink);
        Ok(Box::new(ManualSubscription {
            sink: Arc::clone(&self.sink),
        }))
    }
}

/// Pushes events into a started [`ManualSource`].
#[derive(Debug, Clone)]
pub struct ManualHandle {
    sink: SharedSink,
}

impl ManualHandle {
    /// Report availability. Returns false if nothing is listening.
    pub fn set_available(&self, available: bool) -> bool {
        let slot = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(sink) => sink.send(available).is_ok(),
            None => false,
        }
    }

    /// Whether a subscriber is currently registered.
    pub fn is_started(&self) -> bool {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

struct ManualSubscription {
    sink: SharedSink,
}

impl Subscription for ManualSubscription {
    fn cancel(&mut self) {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl Drop for ManualSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn add_iface(root: &Path, name: &str, state: &str) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("operstate"), format!("{}\n", state)).unwrap();
    }

    #[test]
    fn test_link_available_ignores_loopback() {
        let dir = tempdir().unwrap();
        add_iface(dir.path(), "lo", "up");
        add_iface(dir.path(), "eth0", "down");
        assert!(!link_available(dir.path()).unwrap());

        add_iface(dir.path(), "wlan0", "up");
        assert!(link_available(dir.path()).unwrap());
    }

    #[test]
    fn test_sysfs_source_reports_initial_and_changes() {
        let dir = tempdir().unwrap();
        add_iface(dir.path(), "eth0", "down");

        let source = SysfsLinkSource::new(dir.path(), Duration::from_millis(20));
        let (tx, rx) = mpsc::channel();
        let mut sub = source.start(tx).unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), false);
        add_iface(dir.path(), "eth0", "up");
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), true);

        sub.cancel();
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_sysfs_source_missing_dir() {
        let dir = tempdir().unwrap();
        let source = SysfsLinkSource::new(dir.path().join("nope"), Duration::from_millis(20));
        let (tx, _rx) = mpsc::channel();
        assert!(matches!(
            source.start(tx),
            Err(ConnectivityError::SourceUnavailable { .. })
        ));
    }

    #[test]
    fn test_manual_source_lifecycle() {
        let source = ManualSource::new();
        let handle = source.handle();
        assert!(!handle.set_available(true));

        let (tx, rx) = mpsc::channel();
        let mut sub = source.start(tx).unwrap();
        assert!(handle.is_started());
        assert!(handle.set_available(true));
        assert_eq!(rx.recv().unwrap(), true);

        sub.cancel();
        assert!(!handle.is_started());
        assert!(!handle.set_available(false));
    }
}
