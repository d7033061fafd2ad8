//! Network availability tracking.
//!
//! [`ConnectivityObserver`] starts its platform [`ReachabilitySource`] on
//! first use. Source events are funnelled through a channel to a single
//! dispatcher thread, which updates the shared flag and then notifies
//! callbacks and channel subscribers one at a time.
//!
//! Notifications fire on transitions only; a repeated value is absorbed.

mod source;

pub use source::{
    link_available, ManualHandle, ManualSource, ReachabilitySource, Subscription,
    SysfsLinkSource, DEFAULT_POLL_INTERVAL_MS, DEFAULT_SYSFS_NET_DIR,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use crate::logging::{event_names, Stage};
use thiserror::Error;
use tracing::{debug, info, warn};

/// How often the dispatcher checks for shutdown while idle.
const DISPATCH_POLL: Duration = Duration::from_millis(100);

/// Errors from the connectivity observer.
#[derive(Debug, Error)]
pub enum ConnectivityError {
    #[error("reachability source `{source_name}` unavailable: {reason}")]
    SourceUnavailable {
        source_name: &'static str,
        reason: String,
    },

    #[error("failed to spawn connectivity thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("connectivity observer has been stopped")]
    Stopped,
}

type Callback = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
struct Shared {
    connected: AtomicBool,
    callbacks: Mutex<Vec<Callback>>,
    subscribers: Mutex<Vec<mpsc::Sender<bool>>>,
    settled: Mutex<bool>,
    settled_cv: Condvar,
    shutdown: AtomicBool,
}

impl Shared {
    fn dispatch(&self, available: bool) {
        let previous = self.connected.swap(available, Ordering::SeqCst);
        self.mark_settled();
        if previous == available {
            return;
        }
        info!(
            event = event_names::NET_CHANGED,
            stage = %Stage::Connectivity,
            connected = available,
            "connectivity changed"
        );

        let callbacks: Vec<Callback> = lock(&self.callbacks).clone();
        for callback in callbacks {
            callback(available);
        }
        lock(&self.subscribers).retain(|tx| tx.send(available).is_ok());
    }

    fn mark_settled(&self) {
        let mut settled = lock(&self.settled);
        if !*settled {
            *settled = true;
            self.settled_cv.notify_all();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Lifecycle {
    Idle,
    Running {
        subscription: Box<dyn Subscription>,
        dispatcher: JoinHandle<()>,
    },
    Failed,
    Stopped,
}

/// Lazily started network availability observer.
pub struct ConnectivityObserver {
    source: Arc<dyn ReachabilitySource>,
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
}

impl ConnectivityObserver {
    pub fn new(source: Arc<dyn ReachabilitySource>) -> Self {
        Self {
            source,
            shared: Arc::new(Shared::default()),
            lifecycle: Mutex::new(Lifecycle::Idle),
        }
    }

    /// Current availability. Starts the source on first call.
    ///
    /// Reads false until the source has delivered its first event.
    pub fn is_connected(&self) -> bool {
        if let Err(e) = self.ensure_started() {
            debug!(error = %e, "connectivity unavailable, reporting disconnected");
        }
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Like [`is_connected`](Self::is_connected), but first waits up to
    /// `timeout` for the source's first event.
    pub fn is_connected_within(&self, timeout: Duration) -> bool {
        if self.ensure_started().is_ok() {
            self.wait_settled(timeout);
        }
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Register a callback invoked on every availability transition.
    ///
    /// Callbacks run on the dispatcher thread, serially, in registration order.
    pub fn on_change<F>(&self, callback: F) -> Result<(), ConnectivityError>
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        lock(&self.shared.callbacks).push(Arc::new(callback));
        self.ensure_started()
    }

    /// Channel receiving every availability transition.
    pub fn subscribe(&self) -> Result<mpsc::Receiver<bool>, ConnectivityError> {
        let (tx, rx) = mpsc::channel();
        lock(&self.shared.subscribers).push(tx);
        self.ensure_started()?;
        Ok(rx)
    }

    /// Whether the source is running.
    pub fn is_running(&self) -> bool {
        matches!(*lock(&self.lifecycle), Lifecycle::Running { .. })
    }

    /// Cancel the source subscription and join the dispatcher.
    ///
    /// The last known value stays readable; the observer does not restart.
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *lock(&self.lifecycle), Lifecycle::Stopped);
        if let Lifecycle::Running {
            mut subscription,
            dispatcher,
        } = previous
        {
            subscription.cancel();
            self.shared.shutdown.store(true, Ordering::SeqCst);
            if dispatcher.join().is_err() {
                warn!("connectivity dispatcher panicked");
            }
            lock(&self.shared.subscribers).clear();
            info!(
                event = event_names::NET_STOPPED,
                stage = %Stage::Connectivity,
                source = self.source.name(),
                "connectivity observer stopped"
            );
        }
    }

    fn wait_settled(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let mut settled = lock(&self.shared.settled);
        while !*settled {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            settled = self
                .shared
                .settled_cv
                .wait_timeout(settled, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn ensure_started(&self) -> Result<(), ConnectivityError> {
        let mut lifecycle = lock(&self.lifecycle);
        match *lifecycle {
            Lifecycle::Running { .. } => return Ok(()),
            Lifecycle::Stopped => return Err(ConnectivityError::Stopped),
            Lifecycle::Failed => {
                return Err(ConnectivityError::SourceUnavailable {
                    source_name: self.source.name(),
                    reason: "failed to start".to_string(),
                })
            }
            Lifecycle::Idle => {}
        }

        match self.start() {
            Ok(running) => {
                *lifecycle = running;
                info!(
                    event = event_names::NET_STARTED,
                    stage = %Stage::Connectivity,
                    source = self.source.name(),
                    "connectivity observer started"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    stage = %Stage::Connectivity,
                    source = self.source.name(),
                    error = %e,
                    "connectivity source failed to start"
                );
                *lifecycle = Lifecycle::Failed;
                // Nothing will ever arrive; don't make waiters sit out their timeout.
                self.shared.mark_settled();
                Err(e)
            }
        }
    }

    fn start(&self) -> Result<Lifecycle, ConnectivityError> {
        let (tx, rx) = mpsc::channel::<bool>();
        let shared = Arc::clone(&self.shared);

        let dispatcher = std::thread::Builder::new()
            .name("rootenv-connectivity".to_string())
            .spawn(move || loop {
                match rx.recv_timeout(DISPATCH_POLL) {
                    Ok(available) => shared.dispatch(available),
                    Err(RecvTimeoutError::Timeout) => {
                        if shared.shutdown.load(Ordering::SeqCst) {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(ConnectivityError::Spawn)?;

        match self.source.start(tx) {
            Ok(subscription) => Ok(Lifecycle::Running {
                subscription,
                dispatcher,
            }),
            Err(e) => {
                // The sender was dropped with the failed start, so the dispatcher exits.
                let _ = dispatcher.join();
                Err(e)
            }
        }
    }
}

impl Drop for ConnectivityObserver {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ConnectivityObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityObserver")
            .field("source", &self.source.name())
            .field("connected", &self.shared.connected.load(Ordering::SeqCst))
            .field("running", &self.is_running())
            .finish()
    }
}
