//! Single-flight, invalidatable lazy cache for expensive probes.
//!
//! [`LazyProbeCache`] holds the result of a zero-argument computation that is
//! too expensive to repeat on every read (it typically spawns privileged
//! subprocesses). Semantics:
//!
//! - The first `get()` runs the computation; later calls return the stored value.
//! - Concurrent `get()` calls while nothing is stored share one computation:
//!   one caller computes outside the lock, the others block on a condition
//!   variable and receive the same `Arc<T>` (or the same failure).
//! - A failed computation is never stored. The next `get()` retries.
//! - `invalidate()` clears the stored value. If a computation is in flight, its
//!   result is still handed to the callers that were waiting for it but is not
//!   stored, so the next `get()` recomputes.
//!
//! # Example
//!
//! ```
//! use rootenv_core::cache::LazyProbeCache;
//!
//! let cache: LazyProbeCache<u32, std::io::Error> = LazyProbeCache::new(|| Ok(42));
//! assert_eq!(*cache.get().unwrap(), 42);
//! cache.invalidate();
//! assert!(!cache.is_cached());
//! ```

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Errors returned by [`LazyProbeCache::get`].
#[derive(Debug, Error)]
pub enum CacheError<E> {
    /// The computation returned an error. Shared by every caller that waited on it.
    #[error("probe computation failed: {0}")]
    Failed(Arc<E>),

    /// The computing caller panicked before producing a value.
    #[error("probe computation was abandoned before producing a value")]
    Abandoned,
}

impl<E> Clone for CacheError<E> {
    fn clone(&self) -> Self {
        match self {
            CacheError::Failed(err) => CacheError::Failed(Arc::clone(err)),
            CacheError::Abandoned => CacheError::Abandoned,
        }
    }
}

type ComputeFn<T, E> = Box<dyn Fn() -> Result<T, E> + Send + Sync>;

/// How a finished flight ended, kept so late-waking waiters can read it.
enum Outcome<T, E> {
    Value(Arc<T>),
    Failed(Arc<E>),
    Abandoned,
}

impl<T, E> Outcome<T, E> {
    fn to_result(&self) -> Result<Arc<T>, CacheError<E>> {
        match self {
            Outcome::Value(value) => Ok(Arc::clone(value)),
            Outcome::Failed(err) => Err(CacheError::Failed(Arc::clone(err))),
            Outcome::Abandoned => Err(CacheError::Abandoned),
        }
    }
}

struct State<T, E> {
    value: Option<Arc<T>>,
    /// Bumped by every `invalidate()`.
    generation: u64,
    /// Id of the computation currently running, if any.
    in_flight: Option<u64>,
    next_flight: u64,
    /// Outcome of the most recently finished flight.
    last_outcome: Option<(u64, Outcome<T, E>)>,
}

/// Lazily computed, invalidatable value with single-flight computation.
pub struct LazyProbeCache<T, E> {
    compute: ComputeFn<T, E>,
    state: Mutex<State<T, E>>,
    flight_done: Condvar,
}

impl<T, E> LazyProbeCache<T, E> {
    /// Create an empty cache around `compute`.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
    {
        Self {
            compute: Box::new(compute),
            state: Mutex::new(State {
                value: None,
                generation: 0,
                in_flight: None,
                next_flight: 0,
                last_outcome: None,
            }),
            flight_done: Condvar::new(),
        }
    }

    /// Return the cached value, computing it if absent.
    ///
    /// Blocks while another caller's computation is in flight.
    pub fn get(&self) -> Result<Arc<T>, CacheError<E>> {
        let mut state = self.lock();

        let (flight, generation) = loop {
            if let Some(value) = &state.value {
                trace!("probe cache hit");
                return Ok(Arc::clone(value));
            }

            match state.in_flight {
                None => {
                    let flight = state.next_flight;
                    state.next_flight += 1;
                    state.in_flight = Some(flight);
                    break (flight, state.generation);
                }
                Some(waiting_on) => {
                    trace!(flight = waiting_on, "waiting on in-flight probe");
                    state = self
                        .flight_done
                        .wait_while(state, |s| s.in_flight == Some(waiting_on))
                        .unwrap_or_else(PoisonError::into_inner);

                    if let Some((finished, outcome)) = &state.last_outcome {
                        if *finished == waiting_on {
                            return outcome.to_result();
                        }
                    }
                    // A newer flight already finished; re-check from the top.
                }
            }
        };
        drop(state);

        debug!(flight, generation, "computing probe value");
        let mut guard = FlightGuard {
            cache: self,
            flight,
            generation,
            finished: false,
        };
        let outcome = match (self.compute)() {
            Ok(value) => Outcome::Value(Arc::new(value)),
            Err(err) => Outcome::Failed(Arc::new(err)),
        };
        let result = outcome.to_result();
        guard.finish(outcome);
        result
    }

    /// Return the cached value without computing.
    pub fn peek(&self) -> Option<Arc<T>> {
        self.lock().value.clone()
    }

    /// Whether a value is currently stored.
    pub fn is_cached(&self) -> bool {
        self.lock().value.is_some()
    }

    /// Whether a computation is currently running.
    pub fn is_computing(&self) -> bool {
        self.lock().in_flight.is_some()
    }

    /// Number of invalidations so far.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Drop the stored value so the next `get()` recomputes.
    ///
    /// Does not cancel an in-flight computation; its result will not be stored.
    pub fn invalidate(&self) {
        let mut state = self.lock();
        state.value = None;
        state.generation += 1;
        debug!(
            generation = state.generation,
            in_flight = state.in_flight.is_some(),
            "probe cache invalidated"
        );
    }

    fn lock(&self) -> MutexGuard<'_, State<T, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn complete(&self, flight: u64, generation: u64, outcome: Outcome<T, E>) {
        let mut state = self.lock();
        if let Outcome::Value(value) = &outcome {
            if state.generation == generation {
                state.value = Some(Arc::clone(value));
            } else {
                debug!(flight, "probe value superseded by invalidation; not stored");
            }
        }
        state.in_flight = None;
        state.last_outcome = Some((flight, outcome));
        drop(state);
        self.flight_done.notify_all();
    }
}

impl<T, E> fmt::Debug for LazyProbeCache<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("LazyProbeCache")
            .field("cached", &state.value.is_some())
            .field("generation", &state.generation)
            .field("in_flight", &state.in_flight)
            .finish()
    }
}

/// Releases waiters even if the computation unwinds.
struct FlightGuard<'a, T, E> {
    cache: &'a LazyProbeCache<T, E>,
    flight: u64,
    generation: u64,
    finished: bool,
}

impl<T, E> FlightGuard<'_, T, E> {
    fn finish(&mut self, outcome: Outcome<T, E>) {
        self.finished = true;
        self.cache.complete(self.flight, self.generation, outcome);
    }
}

impl<T, E> Drop for FlightGuard<'_, T, E> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(flight = self.flight, "probe computation panicked");
            self.cache
                .complete(self.flight, self.generation, Outcome::Abandoned);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Barrier};
    use std::thread;
    use std::time::Duration;

    #[derive(Debug, PartialEq, Eq)]
    struct ProbeFailed(&'static str);

    fn counting_cache(
        calls: Arc<AtomicUsize>,
        delay: Duration,
    ) -> Arc<LazyProbeCache<usize, ProbeFailed>> {
        Arc::new(LazyProbeCache::new(move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            thread::sleep(delay);
            Ok(n)
        }))
    }

    #[test]
    fn test_first_get_computes_then_hits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = counting_cache(calls.clone(), Duration::ZERO);

        assert!(!cache.is_cached());
        assert_eq!(*cache.get().unwrap(), 1);
        assert_eq!(*cache.get().unwrap(), 1);
        assert!(cache.is_cached());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_gets_share_one_computation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = counting_cache(calls.clone(), Duration::from_millis(50));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    cache.get().unwrap()
                })
            })
            .collect();

        let results: Vec<Arc<usize>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in &results {
            assert!(Arc::ptr_eq(result, &results[0]));
        }
    }

    #[test]
    fn test_invalidate_forces_recompute() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = counting_cache(calls.clone(), Duration::ZERO);

        assert_eq!(*cache.get().unwrap(), 1);
        cache.invalidate();
        assert!(!cache.is_cached());
        assert_eq!(cache.generation(), 1);
        assert_eq!(*cache.get().unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failure_is_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cache: LazyProbeCache<&'static str, ProbeFailed> = LazyProbeCache::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ProbeFailed("transient"))
            } else {
                Ok("20.4")
            }
        });

        match cache.get() {
            Err(CacheError::Failed(err)) => assert_eq!(*err, ProbeFailed("transient")),
            other => panic!("expected Failed, got {:?}", other),
        }
        assert!(!cache.is_cached());
        assert_eq!(*cache.get().unwrap(), "20.4");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_waiters_observe_failure() {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cache: Arc<LazyProbeCache<u32, ProbeFailed>> = Arc::new(LazyProbeCache::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            release_rx.lock().unwrap().recv().ok();
            Err(ProbeFailed("su denied"))
        }));

        let leader = {
            let cache = cache.clone();
            thread::spawn(move || cache.get())
        };
        while !cache.is_computing() {
            thread::sleep(Duration::from_millis(1));
        }
        let waiter = {
            let cache = cache.clone();
            thread::spawn(move || cache.get())
        };
        thread::sleep(Duration::from_millis(100));
        release_tx.send(()).unwrap();

        let leader = leader.join().unwrap();
        let waiter = waiter.join().unwrap();
        assert!(matches!(leader, Err(CacheError::Failed(_))));
        assert!(matches!(waiter, Err(CacheError::Failed(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalidate_during_flight_is_not_stored() {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cache: Arc<LazyProbeCache<usize, ProbeFailed>> = Arc::new(LazyProbeCache::new(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n == 1 {
                release_rx.lock().unwrap().recv().ok();
            }
            Ok(n)
        }));

        let leader = {
            let cache = cache.clone();
            thread::spawn(move || cache.get())
        };
        while !cache.is_computing() {
            thread::sleep(Duration::from_millis(1));
        }
        cache.invalidate();
        release_tx.send(()).unwrap();

        assert_eq!(*leader.join().unwrap().unwrap(), 1);
        assert!(!cache.is_cached());
        assert_eq!(*cache.get().unwrap(), 2);
    }

    #[test]
    fn test_panicking_compute_releases_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cache: Arc<LazyProbeCache<u8, ProbeFailed>> = Arc::new(LazyProbeCache::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("probe blew up");
            }
            Ok(7)
        }));

        let first = {
            let cache = cache.clone();
            thread::spawn(move || cache.get())
        };
        assert!(first.join().is_err());
        assert!(!cache.is_computing());
        assert!(!cache.is_cached());
        assert_eq!(*cache.get().unwrap(), 7);
    }

    #[test]
    fn test_peek_does_not_compute() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = counting_cache(calls.clone(), Duration::ZERO);

        assert!(cache.peek().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        cache.get().unwrap();
        assert_eq!(cache.peek().as_deref(), Some(&1));
    }

    #[test]
    fn test_cache_error_display() {
        let err: CacheError<std::io::Error> = CacheError::Abandoned;
        assert!(err.to_string().contains("abandoned"));
        let err: CacheError<std::io::Error> = CacheError::Failed(Arc::new(
            std::io::Error::new(std::io::ErrorKind::Other, "boom"),
        ));
        assert_eq!(err.to_string(), "probe computation failed: boom");
    }
}
