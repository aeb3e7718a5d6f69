//! Server-wide state shared by every session.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::entry::Registry;
use crate::health::HealthReporter;

/// Lifecycle counters for one entry point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryStats {
    /// Invocations that have begun.
    pub started: u64,
    /// Invocations that have completed, however they ended.
    pub finished: u64,
}

impl EntryStats {
    /// Invocations currently in flight.
    #[must_use]
    pub const fn running(&self) -> u64 {
        self.started.saturating_sub(self.finished)
    }
}

#[derive(Default)]
struct ShutdownState {
    source: Option<String>,
}

struct ServerInner {
    registry: Arc<Registry>,
    reporter: Arc<dyn HealthReporter>,
    stats: Mutex<BTreeMap<String, EntryStats>>,
    shutdown: Mutex<ShutdownState>,
    stopped: Condvar,
}

/// Cloneable handle to the running server.
///
/// Sessions use it to update lifecycle counters; builtins use it to read the
/// registry and to request a stop.
#[derive(Clone)]
pub struct ServerHandle {
    inner: Arc<ServerInner>,
}

impl fmt::Debug for ServerHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ServerHandle")
            .field("registry", &self.inner.registry)
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

impl ServerHandle {
    /// Creates a handle over `registry`.
    #[must_use]
    pub fn new(registry: Arc<Registry>, reporter: Arc<dyn HealthReporter>) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                registry,
                reporter,
                stats: Mutex::new(BTreeMap::new()),
                shutdown: Mutex::new(ShutdownState::default()),
                stopped: Condvar::new(),
            }),
        }
    }

    /// The entry-point registry.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Shared pointer to the registry, for use as a resolver.
    #[must_use]
    pub fn registry_arc(&self) -> Arc<Registry> {
        Arc::clone(&self.inner.registry)
    }

    fn stats(&self) -> MutexGuard<'_, BTreeMap<String, EntryStats>> {
        self.inner.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn shutdown_state(&self) -> MutexGuard<'_, ShutdownState> {
        self.inner
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Records that an invocation of `identity` has begun.
    pub fn entry_point_started(&self, identity: &str) {
        self.stats()
            .entry(identity.to_owned())
            .or_default()
            .started += 1;
    }

    /// Records that an invocation of `identity` has completed.
    pub fn entry_point_finished(&self, identity: &str) {
        self.stats()
            .entry(identity.to_owned())
            .or_default()
            .finished += 1;
    }

    /// Counters for every entry point invoked so far, sorted by identity.
    #[must_use]
    pub fn stats_snapshot(&self) -> Vec<(String, EntryStats)> {
        self.stats()
            .iter()
            .map(|(identity, stats)| (identity.clone(), *stats))
            .collect()
    }

    /// Releases the shutdown latch. Only the first request is reported;
    /// later ones are ignored.
    pub fn request_shutdown(&self, source: &str) {
        {
            let mut state = self.shutdown_state();
            if state.source.is_some() {
                return;
            }
            state.source = Some(source.to_owned());
        }
        self.inner.reporter.shutdown_requested(source);
        self.inner.stopped.notify_all();
    }

    /// Whether a shutdown has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_state().source.is_some()
    }

    /// Blocks until a shutdown is requested and returns its source.
    pub fn wait_for_shutdown(&self) -> String {
        let mut state = self.shutdown_state();
        loop {
            if let Some(source) = &state.source {
                return source.clone();
            }
            state = self
                .inner
                .stopped
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`ServerHandle::wait_for_shutdown`] but gives up after
    /// `timeout`.
    #[must_use]
    pub fn wait_for_shutdown_timeout(&self, timeout: Duration) -> Option<String> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shutdown_state();
        loop {
            if let Some(source) = &state.source {
                return Some(source.clone());
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            state = self
                .inner
                .stopped
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}
