//! Fixed-size pool of session workers.
//!
//! Workers are created once at start-up and block on a shared FIFO queue.
//! Each dequeued connection is served synchronously on the worker's own
//! thread, so a worker's per-thread I/O redirection belongs to at most one
//! session at a time.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{Span, debug, field, info, info_span, warn};

use crate::transport::{Connection, ConnectionHandler};

pub(crate) const POOL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::pool");

/// Errors surfaced by the session pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// A pool needs at least one worker.
    #[error("session pool size must be at least 1")]
    EmptyPool,
    /// The operating system refused to create a worker thread.
    #[error("failed to spawn worker {name}: {source}")]
    Spawn {
        /// Name of the worker that failed to start.
        name: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Work was submitted after shutdown began.
    #[error("session pool is shut down")]
    ShutDown,
    /// A worker thread panicked outside a session.
    #[error("worker {name} panicked")]
    WorkerPanicked {
        /// Name of the worker.
        name: String,
    },
}

/// Persistent identity of one worker thread.
#[derive(Debug)]
pub struct WorkerSlot {
    index: usize,
    name: String,
    span: Span,
}

impl WorkerSlot {
    pub(crate) fn new(index: usize) -> Self {
        let name = format!("kindling-worker-{index}");
        let span = info_span!(
            target: POOL_TARGET,
            "worker",
            worker = %name,
            state = "idle",
            peer = field::Empty,
            command = field::Empty,
        );
        Self { index, name, span }
    }

    /// Zero-based worker index.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Thread name of the worker.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The worker's tracing span. Sessions record their peer and command on
    /// it.
    #[must_use]
    pub const fn span(&self) -> &Span {
        &self.span
    }

    fn mark_busy(&self) {
        self.span.record("state", "busy");
    }

    fn mark_idle(&self) {
        self.span.record("state", "idle");
        self.span.record("peer", "");
        self.span.record("command", "");
    }
}

/// Serves one unit of pooled work on a worker thread.
pub trait SessionHandler<C>: Send + Sync + 'static {
    /// Runs the whole session for `connection`. Must not return until the
    /// connection has been closed.
    fn serve(&self, connection: C, worker: &WorkerSlot);
}

struct PoolQueue<C> {
    pending: VecDeque<C>,
    shutdown: bool,
}

struct PoolShared<C> {
    queue: Mutex<PoolQueue<C>>,
    available: Condvar,
}

impl<C> PoolShared<C> {
    fn lock(&self) -> MutexGuard<'_, PoolQueue<C>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until work arrives or shutdown begins. Idle workers never
    /// dequeue once the shutdown flag is set.
    fn next(&self) -> Option<C> {
        let mut queue = self.lock();
        loop {
            if queue.shutdown {
                return None;
            }
            if let Some(connection) = queue.pending.pop_front() {
                return Some(connection);
            }
            queue = self
                .available
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// N worker threads pulling from one unbounded FIFO queue.
pub struct SessionPool<C: Send + 'static> {
    shared: Arc<PoolShared<C>>,
    workers: Mutex<Vec<(String, JoinHandle<()>)>>,
    size: usize,
}

impl<C: Send + 'static> fmt::Debug for SessionPool<C> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SessionPool")
            .field("size", &self.size)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

impl<C: Send + 'static> SessionPool<C> {
    /// Spawns `size` workers that serve connections with `handler`.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::EmptyPool`] for a zero size and
    /// [`PoolError::Spawn`] when a thread cannot be created; workers that did
    /// start are shut down first.
    pub fn start(size: usize, handler: Arc<dyn SessionHandler<C>>) -> Result<Self, PoolError> {
        if size == 0 {
            return Err(PoolError::EmptyPool);
        }
        let pool = Self {
            shared: Arc::new(PoolShared {
                queue: Mutex::new(PoolQueue {
                    pending: VecDeque::new(),
                    shutdown: false,
                }),
                available: Condvar::new(),
            }),
            workers: Mutex::new(Vec::with_capacity(size)),
            size,
        };
        for index in 0..size {
            if let Err(error) = pool.spawn_worker(index, Arc::clone(&handler)) {
                pool.abandon();
                return Err(error);
            }
        }
        info!(target: POOL_TARGET, size, "session pool started");
        Ok(pool)
    }

    fn spawn_worker(
        &self,
        index: usize,
        handler: Arc<dyn SessionHandler<C>>,
    ) -> Result<(), PoolError> {
        let slot = WorkerSlot::new(index);
        let name = slot.name.clone();
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_worker(&shared, handler.as_ref(), &slot))
            .map_err(|source| PoolError::Spawn {
                name: name.clone(),
                source,
            })?;
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((name, handle));
        Ok(())
    }

    /// Queues a connection and wakes exactly one idle worker.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::ShutDown`] once [`SessionPool::shutdown`] has
    /// been called; the connection is dropped.
    pub fn start_session_for(&self, connection: C) -> Result<(), PoolError> {
        {
            let mut queue = self.shared.lock();
            if queue.shutdown {
                return Err(PoolError::ShutDown);
            }
            queue.pending.push_back(connection);
        }
        self.shared.available.notify_one();
        Ok(())
    }

    /// Number of worker threads.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Connections queued but not yet picked up by a worker.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Stops accepting work and wakes every idle worker so it can exit.
    /// Sessions already running finish first; queued connections are
    /// dropped.
    pub fn shutdown(&self) {
        let abandoned = {
            let mut queue = self.shared.lock();
            queue.shutdown = true;
            std::mem::take(&mut queue.pending)
        };
        if !abandoned.is_empty() {
            debug!(
                target: POOL_TARGET,
                abandoned = abandoned.len(),
                "dropping queued connections at shutdown"
            );
        }
        self.shared.available.notify_all();
    }

    /// Waits for every worker to exit.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::WorkerPanicked`] naming the first worker whose
    /// thread panicked.
    pub fn join(&self) -> Result<(), PoolError> {
        let workers = std::mem::take(
            &mut *self
                .workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let mut result = Ok(());
        for (name, handle) in workers {
            if handle.join().is_err() && result.is_ok() {
                result = Err(PoolError::WorkerPanicked { name });
            }
        }
        result
    }

    /// Tears down a pool that failed to start fully.
    fn abandon(&self) {
        self.shutdown();
        if let Err(error) = self.join() {
            warn!(target: POOL_TARGET, %error, "pool stopped uncleanly");
        }
    }
}

impl ConnectionHandler for SessionPool<Connection> {
    fn handle(&self, connection: Connection) {
        let peer = connection.peer;
        if let Err(error) = self.start_session_for(connection) {
            debug!(
                target: POOL_TARGET,
                %peer,
                %error,
                "connection refused by session pool"
            );
        }
    }
}

fn run_worker<C: Send + 'static>(
    shared: &PoolShared<C>,
    handler: &dyn SessionHandler<C>,
    slot: &WorkerSlot,
) {
    debug!(target: POOL_TARGET, worker = %slot.name, "worker started");
    while let Some(connection) = shared.next() {
        slot.mark_busy();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let _entered = slot.span.enter();
            handler.serve(connection, slot);
        }));
        if outcome.is_err() {
            warn!(
                target: POOL_TARGET,
                worker = %slot.name,
                "session handler panicked; worker continues"
            );
        }
        slot.mark_idle();
    }
    debug!(target: POOL_TARGET, worker = %slot.name, "worker stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    struct Recording {
        served: mpsc::Sender<(usize, String)>,
    }

    impl SessionHandler<u32> for Recording {
        fn serve(&self, connection: u32, worker: &WorkerSlot) {
            let _ = self.served.send((connection as usize, worker.name().to_owned()));
        }
    }

    #[test]
    fn zero_sized_pools_are_rejected() {
        let (served, _received) = mpsc::channel();
        let error = SessionPool::<u32>::start(0, Arc::new(Recording { served }))
            .expect_err("empty pool");
        assert!(matches!(error, PoolError::EmptyPool));
    }

    #[test]
    fn workers_are_named_by_index() {
        let (served, received) = mpsc::channel();
        let pool = SessionPool::start(1, Arc::new(Recording { served })).expect("start");
        pool.start_session_for(7).expect("submit");
        let (connection, worker) = received
            .recv_timeout(Duration::from_secs(2))
            .expect("served");
        assert_eq!(connection, 7);
        assert_eq!(worker, "kindling-worker-0");
        pool.shutdown();
        pool.join().expect("join");
    }

    #[test]
    fn submissions_after_shutdown_are_refused() {
        let (served, _received) = mpsc::channel();
        let pool = SessionPool::start(2, Arc::new(Recording { served })).expect("start");
        pool.shutdown();
        assert!(matches!(
            pool.start_session_for(1),
            Err(PoolError::ShutDown)
        ));
        pool.join().expect("join");
    }

    #[test]
    fn abandoning_joins_every_worker() {
        let (served, _received) = mpsc::channel();
        let pool = SessionPool::start(3, Arc::new(Recording { served })).expect("start");
        pool.abandon();
        assert!(matches!(
            pool.start_session_for(1),
            Err(PoolError::ShutDown)
        ));
        assert!(
            pool.workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_empty()
        );
    }

    struct Panicking;

    impl SessionHandler<u32> for Panicking {
        fn serve(&self, connection: u32, _worker: &WorkerSlot) {
            if connection == 0 {
                panic!("handler failure");
            }
        }
    }

    #[test]
    fn handler_panics_do_not_kill_workers() {
        let pool = SessionPool::start(1, Arc::new(Panicking)).expect("start");
        pool.start_session_for(0).expect("submit panicking");
        pool.start_session_for(1).expect("submit normal");
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while pool.pending() > 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        pool.shutdown();
        pool.join().expect("worker survived the panic");
    }
}
