//! Supervises server launch sequencing and runtime orchestration.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;

use tracing::{info, warn};

use kindling_config::Config;

use crate::StructuredHealthReporter;
use crate::bootstrap::{ConfigLoader, SystemConfigLoader, bootstrap_with};
use crate::entry::{Registry, RegistryError, register_builtins, register_demos};
use crate::exit_trap;
use crate::health::HealthReporter;
use crate::pool::SessionPool;
use crate::server::ServerHandle;
use crate::session::SessionRunner;
use crate::transport::{Acceptor, AcceptorHandle, Connection};

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use super::shutdown::{ShutdownSignal, SystemShutdownSignal};

const SIGNAL_THREAD_NAME: &str = "kindling-signals";

/// Service dependencies required to construct the server runtime.
pub(crate) struct ServiceDeps<L> {
    pub(crate) loader: L,
    pub(crate) reporter: Arc<dyn HealthReporter>,
}

/// Collaborators required to launch the server runtime.
pub(crate) struct LaunchPlan<L, S> {
    pub(crate) shutdown: S,
    pub(crate) services: ServiceDeps<L>,
}

/// Builds the registry a configured server starts with: the builtins, the
/// demonstration entry points and the configured default entry point.
///
/// # Errors
///
/// Returns [`RegistryError`] when the configured default is not a
/// registered identity.
pub fn default_registry(config: &Config) -> Result<Registry, RegistryError> {
    let mut registry = Registry::new(config.allow_direct_lookup());
    register_builtins(&mut registry)?;
    register_demos(&mut registry)?;
    if let Some(identity) = config.default_entry_point() {
        registry.set_default(identity)?;
    }
    Ok(registry)
}

/// A listening server: acceptor thread plus session pool.
pub struct Runtime {
    address: SocketAddr,
    server: ServerHandle,
    acceptor: AcceptorHandle,
    pool: Arc<SessionPool<Connection>>,
    reporter: Arc<dyn HealthReporter>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Runtime")
            .field("address", &self.address)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Binds the configured address, starts the worker pool and begins
    /// accepting connections.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError`] when the address cannot be bound or a thread
    /// cannot be started.
    pub fn start(
        config: &Config,
        registry: Registry,
        reporter: Arc<dyn HealthReporter>,
    ) -> Result<Self, LaunchError> {
        exit_trap::install();
        let registry = Arc::new(registry);
        let server = ServerHandle::new(Arc::clone(&registry), Arc::clone(&reporter));
        let runner = SessionRunner::new(registry, server.clone(), config.header_timeout());
        let acceptor = Acceptor::bind(config.listen_host(), config.listen_port())?;
        let address = acceptor.local_addr();
        let pool = Arc::new(SessionPool::start(config.pool_size(), Arc::new(runner))?);
        let handler = Arc::clone(&pool);
        let acceptor = match acceptor.spawn(handler) {
            Ok(acceptor) => acceptor,
            Err(error) => {
                pool.shutdown();
                if let Err(pool_error) = pool.join() {
                    warn!(target: PROCESS_TARGET, error = %pool_error, "pool stopped uncleanly");
                }
                return Err(error.into());
            }
        };
        reporter.listener_ready(address, pool.size());
        Ok(Self {
            address,
            server,
            acceptor,
            pool,
            reporter,
        })
    }

    /// Address the acceptor is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Handle to the running server.
    #[must_use]
    pub const fn server(&self) -> &ServerHandle {
        &self.server
    }

    /// Blocks until a shutdown is requested.
    pub fn wait(&self) {
        let source = self.server.wait_for_shutdown();
        info!(target: PROCESS_TARGET, source = %source, "stopping server");
    }

    /// Stops accepting, lets running sessions finish and joins every thread.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError`] when the acceptor or a worker panicked.
    pub fn stop(self) -> Result<(), LaunchError> {
        self.server.request_shutdown("runtime stop");
        let acceptor = self.acceptor.join();
        self.pool.shutdown();
        let pool = self.pool.join();
        self.reporter.shutdown_completed();
        acceptor?;
        pool?;
        Ok(())
    }
}

/// Runs the server using the production collaborators.
pub fn run_daemon() -> Result<(), LaunchError> {
    let plan = LaunchPlan {
        shutdown: SystemShutdownSignal::new(),
        services: ServiceDeps {
            loader: SystemConfigLoader,
            reporter: Arc::new(StructuredHealthReporter::new()),
        },
    };
    run_daemon_with(plan)
}

/// Runs the server with injected collaborators until a signal arrives or a
/// session requests a stop.
pub(crate) fn run_daemon_with<L, S>(plan: LaunchPlan<L, S>) -> Result<(), LaunchError>
where
    L: ConfigLoader,
    S: ShutdownSignal + 'static,
{
    let LaunchPlan { shutdown, services } = plan;
    let ServiceDeps { loader, reporter } = services;

    let daemon = bootstrap_with(&loader, reporter)?;
    info!(
        target: PROCESS_TARGET,
        listen = %daemon.config().listen_address(),
        "starting server runtime"
    );
    let registry = default_registry(daemon.config())?;
    let runtime = Runtime::start(daemon.config(), registry, daemon.reporter())?;
    watch_signals(shutdown, runtime.server().clone());
    runtime.wait();
    runtime.stop()?;
    info!(
        target: PROCESS_TARGET,
        "shutdown sequence completed"
    );
    Ok(())
}

/// Releases the shutdown latch when `signal` fires. Failing to install the
/// handlers leaves the default signal dispositions in place.
fn watch_signals<S>(signal: S, server: ServerHandle)
where
    S: ShutdownSignal + 'static,
{
    let spawned = thread::Builder::new()
        .name(SIGNAL_THREAD_NAME.to_owned())
        .spawn(move || match signal.wait() {
            Ok(source) => server.request_shutdown(source),
            Err(error) => warn!(
                target: PROCESS_TARGET,
                error = %error,
                "shutdown signals unavailable"
            ),
        });
    if let Err(error) = spawned {
        warn!(
            target: PROCESS_TARGET,
            error = %error,
            "failed to spawn signal watcher"
        );
    }
}
