//! Lifecycle notifications for operators.
//!
//! The server calls a [`HealthReporter`] at each lifecycle milestone.
//! [`StructuredHealthReporter`] turns them into `tracing` events tagged with
//! an `event` field so they can be picked out of the JSON log stream.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info};

use kindling_config::Config;

use crate::bootstrap::BootstrapError;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Receives server lifecycle milestones.
pub trait HealthReporter: Send + Sync {
    /// Configuration is about to be loaded.
    fn bootstrap_starting(&self);

    /// Configuration is valid and logging is installed.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Start-up stopped at `error`.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// The acceptor is running on `address` with `pool_size` workers.
    fn listener_ready(&self, address: SocketAddr, pool_size: usize);

    /// The first stop request arrived; `source` names the requester.
    fn shutdown_requested(&self, source: &str);

    /// The acceptor and all workers have been joined.
    fn shutdown_completed(&self);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn listener_ready(&self, address: SocketAddr, pool_size: usize) {
        (**self).listener_ready(address, pool_size);
    }

    fn shutdown_requested(&self, source: &str) {
        (**self).shutdown_requested(source);
    }

    fn shutdown_completed(&self) {
        (**self).shutdown_completed();
    }
}

/// Reports milestones as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds the reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        info!(target: HEALTH_TARGET, event = "bootstrap_starting", "loading configuration");
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            listen = %config.listen_address(),
            pool_size = config.pool_size(),
            direct_lookup = config.allow_direct_lookup(),
            default_entry_point = config.default_entry_point().unwrap_or("none"),
            log_format = %config.log_format(),
            "configuration loaded"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        error!(target: HEALTH_TARGET, event = "bootstrap_failed", %error, "server failed to start");
    }

    fn listener_ready(&self, address: SocketAddr, pool_size: usize) {
        info!(
            target: HEALTH_TARGET,
            event = "listener_ready",
            %address,
            pool_size,
            "kindling server listening"
        );
    }

    fn shutdown_requested(&self, source: &str) {
        info!(target: HEALTH_TARGET, event = "shutdown_requested", source, "server stopping");
    }

    fn shutdown_completed(&self) {
        info!(target: HEALTH_TARGET, event = "shutdown_completed", "server stopped");
    }
}
