use std::io;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::info;

use super::PROCESS_TARGET;

/// Signals that stop the server gracefully.
const STOP_SIGNALS: [(i32, &str); 4] = [
    (SIGTERM, "SIGTERM"),
    (SIGINT, "SIGINT"),
    (SIGQUIT, "SIGQUIT"),
    (SIGHUP, "SIGHUP"),
];

/// Source of an external stop request.
pub trait ShutdownSignal: Send + Sync {
    /// Blocks until a stop is requested and names what requested it.
    fn wait(&self) -> Result<&'static str, ShutdownError>;
}

/// Failure to listen for stop requests.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Signal handlers could not be registered.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying registration error.
        #[source]
        source: io::Error,
    },
}

/// Waits for SIGTERM, SIGINT, SIGQUIT or SIGHUP.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemShutdownSignal;

impl SystemShutdownSignal {
    /// Builds the listener; handlers are registered on the first `wait`.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self) -> Result<&'static str, ShutdownError> {
        let mut signals = Signals::new(STOP_SIGNALS.map(|(signal, _)| signal))
            .map_err(|source| ShutdownError::Install { source })?;
        let received = signals.forever().next();
        let name = received
            .and_then(|signal| STOP_SIGNALS.iter().find(|(known, _)| *known == signal))
            .map_or("signal", |(_, name)| *name);
        info!(target: PROCESS_TARGET, signal = name, "stop signal received");
        Ok(name)
    }
}
