//! Defines the unified error surface for server launch and supervision.

use thiserror::Error;

use crate::bootstrap::BootstrapError;
use crate::entry::RegistryError;
use crate::pool::PoolError;
use crate::transport::ListenerError;

/// Errors surfaced while launching or supervising the server process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Bootstrap failed.
    #[error(transparent)]
    Bootstrap {
        /// Underlying bootstrap error.
        #[from]
        source: BootstrapError,
    },
    /// Assembling the entry-point registry failed.
    #[error("failed to build entry-point registry: {source}")]
    Registry {
        /// Underlying registry error.
        #[from]
        source: RegistryError,
    },
    /// Binding or running the acceptor failed.
    #[error("listener failure: {source}")]
    Listener {
        /// Underlying listener error.
        #[from]
        source: ListenerError,
    },
    /// Starting or stopping the session pool failed.
    #[error("session pool failure: {source}")]
    Pool {
        /// Underlying pool error.
        #[from]
        source: PoolError,
    },
}
