use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Failures while binding the server socket or running the acceptor.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The listen host could not be resolved.
    #[error("cannot resolve listen address {address}: {source}")]
    Resolve {
        /// The `host:port` pair as configured.
        address: String,
        /// Resolver failure.
        #[source]
        source: io::Error,
    },
    /// The listen host resolved, but no resolved address could be bound.
    #[error("cannot bind {address}: {source}")]
    Bind {
        /// Last address attempted.
        address: SocketAddr,
        /// Failure for that address.
        #[source]
        source: io::Error,
    },
    /// The listen host resolved to nothing.
    #[error("listen address {address} resolved to no socket addresses")]
    Unresolved {
        /// The `host:port` pair as configured.
        address: String,
    },
    /// The bound socket could not be prepared for accepting.
    #[error("cannot prepare the bound socket: {source}")]
    Socket {
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
    /// The acceptor thread could not be started.
    #[error("cannot start the acceptor thread: {source}")]
    Spawn {
        /// Underlying spawn error.
        #[source]
        source: io::Error,
    },
    /// The acceptor thread panicked.
    #[error("acceptor thread panicked")]
    Panicked,
}
