use std::io;

use kindling_protocol::FramingError;
use thiserror::Error;

/// Reasons a session ends without completing normally.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Preparing the connection for the session failed.
    #[error("failed to prepare connection: {source}")]
    Socket {
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },
    /// The request header was malformed or the client went away.
    #[error("failed to read request header: {source}")]
    Header {
        /// Underlying framing error.
        #[source]
        source: FramingError,
    },
    /// Writing the exit frame failed.
    #[error("failed to write exit status: {source}")]
    Exit {
        /// Underlying transport error.
        #[source]
        source: io::Error,
    },
}

impl SessionError {
    /// Whether the failure is a client-side disconnect rather than a
    /// malformed request.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Header { source } => source.is_disconnect(),
            Self::Socket { .. } | Self::Exit { .. } => true,
        }
    }
}
