//! Error types for the client runtime.

use std::io;

use kindling_protocol::ClientError;
use thiserror::Error;

/// Status for failures on the client side before the server is contacted.
const LOCAL_FAILURE_EXIT: i32 = 999;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("failed to read the working directory: {0}")]
    WorkingDirectory(io::Error),
    #[error(transparent)]
    Client(#[from] ClientError),
}

impl AppError {
    /// Status the client process exits with.
    pub(crate) fn exit_code(&self) -> i32 {
        match self {
            Self::CliUsage(error) => error.exit_code(),
            Self::WorkingDirectory(_) => LOCAL_FAILURE_EXIT,
            Self::Client(error) => error.exit_code(),
        }
    }
}
