//! One client connection from header to close.
//!
//! A session moves through `AwaitingHeader`, `Dispatching`, `Running`,
//! `Completing` and `Closed`. Framing errors while the header is read abort
//! straight to `Closed` without an exit frame; every other path writes exactly
//! one exit frame before the connection is closed.

mod dispatch;
mod errors;
mod input;
pub(crate) mod output;

use std::fmt;
use std::io::{self, BufReader, Read};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use kindling_protocol::{EXIT_NO_SUCH_COMMAND, Request};
use tracing::{debug, field};

use crate::entry::EntryPointResolver;
use crate::pool::{SessionHandler, WorkerSlot};
use crate::server::ServerHandle;
use crate::transport::Connection;

use self::dispatch::Invocation;

pub use errors::SessionError;
pub use input::{InputHandle, SessionInput};
pub use output::{ExitSink, SessionOutput, StreamWriter};

pub(crate) const SESSION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::session");

/// Upper bound on the time spent draining client input before closing.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);
const DRAIN_LIMIT: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    AwaitingHeader,
    Dispatching,
    Running,
    Completing,
    Closed,
}

impl SessionState {
    const fn as_str(self) -> &'static str {
        match self {
            Self::AwaitingHeader => "awaiting_header",
            Self::Dispatching => "dispatching",
            Self::Running => "running",
            Self::Completing => "completing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

fn enter(state: SessionState, peer: SocketAddr) {
    debug!(target: SESSION_TARGET, %peer, state = %state, "session state");
}

/// Serves sessions on pool workers.
pub struct SessionRunner {
    resolver: Arc<dyn EntryPointResolver>,
    server: ServerHandle,
    header_timeout: Option<Duration>,
}

impl fmt::Debug for SessionRunner {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SessionRunner")
            .field("header_timeout", &self.header_timeout)
            .finish_non_exhaustive()
    }
}

impl SessionRunner {
    /// Builds a runner resolving commands through `resolver`. A
    /// `header_timeout` bounds each read while the request header is
    /// awaited.
    #[must_use]
    pub fn new(
        resolver: Arc<dyn EntryPointResolver>,
        server: ServerHandle,
        header_timeout: Option<Duration>,
    ) -> Self {
        Self {
            resolver,
            server,
            header_timeout,
        }
    }

    fn run(
        &self,
        stream: &TcpStream,
        peer: SocketAddr,
        worker: &WorkerSlot,
    ) -> Result<(), SessionError> {
        enter(SessionState::AwaitingHeader, peer);
        stream
            .set_read_timeout(self.header_timeout)
            .map_err(|source| SessionError::Socket { source })?;
        let read_half = stream
            .try_clone()
            .map_err(|source| SessionError::Socket { source })?;
        let write_half = stream
            .try_clone()
            .map_err(|source| SessionError::Socket { source })?;
        let mut reader = BufReader::new(read_half);
        let request = Request::read_from(&mut reader, Some(peer))
            .map_err(|source| SessionError::Header { source })?;
        stream
            .set_read_timeout(None)
            .map_err(|source| SessionError::Socket { source })?;

        enter(SessionState::Dispatching, peer);
        worker.span().record("command", request.command());
        let output = Arc::new(SessionOutput::new(write_half));
        let entry = self
            .resolver
            .resolve(request.command())
            .or_else(|| self.resolver.default_entry_point());
        let code = match entry {
            Some(entry) => {
                enter(SessionState::Running, peer);
                dispatch::invoke(
                    entry.as_ref(),
                    Invocation {
                        request: &request,
                        output: &output,
                        stdin: InputHandle::new(SessionInput::new(reader)),
                        server: &self.server,
                        worker,
                    },
                )
            }
            None => {
                debug!(
                    target: SESSION_TARGET,
                    %peer,
                    command = request.command(),
                    "no entry point for command"
                );
                EXIT_NO_SUCH_COMMAND
            }
        };

        enter(SessionState::Completing, peer);
        output
            .write_exit(code)
            .map_err(|source| SessionError::Exit { source })?;
        Ok(())
    }
}

impl SessionHandler<Connection> for SessionRunner {
    fn serve(&self, connection: Connection, worker: &WorkerSlot) {
        let Connection { stream, peer } = connection;
        worker.span().record("peer", field::display(peer));
        let drain = match self.run(&stream, peer, worker) {
            Ok(()) => true,
            Err(error) => {
                debug!(
                    target: SESSION_TARGET,
                    %peer,
                    disconnect = error.is_disconnect(),
                    %error,
                    "session aborted"
                );
                !matches!(error, SessionError::Header { .. })
            }
        };
        close(&stream, drain);
        enter(SessionState::Closed, peer);
    }
}

/// Half-closes the connection, optionally drains what the client is still
/// sending so the close is not turned into a reset, then closes fully.
/// Clients that sent a malformed header are not drained.
fn close(stream: &TcpStream, drain: bool) {
    if stream.shutdown(Shutdown::Write).is_ok()
        && drain
        && stream.set_read_timeout(Some(DRAIN_TIMEOUT)).is_ok()
    {
        let mut reader = stream.take(DRAIN_LIMIT);
        if let Err(error) = io::copy(&mut reader, &mut io::sink()) {
            debug!(target: SESSION_TARGET, %error, "stopped draining client input");
        }
    }
    if let Err(error) = stream.shutdown(Shutdown::Both)
        && error.kind() != io::ErrorKind::NotConnected
    {
        debug!(target: SESSION_TARGET, %error, "failed to close connection");
    }
}
