//! Entry points: the units of work clients invoke by name.
//!
//! An entry point exposes one or both invocation shapes. The context shape
//! receives a [`SessionContext`] carrying the request, explicit I/O handles
//! and the server handle; the argv shape receives only the arguments and
//! talks to the client through [`crate::stdio`]. When both are offered the
//! context shape is used.

mod builtins;
mod demos;
mod registry;

use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use kindling_protocol::Request;
use thiserror::Error;

use crate::exit_trap;
use crate::pool::WorkerSlot;
use crate::server::ServerHandle;
use crate::session::{InputHandle, StreamWriter};

pub use builtins::{
    ALIAS_IDENTITY, DEFAULT_ENTRY_POINT_IDENTITY, STATS_IDENTITY, STOP_IDENTITY, VERSION_IDENTITY,
    register_builtins,
};
pub use demos::register_demos;
pub use registry::{Alias, Registry, RegistryError};

/// Errors an entry point may return instead of completing normally. Each one
/// ends the session with the failure status.
#[derive(Debug, Error)]
pub enum EntryPointError {
    /// Reading or writing a stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The arguments do not fit the entry point's usage.
    #[error("usage: {message}")]
    Usage {
        /// Usage text.
        message: String,
    },
    /// Any other failure.
    #[error("{message}")]
    Failed {
        /// Description of the failure.
        message: String,
    },
}

impl EntryPointError {
    /// Creates a usage error.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    /// Creates a general failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// Entry points taking the full session context.
pub trait ContextInvocable: Send + Sync {
    /// Runs the entry point.
    ///
    /// # Errors
    ///
    /// Any error ends the session with the failure status after its message
    /// is written to the client's stderr.
    fn run(&self, context: &mut SessionContext<'_>) -> Result<(), EntryPointError>;
}

/// Entry points taking only their arguments.
pub trait ArgvInvocable: Send + Sync {
    /// Runs the entry point.
    ///
    /// # Errors
    ///
    /// Any error ends the session with the failure status after its message
    /// is written to the client's stderr.
    fn main(&self, args: &[String]) -> Result<(), EntryPointError>;
}

/// A named, invocable unit.
pub trait EntryPoint: Send + Sync {
    /// Fully qualified identity, for example `kindling.builtins.Version`.
    fn identity(&self) -> &str;

    /// The context-shaped view, if supported.
    fn as_context(&self) -> Option<&dyn ContextInvocable> {
        None
    }

    /// The argv-shaped view, if supported.
    fn as_argv(&self) -> Option<&dyn ArgvInvocable> {
        None
    }
}

/// Maps command names to entry points.
pub trait EntryPointResolver: Send + Sync {
    /// Resolves `command` through the alias table, then as an identity when
    /// direct lookup is enabled.
    fn resolve(&self, command: &str) -> Option<Arc<dyn EntryPoint>>;

    /// The entry point run when nothing else resolves.
    fn default_entry_point(&self) -> Option<Arc<dyn EntryPoint>>;
}

/// Everything a context-shaped entry point can see of its session.
pub struct SessionContext<'a> {
    request: &'a Request,
    stdin: InputHandle,
    stdout: StreamWriter,
    stderr: StreamWriter,
    server: &'a ServerHandle,
    worker: &'a WorkerSlot,
}

impl std::fmt::Debug for SessionContext<'_> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SessionContext")
            .field("command", &self.request.command())
            .field("worker", &self.worker.name())
            .finish_non_exhaustive()
    }
}

impl<'a> SessionContext<'a> {
    pub(crate) const fn new(
        request: &'a Request,
        stdin: InputHandle,
        stdout: StreamWriter,
        stderr: StreamWriter,
        server: &'a ServerHandle,
        worker: &'a WorkerSlot,
    ) -> Self {
        Self {
            request,
            stdin,
            stdout,
            stderr,
            server,
            worker,
        }
    }

    /// The request being served.
    #[must_use]
    pub const fn request(&self) -> &'a Request {
        self.request
    }

    /// The command name as sent by the client.
    #[must_use]
    pub fn command(&self) -> &str {
        self.request.command()
    }

    /// Arguments in the order sent.
    #[must_use]
    pub fn args(&self) -> &[String] {
        self.request.args()
    }

    /// The client's environment.
    #[must_use]
    pub const fn env(&self) -> &BTreeMap<String, String> {
        self.request.env()
    }

    /// The client's working directory.
    #[must_use]
    pub fn cwd(&self) -> &str {
        self.request.cwd()
    }

    /// The client's socket address.
    #[must_use]
    pub const fn peer(&self) -> Option<SocketAddr> {
        self.request.peer()
    }

    /// The session's stdin.
    pub fn stdin(&mut self) -> &mut InputHandle {
        &mut self.stdin
    }

    /// The session's stdout.
    pub fn stdout(&mut self) -> &mut StreamWriter {
        &mut self.stdout
    }

    /// The session's stderr.
    pub fn stderr(&mut self) -> &mut StreamWriter {
        &mut self.stderr
    }

    /// The server this session runs in.
    #[must_use]
    pub const fn server(&self) -> &'a ServerHandle {
        self.server
    }

    /// The worker running this session.
    #[must_use]
    pub const fn worker(&self) -> &WorkerSlot {
        self.worker
    }

    /// Ends the session with `code`. See [`exit_trap::exit`].
    pub fn exit(&self, code: i32) -> ! {
        exit_trap::exit(code)
    }
}

/// Adapts a closure into an argv-shaped entry point.
pub struct ArgvFn<F> {
    identity: String,
    main: F,
}

impl<F> ArgvFn<F>
where
    F: Fn(&[String]) -> Result<(), EntryPointError> + Send + Sync,
{
    /// Wraps `main` under `identity`.
    pub fn new(identity: impl Into<String>, main: F) -> Self {
        Self {
            identity: identity.into(),
            main,
        }
    }
}

impl<F> ArgvInvocable for ArgvFn<F>
where
    F: Fn(&[String]) -> Result<(), EntryPointError> + Send + Sync,
{
    fn main(&self, args: &[String]) -> Result<(), EntryPointError> {
        (self.main)(args)
    }
}

impl<F> EntryPoint for ArgvFn<F>
where
    F: Fn(&[String]) -> Result<(), EntryPointError> + Send + Sync,
{
    fn identity(&self) -> &str {
        &self.identity
    }

    fn as_argv(&self) -> Option<&dyn ArgvInvocable> {
        Some(self)
    }
}

/// Adapts a closure into a context-shaped entry point.
pub struct ContextFn<F> {
    identity: String,
    run: F,
}

impl<F> ContextFn<F>
where
    F: Fn(&mut SessionContext<'_>) -> Result<(), EntryPointError> + Send + Sync,
{
    /// Wraps `run` under `identity`.
    pub fn new(identity: impl Into<String>, run: F) -> Self {
        Self {
            identity: identity.into(),
            run,
        }
    }
}

impl<F> ContextInvocable for ContextFn<F>
where
    F: Fn(&mut SessionContext<'_>) -> Result<(), EntryPointError> + Send + Sync,
{
    fn run(&self, context: &mut SessionContext<'_>) -> Result<(), EntryPointError> {
        (self.run)(context)
    }
}

impl<F> EntryPoint for ContextFn<F>
where
    F: Fn(&mut SessionContext<'_>) -> Result<(), EntryPointError> + Send + Sync,
{
    fn identity(&self) -> &str {
        &self.identity
    }

    fn as_context(&self) -> Option<&dyn ContextInvocable> {
        Some(self)
    }
}
