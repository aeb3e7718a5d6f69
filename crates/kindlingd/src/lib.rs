//! Kindling server: runs named entry points on behalf of thin TCP clients.
//!
//! A client connects, sends its arguments, environment, working directory and
//! command as frames, and then streams stdin while the server streams stdout,
//! stderr and finally an exit status back over the same connection. The
//! server stays resident, so each command pays only for a connection rather
//! than for a process start.
//!
//! The moving parts:
//!
//! - an acceptor thread ([`Runtime`]) hands each connection to a fixed-size
//!   [`SessionPool`];
//! - a pool worker runs one session at a time from header to close, with the
//!   session's streams bound to the worker through [`stdio`];
//! - entry points are looked up in a [`entry::Registry`] by alias or by
//!   identity and may end their session early through [`exit_trap::exit`];
//! - [`bootstrap_with`] loads configuration and installs telemetry, and
//!   [`run_daemon`] wires everything together and waits for a signal or the
//!   `kindling-stop` builtin.
//!
//! Health reporting hooks emit structured events at each lifecycle stage.

mod bootstrap;
pub mod entry;
pub mod exit_trap;
mod health;
mod pool;
mod process;
mod server;
mod session;
pub mod stdio;
mod telemetry;
mod transport;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Daemon, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use pool::{PoolError, SessionHandler, SessionPool, WorkerSlot};
pub use process::{
    LaunchError, Runtime, ShutdownError, ShutdownSignal, SystemShutdownSignal, default_registry,
    run_daemon,
};
pub use server::{EntryStats, ServerHandle};
pub use session::{
    ExitSink, InputHandle, SessionError, SessionInput, SessionOutput, SessionRunner, StreamWriter,
};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use transport::ListenerError;

#[cfg(test)]
mod tests;
