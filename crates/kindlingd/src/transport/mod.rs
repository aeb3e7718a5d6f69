//! Connection acceptance.
//!
//! [`Acceptor`] owns the bound TCP socket and, once spawned, feeds every
//! accepted connection to a [`ConnectionHandler`] from its own thread. The
//! session pool is the production handler: it queues the connection and
//! returns, so a slow session never stalls accepting.

mod errors;
mod handler;
mod listener;

pub use self::errors::ListenerError;
pub(crate) use self::handler::{Connection, ConnectionHandler};
pub(crate) use self::listener::{Acceptor, AcceptorHandle};

const ACCEPTOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
