use std::net::{SocketAddr, TcpStream};

/// One accepted client connection and the address it came from.
#[derive(Debug)]
pub(crate) struct Connection {
    pub(crate) stream: TcpStream,
    pub(crate) peer: SocketAddr,
}

impl Connection {
    pub(crate) const fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self { stream, peer }
    }
}

/// Receives connections from the acceptor thread.
pub(crate) trait ConnectionHandler: Send + Sync + 'static {
    /// Takes ownership of `connection`. Runs on the acceptor thread and must
    /// return without waiting on the session.
    fn handle(&self, connection: Connection);
}
