//! The accept loop.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{ACCEPTOR_TARGET, Connection, ConnectionHandler, ListenerError};

const POLL_INTERVAL: Duration = Duration::from_millis(25);
const ERROR_PAUSE: Duration = Duration::from_millis(150);
const ACCEPTOR_THREAD_NAME: &str = "kindling-acceptor";

/// A bound, not yet accepting, server socket.
#[derive(Debug)]
pub(crate) struct Acceptor {
    listener: TcpListener,
    address: SocketAddr,
}

impl Acceptor {
    /// Binds the first address `host` resolves to that accepts the bind.
    pub(crate) fn bind(host: &str, port: u16) -> Result<Self, ListenerError> {
        let label = format!("{host}:{port}");
        let candidates = (host, port)
            .to_socket_addrs()
            .map_err(|source| ListenerError::Resolve {
                address: label.clone(),
                source,
            })?;
        let mut failure = None;
        for candidate in candidates {
            match TcpListener::bind(candidate) {
                Ok(listener) => return Self::prepare(listener),
                Err(source) => {
                    debug!(target: ACCEPTOR_TARGET, address = %candidate, %source, "bind failed");
                    failure = Some(ListenerError::Bind {
                        address: candidate,
                        source,
                    });
                }
            }
        }
        Err(failure.unwrap_or(ListenerError::Unresolved { address: label }))
    }

    fn prepare(listener: TcpListener) -> Result<Self, ListenerError> {
        let address = listener
            .local_addr()
            .map_err(|source| ListenerError::Socket { source })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| ListenerError::Socket { source })?;
        Ok(Self { listener, address })
    }

    /// Bound address; carries the real port when port zero was requested.
    pub(crate) const fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Starts accepting on a dedicated thread.
    pub(crate) fn spawn(
        self,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<AcceptorHandle, ListenerError> {
        let stop = Arc::new(AtomicBool::new(false));
        let accept_loop = AcceptLoop {
            acceptor: self,
            stop: Arc::clone(&stop),
            handler,
        };
        let thread = thread::Builder::new()
            .name(ACCEPTOR_THREAD_NAME.to_owned())
            .spawn(move || accept_loop.run())
            .map_err(|source| ListenerError::Spawn { source })?;
        Ok(AcceptorHandle {
            stop,
            thread: Some(thread),
        })
    }
}

/// Controls a running acceptor thread. Dropping the handle stops accepting
/// without waiting for the thread.
#[derive(Debug)]
pub(crate) struct AcceptorHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl AcceptorHandle {
    pub(crate) fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub(crate) fn join(mut self) -> Result<(), ListenerError> {
        self.stop();
        self.thread
            .take()
            .map_or(Ok(()), |thread| thread.join().map_err(|_| ListenerError::Panicked))
    }
}

impl Drop for AcceptorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

struct AcceptLoop {
    acceptor: Acceptor,
    stop: Arc<AtomicBool>,
    handler: Arc<dyn ConnectionHandler>,
}

impl AcceptLoop {
    fn run(self) {
        let address = self.acceptor.address;
        info!(target: ACCEPTOR_TARGET, %address, "accepting connections");
        let mut errors = ErrorRun::default();
        while !self.stop.load(Ordering::Acquire) {
            match self.acceptor.listener.accept() {
                Ok((stream, peer)) => {
                    errors.clear();
                    self.hand_off(stream, peer);
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(POLL_INTERVAL);
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => {
                    errors.record(&error);
                    thread::sleep(ERROR_PAUSE);
                }
            }
        }
        errors.clear();
        info!(target: ACCEPTOR_TARGET, %address, "acceptor stopped");
    }

    fn hand_off(&self, stream: TcpStream, peer: SocketAddr) {
        // Sessions use blocking reads; some platforms hand out accepted
        // sockets in the listener's non-blocking mode.
        if let Err(error) = stream.set_nonblocking(false) {
            warn!(target: ACCEPTOR_TARGET, %peer, %error, "dropping connection");
            return;
        }
        if let Err(error) = stream.set_nodelay(true) {
            debug!(target: ACCEPTOR_TARGET, %peer, %error, "cannot disable Nagle");
        }
        debug!(target: ACCEPTOR_TARGET, %peer, "accepted connection");
        self.handler.handle(Connection::new(stream, peer));
    }
}

/// Collapses a run of identical accept errors into one warning.
#[derive(Default)]
struct ErrorRun {
    kind: Option<io::ErrorKind>,
    repeats: u64,
}

impl ErrorRun {
    fn record(&mut self, error: &io::Error) {
        if self.kind == Some(error.kind()) {
            self.repeats += 1;
            return;
        }
        self.clear();
        warn!(target: ACCEPTOR_TARGET, %error, "accept failed");
        self.kind = Some(error.kind());
    }

    fn clear(&mut self) {
        if self.repeats > 0 {
            debug!(target: ACCEPTOR_TARGET, repeats = self.repeats, "accept errors suppressed");
        }
        self.kind = None;
        self.repeats = 0;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::mpsc::{self, Receiver, Sender};

    use super::*;

    struct Forwarding {
        peers: Mutex<Sender<SocketAddr>>,
    }

    impl Forwarding {
        fn new() -> (Receiver<SocketAddr>, Arc<Self>) {
            let (sender, receiver) = mpsc::channel();
            (
                receiver,
                Arc::new(Self {
                    peers: Mutex::new(sender),
                }),
            )
        }
    }

    impl ConnectionHandler for Forwarding {
        fn handle(&self, connection: Connection) {
            assert!(
                connection.stream.nodelay().expect("nodelay"),
                "accepted sockets disable Nagle"
            );
            let peers = self.peers.lock().expect("sender");
            peers.send(connection.peer).expect("forward peer");
        }
    }

    #[test]
    fn accepted_connections_reach_the_handler() {
        let acceptor = Acceptor::bind("127.0.0.1", 0).expect("bind");
        let address = acceptor.local_addr();
        assert_ne!(address.port(), 0);
        let (peers, handler) = Forwarding::new();
        let handle = acceptor.spawn(handler).expect("spawn");

        let first = TcpStream::connect(address).expect("first client");
        let second = TcpStream::connect(address).expect("second client");
        let seen = [
            peers.recv_timeout(Duration::from_secs(2)).expect("first peer"),
            peers.recv_timeout(Duration::from_secs(2)).expect("second peer"),
        ];

        let expected = [
            first.local_addr().expect("first addr"),
            second.local_addr().expect("second addr"),
        ];
        assert!(seen.iter().all(|peer| expected.contains(peer)));
        handle.join().expect("join");
    }

    #[test]
    fn stopped_acceptors_exit() {
        let acceptor = Acceptor::bind("127.0.0.1", 0).expect("bind");
        let (_peers, handler) = Forwarding::new();
        let handle = acceptor.spawn(handler).expect("spawn");
        handle.stop();
        handle.join().expect("acceptor exits after stop");
    }

    #[test]
    fn binding_a_taken_port_fails() {
        let reserved = TcpListener::bind("127.0.0.1:0").expect("reserve port");
        let port = reserved.local_addr().expect("reserved addr").port();
        let error = Acceptor::bind("127.0.0.1", port).expect_err("port is taken");
        assert!(matches!(error, ListenerError::Bind { .. }));
    }

    #[test]
    fn unresolvable_hosts_are_reported() {
        let error = Acceptor::bind("host.invalid.", 2113).expect_err("must not resolve");
        assert!(matches!(
            error,
            ListenerError::Resolve { .. } | ListenerError::Unresolved { .. }
        ));
    }
}
