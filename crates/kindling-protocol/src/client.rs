//! Blocking client that drives one invocation end to end.
//!
//! The client writes the request header, relays stdin on a detached thread
//! through a clone of the socket, and copies `1`/`2` frames to the caller's
//! writers until the `X` frame arrives.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::thread;

use thiserror::Error;

use crate::codec::{FramingError, read_frame, write_frame};
use crate::exit::parse_exit_code;
use crate::frame::FrameKind;
use crate::request::Request;

const STDIN_CHUNK: usize = 2048;

/// Errors raised on the client side of an invocation.
///
/// Each variant maps to a process exit status through
/// [`ClientError::exit_code`], following the usual thin-client
/// codes.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A local socket could not be prepared.
    #[error("failed to prepare socket: {source}")]
    Socket {
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The server could not be reached.
    #[error("failed to connect to {address}: {source}")]
    Connect {
        /// Address that was tried.
        address: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The server sent a frame the client does not expect.
    #[error("unexpected {kind} frame from server")]
    UnexpectedFrame {
        /// Kind of the offending frame.
        kind: FrameKind,
    },

    /// The server sent an exit frame that is not a decimal status.
    #[error("malformed exit frame: {source}")]
    InvalidExit {
        /// Parse failure.
        #[source]
        source: FramingError,
    },

    /// The connection failed before the exit frame arrived.
    #[error("connection to server broken: {source}")]
    ConnectionBroken {
        /// Underlying framing or transport error.
        #[source]
        source: FramingError,
    },

    /// Relayed output could not be written locally.
    #[error("failed to write relayed output: {source}")]
    Output {
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

impl ClientError {
    /// Exit status a command-line client reports for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Socket { .. } | Self::Output { .. } => 999,
            Self::Connect { .. } => 998,
            Self::UnexpectedFrame { .. } | Self::InvalidExit { .. } => 997,
            Self::ConnectionBroken { .. } => 995,
        }
    }
}

/// Output collected from one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    /// Bytes received on stdout frames.
    pub stdout: Vec<u8>,
    /// Bytes received on stderr frames.
    pub stderr: Vec<u8>,
    /// Exit status from the exit frame.
    pub exit: i32,
}

impl Transcript {
    /// Stdout as lossily decoded text.
    #[must_use]
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stderr as lossily decoded text.
    #[must_use]
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// A connected client, good for exactly one invocation.
#[derive(Debug)]
pub struct Client {
    stream: TcpStream,
}

impl Client {
    /// Connects to a server.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connect`] when no resolved address accepts the
    /// connection.
    pub fn connect<A>(address: A) -> Result<Self, ClientError>
    where
        A: ToSocketAddrs + std::fmt::Debug,
    {
        let label = format!("{address:?}");
        let stream = TcpStream::connect(&address).map_err(|source| ClientError::Connect {
            address: label,
            source,
        })?;
        Ok(Self::from_stream(stream))
    }

    /// Wraps an already-connected stream.
    #[must_use]
    pub const fn from_stream(stream: TcpStream) -> Self {
        Self { stream }
    }

    /// Runs `request`, relaying `stdin` and writing server output to
    /// `stdout`/`stderr`. Returns the exit status sent by the server.
    ///
    /// When `stdin` is `None` the client signals end of input straight after
    /// the header.
    ///
    /// # Errors
    ///
    /// Returns a [`ClientError`] when the connection fails, the server
    /// violates the protocol, or relayed output cannot be written.
    pub fn invoke<R, O, E>(
        self,
        request: &Request,
        stdin: Option<R>,
        stdout: &mut O,
        stderr: &mut E,
    ) -> Result<i32, ClientError>
    where
        R: Read + Send + 'static,
        O: Write + ?Sized,
        E: Write + ?Sized,
    {
        let mut stream = self.stream;
        request
            .write_to(&mut stream)
            .map_err(|source| ClientError::ConnectionBroken { source })?;

        match stdin {
            Some(input) => {
                let writer = stream
                    .try_clone()
                    .map_err(|source| ClientError::Socket { source })?;
                thread::Builder::new()
                    .name("kindling-stdin".into())
                    .spawn(move || relay_stdin(input, writer))
                    .map_err(|source| ClientError::Socket { source })?;
            }
            None => {
                write_frame(&mut stream, FrameKind::StdinEof, &[])
                    .map_err(|source| ClientError::ConnectionBroken { source })?;
            }
        }

        let status = read_response(&mut stream, stdout, stderr);
        drop(stream.shutdown(Shutdown::Both));
        status
    }

    /// Runs `request` with the given stdin bytes and collects all output.
    ///
    /// # Errors
    ///
    /// See [`Client::invoke`].
    pub fn collect(
        self,
        request: &Request,
        stdin: impl Into<Vec<u8>>,
    ) -> Result<Transcript, ClientError> {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let input = io::Cursor::new(stdin.into());
        let exit = self.invoke(request, Some(input), &mut stdout, &mut stderr)?;
        Ok(Transcript {
            stdout,
            stderr,
            exit,
        })
    }
}

fn read_response<O, E>(
    stream: &mut TcpStream,
    stdout: &mut O,
    stderr: &mut E,
) -> Result<i32, ClientError>
where
    O: Write + ?Sized,
    E: Write + ?Sized,
{
    loop {
        let frame = read_frame(stream).map_err(|source| ClientError::ConnectionBroken { source })?;
        match frame.kind() {
            FrameKind::Stdout => relay(stdout, frame.payload())?,
            FrameKind::Stderr => relay(stderr, frame.payload())?,
            FrameKind::Exit => {
                return parse_exit_code(frame.payload())
                    .map_err(|source| ClientError::InvalidExit { source });
            }
            kind => return Err(ClientError::UnexpectedFrame { kind }),
        }
    }
}

fn relay<W>(writer: &mut W, bytes: &[u8]) -> Result<(), ClientError>
where
    W: Write + ?Sized,
{
    writer
        .write_all(bytes)
        .and_then(|()| writer.flush())
        .map_err(|source| ClientError::Output { source })
}

/// Copies local input to the server until EOF, then sends the EOF frame.
/// Failures end the relay quietly; the response reader reports the broken
/// connection.
fn relay_stdin<R: Read>(mut input: R, mut writer: TcpStream) {
    let mut buffer = [0_u8; STDIN_CHUNK];
    loop {
        let read = match input.read(&mut buffer) {
            Ok(read) => read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => 0,
        };
        let sent = match buffer.get(..read) {
            Some([]) | None => {
                write_frame(&mut writer, FrameKind::StdinEof, &[]).map(|()| false)
            }
            Some(chunk) => write_frame(&mut writer, FrameKind::StdinData, chunk).map(|()| true),
        };
        if !matches!(sent, Ok(true)) {
            return;
        }
    }
}
