//! Output multiplexing for one session.
//!
//! Stdout, stderr and the exit status share one connection. Every write takes
//! the connection mutex, puts exactly one whole frame on the wire, flushes and
//! releases the mutex, so frames from concurrent writers never interleave.
//! Once the exit frame is out, later output is discarded.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use kindling_protocol::{FrameKind, encode_exit_code, write_frame};

/// Largest payload put in one stdout or stderr frame.
pub(crate) const MAX_CHUNK: usize = 64 * 1024;

struct OutputState {
    sink: Box<dyn Write + Send>,
    exited: bool,
}

/// Serialises frame writes onto a shared connection.
pub struct SessionOutput {
    state: Mutex<OutputState>,
}

impl std::fmt::Debug for SessionOutput {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SessionOutput")
            .field("exited", &self.lock().exited)
            .finish_non_exhaustive()
    }
}

impl SessionOutput {
    /// Wraps the write half of a connection.
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self {
            state: Mutex::new(OutputState {
                sink: Box::new(sink),
                exited: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, OutputState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes one stdout or stderr frame.
    ///
    /// # Errors
    ///
    /// Returns the transport error when the connection fails.
    pub fn write_stream(&self, kind: FrameKind, payload: &[u8]) -> io::Result<()> {
        let mut state = self.lock();
        if state.exited {
            return Ok(());
        }
        write_frame(&mut state.sink, kind, payload)?;
        Ok(())
    }

    /// Writes the exit frame unless one has already been written. Returns
    /// whether this call wrote it.
    ///
    /// # Errors
    ///
    /// Returns the transport error when the connection fails.
    pub fn write_exit(&self, code: i32) -> io::Result<bool> {
        let mut state = self.lock();
        if state.exited {
            return Ok(false);
        }
        state.exited = true;
        write_frame(&mut state.sink, FrameKind::Exit, &encode_exit_code(code))?;
        Ok(true)
    }

    /// Whether the exit frame has been written.
    #[must_use]
    pub fn has_exited(&self) -> bool {
        self.lock().exited
    }
}

/// `Write` handle that turns each write into one frame of a fixed kind.
#[derive(Debug, Clone)]
pub struct StreamWriter {
    output: Arc<SessionOutput>,
    kind: FrameKind,
}

impl StreamWriter {
    pub(crate) fn stdout(output: &Arc<SessionOutput>) -> Self {
        Self {
            output: Arc::clone(output),
            kind: FrameKind::Stdout,
        }
    }

    pub(crate) fn stderr(output: &Arc<SessionOutput>) -> Self {
        Self {
            output: Arc::clone(output),
            kind: FrameKind::Stderr,
        }
    }
}

impl Write for StreamWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let chunk = buf.get(..MAX_CHUNK).unwrap_or(buf);
        if chunk.is_empty() {
            return Ok(0);
        }
        self.output.write_stream(self.kind, chunk)?;
        Ok(chunk.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Reports an exit status for the session bound to a worker.
#[derive(Debug, Clone)]
pub struct ExitSink {
    output: Arc<SessionOutput>,
    worker: usize,
}

impl ExitSink {
    pub(crate) fn new(output: &Arc<SessionOutput>, worker: usize) -> Self {
        Self {
            output: Arc::clone(output),
            worker,
        }
    }

    /// Index of the worker running the session.
    #[must_use]
    pub const fn worker(&self) -> usize {
        self.worker
    }

    /// Writes the exit frame if none has been written yet.
    ///
    /// # Errors
    ///
    /// Returns the transport error when the connection fails.
    pub fn report(&self, code: i32) -> io::Result<bool> {
        self.output.write_exit(code)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex, PoisonError};

    /// In-memory sink shared between a [`super::SessionOutput`] and a test.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct SharedBuffer(pub(crate) Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        pub(crate) fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
