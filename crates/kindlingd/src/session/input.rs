//! Blocking stdin for a session, fed by `0` and `.` frames.

use std::io::{self, Read};
use std::sync::{Arc, Mutex, PoisonError};

use kindling_protocol::{FrameKind, FramingError, read_frame};

const STDIN_PHASE: &str = "reading stdin";

/// Reads stdin frames from the client connection.
///
/// Data frames deliver bytes, the EOF frame ends input, and reads after EOF
/// return `0` instead of blocking. Any other frame kind is a protocol error;
/// a closed connection surfaces as [`io::ErrorKind::UnexpectedEof`].
pub struct SessionInput {
    reader: Box<dyn Read + Send>,
    pending: Vec<u8>,
    offset: usize,
    eof: bool,
}

impl std::fmt::Debug for SessionInput {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SessionInput")
            .field("buffered", &(self.pending.len() - self.offset))
            .field("eof", &self.eof)
            .finish_non_exhaustive()
    }
}

impl SessionInput {
    /// Wraps the read half of a connection positioned after the header.
    pub fn new(reader: impl Read + Send + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            pending: Vec::new(),
            offset: 0,
            eof: false,
        }
    }

    /// Whether the client has signalled end of input.
    #[must_use]
    pub const fn at_eof(&self) -> bool {
        self.eof
    }

    fn refill(&mut self) -> io::Result<()> {
        let frame = read_frame(&mut self.reader)?;
        match frame.kind() {
            FrameKind::StdinData => {
                self.pending = frame.into_payload();
                self.offset = 0;
                Ok(())
            }
            FrameKind::StdinEof => {
                self.eof = true;
                Ok(())
            }
            other => Err(FramingError::unexpected(other, STDIN_PHASE).into()),
        }
    }
}

impl Read for SessionInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if let Some(buffered) = self.pending.get(self.offset..)
                && !buffered.is_empty()
            {
                let count = buffered.len().min(buf.len());
                if let (Some(target), Some(source)) = (buf.get_mut(..count), buffered.get(..count))
                {
                    target.copy_from_slice(source);
                }
                self.offset += count;
                return Ok(count);
            }
            if self.eof {
                return Ok(0);
            }
            self.refill()?;
        }
    }
}

/// Shared, cloneable handle to a session's stdin.
#[derive(Debug, Clone)]
pub struct InputHandle(Arc<Mutex<SessionInput>>);

impl InputHandle {
    pub(crate) fn new(input: SessionInput) -> Self {
        Self(Arc::new(Mutex::new(input)))
    }
}

impl Read for InputHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .read(buf)
    }
}
