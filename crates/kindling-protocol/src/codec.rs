//! Reads and writes single frames.
//!
//! Decoding reads exactly [`HEADER_LEN`] bytes, then exactly the declared
//! number of payload bytes. A connection that closes part-way through either
//! read is a [`FramingError`]; nothing is ever returned half-decoded.
//! Encoding builds header and payload into one buffer so that a single
//! `write_all` puts the whole frame on the wire.

use std::io::{self, Read, Write};
use std::str::Utf8Error;

use thiserror::Error;

use crate::frame::{Frame, FrameKind, HEADER_LEN, MAX_PAYLOAD_LEN};

/// Errors raised while decoding or encoding frames.
#[derive(Debug, Error)]
pub enum FramingError {
    /// The peer closed the connection cleanly before a new frame began.
    #[error("connection closed before a frame header")]
    Closed,

    /// The peer closed the connection part-way through a frame.
    #[error("truncated frame {section}: expected {expected} bytes, received {received}")]
    Truncated {
        /// Which part of the frame was being read.
        section: &'static str,
        /// Bytes required for that part.
        expected: usize,
        /// Bytes received before the connection closed.
        received: usize,
    },

    /// The kind tag is not part of the protocol.
    #[error("unknown frame kind 0x{tag:02X}")]
    UnknownKind {
        /// The offending tag byte.
        tag: u8,
    },

    /// The declared payload length exceeds what the codec accepts.
    #[error("frame payload of {length} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge {
        /// Declared or attempted payload length.
        length: usize,
        /// Configured limit.
        limit: usize,
    },

    /// A text-bearing payload is not valid text.
    #[error("{kind} frame payload is not valid text: {source}")]
    InvalidText {
        /// Kind of the frame carrying the payload.
        kind: FrameKind,
        /// Decoding failure.
        #[source]
        source: Utf8Error,
    },

    /// An environment payload is not a `KEY=VALUE` pair.
    #[error("invalid environment entry '{payload}': {reason}")]
    InvalidEnvironment {
        /// The raw entry text.
        payload: String,
        /// Why the entry was rejected.
        reason: &'static str,
    },

    /// A frame kind arrived where the protocol does not allow it.
    #[error("unexpected {kind} frame while {phase}")]
    UnexpectedFrame {
        /// The frame kind received.
        kind: FrameKind,
        /// The protocol phase in which it arrived.
        phase: &'static str,
    },

    /// An exit payload is not a decimal integer.
    #[error("invalid exit code '{payload}'")]
    InvalidExitCode {
        /// The raw payload text.
        payload: String,
    },

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

impl FramingError {
    /// Returns `true` when the error means the peer went away rather than
    /// sent something malformed.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Closed | Self::Truncated { .. } => true,
            Self::Io(error) => matches!(
                error.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }

    /// Creates an unexpected frame error.
    #[must_use]
    pub const fn unexpected(kind: FrameKind, phase: &'static str) -> Self {
        Self::UnexpectedFrame { kind, phase }
    }

    /// Creates an invalid environment error.
    pub fn invalid_environment(payload: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidEnvironment {
            payload: payload.into(),
            reason,
        }
    }
}

impl From<FramingError> for io::Error {
    fn from(error: FramingError) -> Self {
        match error {
            FramingError::Io(source) => source,
            FramingError::Closed | FramingError::Truncated { .. } => {
                Self::new(io::ErrorKind::UnexpectedEof, error)
            }
            other => Self::new(io::ErrorKind::InvalidData, other),
        }
    }
}

/// Reads one complete frame.
///
/// # Errors
///
/// Returns [`FramingError::Closed`] when the stream ends before any header
/// byte, [`FramingError::Truncated`] when it ends inside a frame,
/// [`FramingError::UnknownKind`] for an unrecognised tag and
/// [`FramingError::PayloadTooLarge`] when the declared length exceeds
/// [`MAX_PAYLOAD_LEN`].
pub fn read_frame<R>(reader: &mut R) -> Result<Frame, FramingError>
where
    R: Read + ?Sized,
{
    let mut header = [0_u8; HEADER_LEN];
    let received = fill(reader, &mut header)?;
    if received == 0 {
        return Err(FramingError::Closed);
    }
    if received < HEADER_LEN {
        return Err(FramingError::Truncated {
            section: "header",
            expected: HEADER_LEN,
            received,
        });
    }

    let [b0, b1, b2, b3, tag] = header;
    let declared = u32::from_be_bytes([b0, b1, b2, b3]);
    let kind = FrameKind::try_from(tag)?;
    let length = usize::try_from(declared).map_err(|_| FramingError::PayloadTooLarge {
        length: usize::MAX,
        limit: MAX_PAYLOAD_LEN,
    })?;
    if length > MAX_PAYLOAD_LEN {
        return Err(FramingError::PayloadTooLarge {
            length,
            limit: MAX_PAYLOAD_LEN,
        });
    }

    let mut payload = vec![0_u8; length];
    let received = fill(reader, &mut payload)?;
    if received < length {
        return Err(FramingError::Truncated {
            section: "payload",
            expected: length,
            received,
        });
    }
    Ok(Frame::new(kind, payload))
}

/// Encodes one frame into a contiguous buffer.
///
/// # Errors
///
/// Returns [`FramingError::PayloadTooLarge`] when the payload does not fit
/// the 32-bit length field or exceeds [`MAX_PAYLOAD_LEN`].
pub fn encode_frame(kind: FrameKind, payload: &[u8]) -> Result<Vec<u8>, FramingError> {
    let too_large = || FramingError::PayloadTooLarge {
        length: payload.len(),
        limit: MAX_PAYLOAD_LEN,
    };
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(too_large());
    }
    let length = u32::try_from(payload.len()).map_err(|_| too_large())?;

    let mut buffer = Vec::with_capacity(HEADER_LEN + payload.len());
    buffer.extend_from_slice(&length.to_be_bytes());
    buffer.push(kind.tag());
    buffer.extend_from_slice(payload);
    Ok(buffer)
}

/// Writes one frame and flushes the writer.
///
/// # Errors
///
/// Returns [`FramingError::PayloadTooLarge`] for oversized payloads and
/// [`FramingError::Io`] when the writer fails.
pub fn write_frame<W>(writer: &mut W, kind: FrameKind, payload: &[u8]) -> Result<(), FramingError>
where
    W: Write + ?Sized,
{
    let buffer = encode_frame(kind, payload)?;
    writer.write_all(&buffer)?;
    writer.flush()?;
    Ok(())
}

/// Reads until `buffer` is full or the stream ends, retrying on interrupts.
/// Returns the number of bytes read.
fn fill<R>(reader: &mut R, buffer: &mut [u8]) -> Result<usize, FramingError>
where
    R: Read + ?Sized,
{
    let mut filled = 0;
    while let Some(remaining) = buffer.get_mut(filled..)
        && !remaining.is_empty()
    {
        match reader.read(remaining) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(FramingError::Io(error)),
        }
    }
    Ok(filled)
}
