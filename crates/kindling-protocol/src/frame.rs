//! Frame kinds and the in-memory frame representation.

use std::fmt;

use crate::codec::FramingError;

/// Size of the fixed frame header: four length bytes plus one kind tag.
pub const HEADER_LEN: usize = 5;

/// Largest payload the decoder accepts before reading it into memory.
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

/// The kind tag carried in byte five of every frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// `A`: one command-line argument.
    Argument,
    /// `E`: one `KEY=VALUE` environment entry.
    Environment,
    /// `C`: the command name; ends the header phase.
    Command,
    /// `D`: the client's working directory.
    WorkingDirectory,
    /// `0`: a chunk of stdin data.
    StdinData,
    /// `.`: end of stdin (always zero length).
    StdinEof,
    /// `1`: a chunk of stdout data.
    Stdout,
    /// `2`: a chunk of stderr data.
    Stderr,
    /// `X`: the exit status as decimal text.
    Exit,
}

impl FrameKind {
    /// Every kind, in tag order of the protocol table.
    pub const ALL: [Self; 9] = [
        Self::Argument,
        Self::Environment,
        Self::Command,
        Self::WorkingDirectory,
        Self::StdinData,
        Self::StdinEof,
        Self::Stdout,
        Self::Stderr,
        Self::Exit,
    ];

    /// Returns the wire tag for this kind.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Argument => b'A',
            Self::Environment => b'E',
            Self::Command => b'C',
            Self::WorkingDirectory => b'D',
            Self::StdinData => b'0',
            Self::StdinEof => b'.',
            Self::Stdout => b'1',
            Self::Stderr => b'2',
            Self::Exit => b'X',
        }
    }

    /// Looks up the kind for a wire tag.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'A' => Some(Self::Argument),
            b'E' => Some(Self::Environment),
            b'C' => Some(Self::Command),
            b'D' => Some(Self::WorkingDirectory),
            b'0' => Some(Self::StdinData),
            b'.' => Some(Self::StdinEof),
            b'1' => Some(Self::Stdout),
            b'2' => Some(Self::Stderr),
            b'X' => Some(Self::Exit),
            _ => None,
        }
    }

    /// Whether the payload of this kind is text rather than raw bytes.
    #[must_use]
    pub const fn is_text(self) -> bool {
        matches!(
            self,
            Self::Argument | Self::Environment | Self::Command | Self::WorkingDirectory | Self::Exit
        )
    }

    /// Whether this kind may appear before the command frame.
    #[must_use]
    pub const fn is_header(self) -> bool {
        matches!(
            self,
            Self::Argument | Self::Environment | Self::Command | Self::WorkingDirectory
        )
    }

    /// Returns a stable lowercase name for logging.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Argument => "argument",
            Self::Environment => "environment",
            Self::Command => "command",
            Self::WorkingDirectory => "working_directory",
            Self::StdinData => "stdin",
            Self::StdinEof => "stdin_eof",
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::Exit => "exit",
        }
    }
}

impl TryFrom<u8> for FrameKind {
    type Error = FramingError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        Self::from_tag(tag).ok_or(FramingError::UnknownKind { tag })
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    kind: FrameKind,
    payload: Vec<u8>,
}

impl Frame {
    /// Builds a frame from a kind and payload.
    #[must_use]
    pub fn new(kind: FrameKind, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Builds a frame with an empty payload.
    #[must_use]
    pub const fn empty(kind: FrameKind) -> Self {
        Self {
            kind,
            payload: Vec::new(),
        }
    }

    /// The frame kind.
    #[must_use]
    pub const fn kind(&self) -> FrameKind {
        self.kind
    }

    /// The raw payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consumes the frame and returns its payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Interprets the payload as text.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::InvalidText`] when the payload is not valid
    /// UTF-8 (ASCII being the common case).
    pub fn text(&self) -> Result<&str, FramingError> {
        std::str::from_utf8(&self.payload).map_err(|source| FramingError::InvalidText {
            kind: self.kind,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn tags_round_trip_for_every_kind() {
        for kind in FrameKind::ALL {
            assert_eq!(FrameKind::from_tag(kind.tag()), Some(kind));
        }
    }

    #[rstest]
    #[case(b'Z')]
    #[case(b'a')]
    #[case(0)]
    fn unknown_tags_are_rejected(#[case] tag: u8) {
        let error = FrameKind::try_from(tag).expect_err("tag should be unknown");
        assert!(matches!(error, FramingError::UnknownKind { tag: t } if t == tag));
    }

    #[test]
    fn only_header_kinds_precede_the_command() {
        let header: Vec<_> = FrameKind::ALL
            .into_iter()
            .filter(|kind| kind.is_header())
            .collect();
        assert_eq!(
            header,
            [
                FrameKind::Argument,
                FrameKind::Environment,
                FrameKind::Command,
                FrameKind::WorkingDirectory
            ]
        );
    }

    #[test]
    fn text_rejects_invalid_utf8() {
        let frame = Frame::new(FrameKind::Argument, vec![0xff, 0xfe]);
        assert!(matches!(
            frame.text(),
            Err(FramingError::InvalidText {
                kind: FrameKind::Argument,
                ..
            })
        ));
    }
}
