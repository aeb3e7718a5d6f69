//! Request assembly from header frames, and the reverse encoding.
//!
//! The header phase is a sequence of `A`, `E` and `D` frames in any order,
//! closed by exactly one `C` frame. Arguments keep their order (duplicates
//! included); environment entries are last-write-wins per key; a repeated
//! working directory replaces the earlier one.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::SocketAddr;

use crate::codec::{FramingError, read_frame, write_frame};
use crate::frame::{Frame, FrameKind};

const HEADER_PHASE: &str = "awaiting the request header";

/// A complete request, immutable once the command frame has arrived.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Request {
    command: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    cwd: String,
    peer: Option<SocketAddr>,
}

impl Request {
    /// Starts a client-side request for `command`.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Appends arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets one environment entry, replacing any earlier value.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = cwd.into();
        self
    }

    /// The command name.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Arguments in the order they were sent.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Environment entries.
    #[must_use]
    pub const fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// The client's working directory (empty when none was sent).
    #[must_use]
    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    /// The client's socket address, when the request came from a socket.
    #[must_use]
    pub const fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Reads header frames until the command frame completes the request.
    ///
    /// # Errors
    ///
    /// Returns any [`FramingError`] raised by the codec, by an invalid header
    /// payload, or by a non-header frame arriving first.
    pub fn read_from<R>(reader: &mut R, peer: Option<SocketAddr>) -> Result<Self, FramingError>
    where
        R: Read + ?Sized,
    {
        let mut builder = RequestBuilder::new(peer);
        loop {
            let frame = read_frame(reader)?;
            if let HeaderProgress::Complete(request) = builder.accept(frame)? {
                return Ok(request);
            }
        }
    }

    /// Writes the header frames: arguments, environment, working directory,
    /// then the command.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::InvalidEnvironment`] for keys that cannot be
    /// represented on the wire, and [`FramingError::Io`] when writing fails.
    pub fn write_to<W>(&self, writer: &mut W) -> Result<(), FramingError>
    where
        W: Write + ?Sized,
    {
        for arg in &self.args {
            write_frame(writer, FrameKind::Argument, arg.as_bytes())?;
        }
        for (key, value) in &self.env {
            if key.is_empty() || key.contains('=') {
                return Err(FramingError::invalid_environment(
                    format!("{key}={value}"),
                    "key must be non-empty and must not contain '='",
                ));
            }
            let entry = format!("{key}={value}");
            write_frame(writer, FrameKind::Environment, entry.as_bytes())?;
        }
        write_frame(writer, FrameKind::WorkingDirectory, self.cwd.as_bytes())?;
        write_frame(writer, FrameKind::Command, self.command.as_bytes())
    }
}

/// Outcome of feeding one frame to a [`RequestBuilder`].
#[derive(Debug)]
pub enum HeaderProgress {
    /// More header frames are expected.
    Pending,
    /// The command frame arrived; the request is complete.
    Complete(Request),
}

/// Accumulates header frames into a [`Request`].
#[derive(Debug, Default)]
pub struct RequestBuilder {
    args: Vec<String>,
    env: BTreeMap<String, String>,
    cwd: String,
    peer: Option<SocketAddr>,
}

impl RequestBuilder {
    /// Creates an empty builder for a request from `peer`.
    #[must_use]
    pub fn new(peer: Option<SocketAddr>) -> Self {
        Self {
            peer,
            ..Self::default()
        }
    }

    /// Applies one header frame.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::UnexpectedFrame`] for non-header frames,
    /// [`FramingError::InvalidText`] for payloads that are not text and
    /// [`FramingError::InvalidEnvironment`] for malformed environment entries.
    pub fn accept(&mut self, frame: Frame) -> Result<HeaderProgress, FramingError> {
        match frame.kind() {
            FrameKind::Argument => {
                self.args.push(frame.text()?.to_owned());
            }
            FrameKind::Environment => {
                let (key, value) = parse_environment(frame.text()?)?;
                self.env.insert(key.to_owned(), value.to_owned());
            }
            FrameKind::WorkingDirectory => {
                frame.text()?.clone_into(&mut self.cwd);
            }
            FrameKind::Command => {
                let command = frame.text()?.to_owned();
                return Ok(HeaderProgress::Complete(Request {
                    command,
                    args: std::mem::take(&mut self.args),
                    env: std::mem::take(&mut self.env),
                    cwd: std::mem::take(&mut self.cwd),
                    peer: self.peer,
                }));
            }
            other => return Err(FramingError::unexpected(other, HEADER_PHASE)),
        }
        Ok(HeaderProgress::Pending)
    }
}

/// Splits an environment entry on its first `=`.
///
/// # Errors
///
/// Returns [`FramingError::InvalidEnvironment`] when the entry has no `=` or
/// an empty key.
pub fn parse_environment(entry: &str) -> Result<(&str, &str), FramingError> {
    let Some((key, value)) = entry.split_once('=') else {
        return Err(FramingError::invalid_environment(entry, "missing '=' delimiter"));
    };
    if key.is_empty() {
        return Err(FramingError::invalid_environment(entry, "empty key"));
    }
    Ok((key, value))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn text(kind: FrameKind, payload: &str) -> Frame {
        Frame::new(kind, payload)
    }

    fn feed(frames: Vec<Frame>) -> Result<Request, FramingError> {
        let mut builder = RequestBuilder::new(None);
        for frame in frames {
            if let HeaderProgress::Complete(request) = builder.accept(frame)? {
                return Ok(request);
            }
        }
        panic!("header never completed");
    }

    #[test]
    fn environment_entry_is_split_on_first_equals() {
        assert_eq!(parse_environment("FOO=bar").expect("parse"), ("FOO", "bar"));
        assert_eq!(
            parse_environment("OPTS=a=b").expect("parse"),
            ("OPTS", "a=b")
        );
        assert_eq!(parse_environment("EMPTY=").expect("parse"), ("EMPTY", ""));
    }

    #[rstest]
    #[case("NOEQUALS")]
    #[case("=value")]
    #[case("")]
    fn malformed_environment_entries_are_rejected(#[case] entry: &str) {
        assert!(matches!(
            parse_environment(entry),
            Err(FramingError::InvalidEnvironment { .. })
        ));
    }

    #[test]
    fn arguments_keep_order_and_duplicates() {
        let request = feed(vec![
            text(FrameKind::Argument, "b"),
            text(FrameKind::Argument, "a"),
            text(FrameKind::Argument, "b"),
            text(FrameKind::Command, "echo"),
        ])
        .expect("request");
        assert_eq!(request.args(), ["b", "a", "b"]);
        assert_eq!(request.command(), "echo");
    }

    #[test]
    fn environment_is_last_write_wins() {
        let request = feed(vec![
            text(FrameKind::Environment, "FOO=first"),
            text(FrameKind::Environment, "BAR=kept"),
            text(FrameKind::Environment, "FOO=second"),
            text(FrameKind::Command, "env"),
        ])
        .expect("request");
        assert_eq!(request.env().get("FOO").map(String::as_str), Some("second"));
        assert_eq!(request.env().get("BAR").map(String::as_str), Some("kept"));
    }

    #[test]
    fn environment_without_delimiter_aborts_the_header() {
        let error = feed(vec![
            text(FrameKind::Environment, "BROKEN"),
            text(FrameKind::Command, "env"),
        ])
        .expect_err("must fail");
        assert!(matches!(error, FramingError::InvalidEnvironment { .. }));
    }

    #[rstest]
    #[case(FrameKind::StdinData)]
    #[case(FrameKind::StdinEof)]
    #[case(FrameKind::Stdout)]
    #[case(FrameKind::Exit)]
    fn stream_frames_are_rejected_before_the_command(#[case] kind: FrameKind) {
        let mut builder = RequestBuilder::new(None);
        let error = builder
            .accept(Frame::empty(kind))
            .expect_err("must reject");
        assert!(matches!(error, FramingError::UnexpectedFrame { kind: k, .. } if k == kind));
    }

    #[test]
    fn later_working_directory_replaces_earlier() {
        let request = feed(vec![
            text(FrameKind::WorkingDirectory, "/tmp"),
            text(FrameKind::WorkingDirectory, "/home"),
            text(FrameKind::Command, "pwd"),
        ])
        .expect("request");
        assert_eq!(request.cwd(), "/home");
    }

    #[test]
    fn write_to_rejects_unrepresentable_keys() {
        let request = Request::new("env").with_env("A=B", "c");
        let mut sink = Vec::new();
        assert!(matches!(
            request.write_to(&mut sink),
            Err(FramingError::InvalidEnvironment { .. })
        ));
    }
}
