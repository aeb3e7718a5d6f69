//! Exit frame payloads and reserved status codes.

use crate::codec::FramingError;

/// Sent when the invoked entry point fails inside the server.
pub const EXIT_EXCEPTION: i32 = 899;

/// Sent when the command resolves to no entry point.
pub const EXIT_NO_SUCH_COMMAND: i32 = 898;

/// Encodes an exit status as the decimal text carried by an `X` frame.
#[must_use]
pub fn encode_exit_code(code: i32) -> Vec<u8> {
    code.to_string().into_bytes()
}

/// Parses the payload of an `X` frame.
///
/// Surrounding whitespace is ignored so that payloads terminated by a newline
/// are accepted.
///
/// # Errors
///
/// Returns [`FramingError::InvalidExitCode`] when the payload is not a decimal
/// integer.
pub fn parse_exit_code(payload: &[u8]) -> Result<i32, FramingError> {
    let invalid = || FramingError::InvalidExitCode {
        payload: String::from_utf8_lossy(payload).into_owned(),
    };
    let text = std::str::from_utf8(payload).map_err(|_| invalid())?;
    text.trim().parse::<i32>().map_err(|_| invalid())
}
