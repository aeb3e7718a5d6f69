//! Wire protocol shared by the Kindling daemon and its clients.
//!
//! Every exchange on a Kindling connection is a *frame*: a 4-byte big-endian
//! payload length, a 1-byte kind tag, then the payload itself.
//!
//! ```text
//! [length:4][kind:1][payload:length]
//! ```
//!
//! A client opens with header frames (`A` arguments, `E` environment entries,
//! `D` working directory) and finishes the header with a single `C` command
//! frame. From then on the client may stream stdin (`0` data, `.` end of
//! input) while the server streams stdout (`1`), stderr (`2`) and finally one
//! exit frame (`X`) carrying a decimal status code.
//!
//! The [`codec`] module reads and writes single frames, [`request`] assembles
//! header frames into a [`Request`], and [`client`] drives a whole invocation
//! from the client side.

pub mod client;
pub mod codec;
pub mod exit;
pub mod frame;
pub mod request;

pub use client::{Client, ClientError, Transcript};
pub use codec::{FramingError, encode_frame, read_frame, write_frame};
pub use exit::{EXIT_EXCEPTION, EXIT_NO_SUCH_COMMAND, encode_exit_code, parse_exit_code};
pub use frame::{Frame, FrameKind, HEADER_LEN, MAX_PAYLOAD_LEN};
pub use request::{HeaderProgress, Request, RequestBuilder, parse_environment};

/// Default TCP port the daemon listens on.
pub const DEFAULT_PORT: u16 = 2113;
