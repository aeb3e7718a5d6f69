//! Turns an entry point's request to terminate into the end of its session.
//!
//! [`exit`] is the daemon's replacement for [`std::process::exit`]. Inside a
//! session it writes the exit frame through the worker's bound sink and then
//! unwinds with an [`ExitSignal`] payload. The payload is not an error value,
//! so `?` and `Result` handling inside the entry point cannot swallow it; the
//! dispatcher catches the unwind, recognises the payload and completes the
//! session normally.
//!
//! Once a server has called [`install`], an `exit` on a thread with no
//! session bound unwinds that thread instead of terminating the process.
//! Helper threads started with [`stdio::spawn`] inherit their session, so
//! their `exit` ends the session like the worker's own would.

use std::any::Any;
use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::session::SESSION_TARGET;
use crate::stdio;

/// Unwind payload raised by [`exit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitSignal {
    code: i32,
    worker: Option<usize>,
}

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Arms the trap for the rest of the process's life. Called when a server
/// starts.
pub(crate) fn install() {
    INSTALLED.store(true, Ordering::SeqCst);
}

/// Whether a server in this process has armed the trap.
#[must_use]
pub fn is_installed() -> bool {
    INSTALLED.load(Ordering::SeqCst)
}

impl ExitSignal {
    /// Requested exit status.
    #[must_use]
    pub const fn code(&self) -> i32 {
        self.code
    }

    /// Index of the worker whose session requested the exit, or `None` when
    /// the exit came from a thread outside any session.
    #[must_use]
    pub const fn worker(&self) -> Option<usize> {
        self.worker
    }

    /// Recovers the signal from a caught unwind payload. Returns the payload
    /// unchanged when it is anything else.
    pub(crate) fn from_payload(
        payload: Box<dyn Any + Send>,
    ) -> Result<Self, Box<dyn Any + Send>> {
        payload.downcast::<Self>().map(|signal| *signal)
    }
}

/// Ends the current session with `code`.
///
/// With no session bound, the calling thread unwinds when the trap is
/// installed and the process exits otherwise.
pub fn exit(code: i32) -> ! {
    let Some(sink) = stdio::exit_sink() else {
        if !is_installed() {
            std::process::exit(code);
        }
        let current = std::thread::current();
        warn!(
            target: SESSION_TARGET,
            code,
            thread = current.name().unwrap_or("<unnamed>"),
            "exit requested outside a session; unwinding the calling thread"
        );
        panic::resume_unwind(Box::new(ExitSignal { code, worker: None }))
    };
    match sink.report(code) {
        Ok(true) => {}
        Ok(false) => debug!(
            target: SESSION_TARGET,
            code,
            "exit status already reported; keeping the first"
        ),
        Err(error) => debug!(
            target: SESSION_TARGET,
            code,
            %error,
            "failed to write exit frame"
        ),
    }
    panic::resume_unwind(Box::new(ExitSignal {
        code,
        worker: Some(sink.worker()),
    }))
}
