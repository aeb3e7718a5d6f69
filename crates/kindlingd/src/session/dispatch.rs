//! Invokes a resolved entry point with the session's streams bound.

use std::any::Any;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use kindling_protocol::{EXIT_EXCEPTION, Request};
use tracing::{debug, warn};

use super::{ExitSink, InputHandle, SESSION_TARGET, SessionOutput, StreamWriter};
use crate::entry::{EntryPoint, EntryPointError, SessionContext};
use crate::exit_trap::ExitSignal;
use crate::pool::WorkerSlot;
use crate::server::ServerHandle;
use crate::stdio::{self, BoundStdio};

/// Everything an invocation needs besides the entry point itself.
pub(crate) struct Invocation<'a> {
    pub(crate) request: &'a Request,
    pub(crate) output: &'a Arc<SessionOutput>,
    pub(crate) stdin: InputHandle,
    pub(crate) server: &'a ServerHandle,
    pub(crate) worker: &'a WorkerSlot,
}

enum Failure {
    Error(EntryPointError),
    Panic(String),
    NotInvocable,
}

/// Runs `entry` and returns the status the session should report.
///
/// The exit trap's unwind is a normal completion carrying the requested
/// status. Errors and panics are contained here and become
/// [`EXIT_EXCEPTION`] after their message is written to the client's
/// stderr.
pub(crate) fn invoke(entry: &dyn EntryPoint, invocation: Invocation<'_>) -> i32 {
    let Invocation {
        request,
        output,
        stdin,
        server,
        worker,
    } = invocation;
    let identity = entry.identity();
    let stdout = StreamWriter::stdout(output);
    let mut stderr = StreamWriter::stderr(output);

    let guard = stdio::bind(BoundStdio {
        stdin: stdin.clone(),
        stdout: stdout.clone(),
        stderr: stderr.clone(),
        exit: ExitSink::new(output, worker.index()),
    });
    server.entry_point_started(identity);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        if let Some(invocable) = entry.as_context() {
            let mut context = SessionContext::new(
                request,
                stdin,
                stdout,
                stderr.clone(),
                server,
                worker,
            );
            invocable.run(&mut context).map_err(Failure::Error)
        } else if let Some(invocable) = entry.as_argv() {
            invocable.main(request.args()).map_err(Failure::Error)
        } else {
            Err(Failure::NotInvocable)
        }
    }));
    server.entry_point_finished(identity);
    drop(guard);

    let failure = match outcome {
        Ok(Ok(())) => return 0,
        Ok(Err(failure)) => failure,
        Err(payload) => match ExitSignal::from_payload(payload) {
            Ok(signal) => {
                debug!(
                    target: SESSION_TARGET,
                    identity,
                    code = signal.code(),
                    "entry point requested exit"
                );
                return signal.code();
            }
            Err(payload) => Failure::Panic(panic_message(payload.as_ref())),
        },
    };

    let message = match failure {
        Failure::Error(error) => error.to_string(),
        Failure::Panic(message) => format!("panicked: {message}"),
        Failure::NotInvocable => format!("entry point '{identity}' has no invocation shape"),
    };
    warn!(
        target: SESSION_TARGET,
        identity,
        error = %message,
        "entry point failed"
    );
    if let Err(error) = writeln!(stderr, "error: {message}") {
        debug!(target: SESSION_TARGET, %error, "failed to report failure to client");
    }
    EXIT_EXCEPTION
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_owned())
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};

    use kindling_protocol::{EXIT_EXCEPTION, Frame, FrameKind, read_frame};

    use super::*;
    use crate::entry::{ArgvFn, ArgvInvocable, ContextFn, ContextInvocable, Registry};
    use crate::exit_trap;
    use crate::health::StructuredHealthReporter;
    use crate::session::SessionInput;
    use crate::session::output::test_support::SharedBuffer;

    struct Harness {
        buffer: SharedBuffer,
        output: Arc<SessionOutput>,
        server: ServerHandle,
        worker: WorkerSlot,
    }

    impl Harness {
        fn new() -> Self {
            let buffer = SharedBuffer::default();
            let output = Arc::new(SessionOutput::new(buffer.clone()));
            let server = ServerHandle::new(
                Arc::new(Registry::new(true)),
                Arc::new(StructuredHealthReporter::new()),
            );
            Self {
                buffer,
                output,
                server,
                worker: WorkerSlot::new(0),
            }
        }

        fn run(&self, entry: &dyn EntryPoint, request: &Request, stdin: &[u8]) -> i32 {
            let mut wire = Vec::new();
            if !stdin.is_empty() {
                wire.extend(
                    kindling_protocol::encode_frame(FrameKind::StdinData, stdin).expect("data"),
                );
            }
            wire.extend(kindling_protocol::encode_frame(FrameKind::StdinEof, b"").expect("eof"));
            invoke(
                entry,
                Invocation {
                    request,
                    output: &self.output,
                    stdin: InputHandle::new(SessionInput::new(Cursor::new(wire))),
                    server: &self.server,
                    worker: &self.worker,
                },
            )
        }

        fn frames(&self) -> Vec<Frame> {
            let mut cursor = Cursor::new(self.buffer.contents());
            let mut frames = Vec::new();
            while let Ok(frame) = read_frame(&mut cursor) {
                frames.push(frame);
            }
            frames
        }
    }

    #[test]
    fn argv_entry_points_write_through_stdio() {
        let harness = Harness::new();
        let entry = ArgvFn::new("demo.Echo", |args: &[String]| {
            write!(stdio::stdout(), "{}", args.join(","))?;
            Ok(())
        });
        let code = harness.run(&entry, &Request::new("echo").with_args(["a", "b"]), b"");
        assert_eq!(code, 0);
        assert_eq!(harness.frames(), [Frame::new(FrameKind::Stdout, "a,b")]);
        assert!(!stdio::is_bound());
    }

    #[test]
    fn context_entry_points_read_stdin() {
        let harness = Harness::new();
        let entry = ContextFn::new("demo.Upper", |context: &mut SessionContext<'_>| {
            let mut text = String::new();
            context.stdin().read_to_string(&mut text)?;
            context.stdout().write_all(text.to_uppercase().as_bytes())?;
            Ok(())
        });
        let code = harness.run(&entry, &Request::new("upper"), b"quiet");
        assert_eq!(code, 0);
        assert_eq!(harness.frames(), [Frame::new(FrameKind::Stdout, "QUIET")]);
    }

    #[test]
    fn errors_map_to_the_exception_status() {
        let harness = Harness::new();
        let entry = ArgvFn::new("demo.Fail", |_args: &[String]| {
            Err(EntryPointError::failed("nope"))
        });
        assert_eq!(harness.run(&entry, &Request::new("fail"), b""), EXIT_EXCEPTION);
        assert_eq!(
            harness.frames(),
            [Frame::new(FrameKind::Stderr, "error: nope\n")]
        );
    }

    #[test]
    fn entry_points_without_a_shape_fail() {
        struct Shapeless;
        impl EntryPoint for Shapeless {
            fn identity(&self) -> &str {
                "demo.Shapeless"
            }
        }
        let harness = Harness::new();
        assert_eq!(
            harness.run(&Shapeless, &Request::new("shapeless"), b""),
            EXIT_EXCEPTION
        );
    }

    #[test]
    fn context_shape_wins_when_both_are_offered() {
        struct BothShapes;
        impl ContextInvocable for BothShapes {
            fn run(&self, context: &mut SessionContext<'_>) -> Result<(), EntryPointError> {
                writeln!(context.stdout(), "context")?;
                Ok(())
            }
        }
        impl ArgvInvocable for BothShapes {
            fn main(&self, _args: &[String]) -> Result<(), EntryPointError> {
                writeln!(stdio::stdout(), "argv")?;
                Ok(())
            }
        }
        impl EntryPoint for BothShapes {
            fn identity(&self) -> &str {
                "demo.BothShapes"
            }
            fn as_context(&self) -> Option<&dyn ContextInvocable> {
                Some(self)
            }
            fn as_argv(&self) -> Option<&dyn ArgvInvocable> {
                Some(self)
            }
        }
        let harness = Harness::new();
        assert_eq!(harness.run(&BothShapes, &Request::new("both"), b""), 0);
        assert_eq!(harness.frames(), [Frame::new(FrameKind::Stdout, "context\n")]);
    }

    #[test]
    fn panics_map_to_the_exception_status() {
        let harness = Harness::new();
        let entry = ArgvFn::new("demo.Panic", |_args: &[String]| -> Result<(), EntryPointError> {
            panic!("kaboom")
        });
        assert_eq!(harness.run(&entry, &Request::new("panic"), b""), EXIT_EXCEPTION);
        assert_eq!(
            harness.frames(),
            [Frame::new(FrameKind::Stderr, "error: panicked: kaboom\n")]
        );
        assert!(!stdio::is_bound());
    }

    #[test]
    fn trap_exit_returns_the_requested_status_once() {
        let harness = Harness::new();
        let entry = ArgvFn::new("demo.Exit", |_args: &[String]| -> Result<(), EntryPointError> {
            write!(stdio::stdout(), "before")?;
            exit_trap::exit(42)
        });
        let code = harness.run(&entry, &Request::new("exit"), b"");
        assert_eq!(code, 42);
        assert!(harness.output.has_exited());
        assert_eq!(
            harness.frames(),
            [
                Frame::new(FrameKind::Stdout, "before"),
                Frame::new(FrameKind::Exit, "42"),
            ]
        );
    }

    #[test]
    fn lifecycle_counters_are_updated() {
        let harness = Harness::new();
        let entry = ArgvFn::new("demo.Unit", |_args: &[String]| Ok(()));
        harness.run(&entry, &Request::new("unit"), b"");
        harness.run(&entry, &Request::new("unit"), b"");
        let stats = harness.server.stats_snapshot();
        assert_eq!(stats.len(), 1);
        let (identity, counters) = stats.first().expect("counters");
        assert_eq!(identity, "demo.Unit");
        assert_eq!((counters.started, counters.finished), (2, 2));
    }
}
