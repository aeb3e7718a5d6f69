//! Per-worker standard stream redirection.
//!
//! While a session runs, its worker thread has the session's stdin, stdout,
//! stderr and exit sink bound in a thread-local slot. Entry points that only
//! receive their arguments write through [`stdout`] and [`stderr`] and read
//! through [`stdin`]; on a thread with nothing bound the handles fall through
//! to the process's own streams.
//!
//! Binding returns a [`StdioGuard`]. Dropping the guard resets the slot to
//! neutral, including when the session unwinds. Threads started through
//! [`spawn`] carry the spawning thread's binding with them.

use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::thread::{self, JoinHandle};

use crate::session::{ExitSink, InputHandle, StreamWriter};

/// Streams bound to one worker for the duration of a session.
#[derive(Debug, Clone)]
pub(crate) struct BoundStdio {
    pub(crate) stdin: InputHandle,
    pub(crate) stdout: StreamWriter,
    pub(crate) stderr: StreamWriter,
    pub(crate) exit: ExitSink,
}

thread_local! {
    static BOUND: RefCell<Option<BoundStdio>> = const { RefCell::new(None) };
}

/// Restores neutral redirection when dropped.
#[derive(Debug)]
#[must_use = "redirection is reset as soon as the guard is dropped"]
pub(crate) struct StdioGuard {
    _private: (),
}

impl Drop for StdioGuard {
    fn drop(&mut self) {
        BOUND.with(|slot| slot.borrow_mut().take());
    }
}

/// Binds `streams` to the current thread until the guard drops.
pub(crate) fn bind(streams: BoundStdio) -> StdioGuard {
    BOUND.with(|slot| *slot.borrow_mut() = Some(streams));
    StdioGuard { _private: () }
}

/// Whether the current thread is running a session.
#[must_use]
pub fn is_bound() -> bool {
    BOUND.with(|slot| slot.borrow().is_some())
}

pub(crate) fn exit_sink() -> Option<ExitSink> {
    BOUND.with(|slot| slot.borrow().as_ref().map(|bound| bound.exit.clone()))
}

/// Spawns a thread that shares the calling thread's session streams.
///
/// Writes from the new thread reach the same client and an
/// [`exit`](crate::exit_trap::exit) there ends the same session. From a
/// thread with nothing bound this is an ordinary spawn.
///
/// # Errors
///
/// Returns the operating system's error when the thread cannot be created.
pub fn spawn<F, T>(body: F) -> io::Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let inherited = BOUND.with(|slot| slot.borrow().clone());
    thread::Builder::new().spawn(move || {
        let _guard = inherited.map(bind);
        body()
    })
}

fn with_bound<T>(select: impl FnOnce(&BoundStdio) -> T) -> Option<T> {
    BOUND.with(|slot| slot.borrow().as_ref().map(select))
}

/// Handle to the current session's stdout, or the process's stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stdout;

/// Handle to the current session's stderr, or the process's stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stderr;

/// Handle to the current session's stdin, or the process's stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stdin;

/// Returns a stdout handle for the current thread.
#[must_use]
pub const fn stdout() -> Stdout {
    Stdout
}

/// Returns a stderr handle for the current thread.
#[must_use]
pub const fn stderr() -> Stderr {
    Stderr
}

/// Returns a stdin handle for the current thread.
#[must_use]
pub const fn stdin() -> Stdin {
    Stdin
}

impl Write for Stdout {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match with_bound(|bound| bound.stdout.clone()) {
            Some(mut writer) => writer.write(buf),
            None => io::stdout().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match with_bound(|bound| bound.stdout.clone()) {
            Some(mut writer) => writer.flush(),
            None => io::stdout().flush(),
        }
    }
}

impl Write for Stderr {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match with_bound(|bound| bound.stderr.clone()) {
            Some(mut writer) => writer.write(buf),
            None => io::stderr().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match with_bound(|bound| bound.stderr.clone()) {
            Some(mut writer) => writer.flush(),
            None => io::stderr().flush(),
        }
    }
}

impl Read for Stdin {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match with_bound(|bound| bound.stdin.clone()) {
            Some(mut reader) => reader.read(buf),
            None => io::stdin().read(buf),
        }
    }
}
