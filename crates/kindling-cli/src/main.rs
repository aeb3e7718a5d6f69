//! Entry point for the `kindling` client binary.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'static> = io::stdout().lock();
    let mut stderr: StderrLock<'static> = io::stderr().lock();
    kindling_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
