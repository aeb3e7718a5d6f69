//! Command-line client for Kindling servers.
//!
//! The client sends its arguments, environment and working directory to the
//! server, relays stdin while the entry point runs, copies the server's
//! stdout and stderr frames to its own streams and exits with the status the
//! server reports. Invoked through a link under another name, that name is
//! the command and every argument is passed through untouched.

mod cli;
mod errors;

use std::env;
use std::ffi::{OsStr, OsString};
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use clap::error::ErrorKind;
use kindling_protocol::{Client, Request};

use crate::cli::Cli;
use crate::errors::AppError;

const PROGRAM_NAME: &str = "kindling";

/// A parsed command line: where to connect and what to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    server: String,
    port: u16,
    command: String,
    arguments: Vec<String>,
}

impl Invocation {
    /// Parses `args`, with the program name first.
    ///
    /// When the program name is not `kindling` it becomes the command and
    /// the remaining arguments are not interpreted as options.
    ///
    /// # Errors
    ///
    /// Returns the clap error for an invalid command line.
    pub fn parse(args: &[OsString]) -> Result<Self, clap::Error> {
        let cli = match linked_command(args) {
            Some(command) => {
                let mut rewritten = Vec::with_capacity(args.len() + 2);
                rewritten.push(OsString::from(PROGRAM_NAME));
                rewritten.push(OsString::from("--"));
                rewritten.push(command);
                rewritten.extend(args.iter().skip(1).cloned());
                Cli::try_parse_from(rewritten)?
            }
            None => Cli::try_parse_from(args)?,
        };
        let Cli { server, port, argv } = cli;
        let mut argv = argv.into_iter();
        let command = argv.next().ok_or_else(|| {
            Cli::command().error(ErrorKind::MissingRequiredArgument, "a command is required")
        })?;
        Ok(Self {
            server,
            port,
            command,
            arguments: argv.collect(),
        })
    }

    /// Server host.
    #[must_use]
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Server port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Command sent to the server.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Arguments sent to the server.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    /// Builds the request carrying `environment` and `cwd`. Variables whose
    /// names cannot be framed are skipped.
    #[must_use]
    pub fn request<I>(&self, environment: I, cwd: &Path) -> Request
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        environment
            .into_iter()
            .map(|(key, value)| {
                (
                    key.to_string_lossy().into_owned(),
                    value.to_string_lossy().into_owned(),
                )
            })
            .filter(|(key, _)| !key.is_empty() && !key.contains('='))
            .fold(
                Request::new(self.command.as_str())
                    .with_args(self.arguments.iter().cloned())
                    .with_cwd(cwd.to_string_lossy()),
                |request, (key, value)| request.with_env(key, value),
            )
    }
}

fn linked_command(args: &[OsString]) -> Option<OsString> {
    let stem = Path::new(args.first()?).file_stem()?;
    (stem != OsStr::new(PROGRAM_NAME)).then(|| stem.to_os_string())
}

/// Runs the client and maps the outcome to a process exit status.
///
/// Server statuses are reported modulo 256, as the platform truncates them.
pub fn run<I, W, E>(args: I, stdout: &mut W, stderr: &mut E) -> ExitCode
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let args: Vec<OsString> = args.into_iter().collect();
    let code = match execute(&args, io::stdin(), stdout, stderr) {
        Ok(code) => code,
        Err(AppError::CliUsage(error)) => report_usage(&error, stdout, stderr),
        Err(error) => {
            drop(writeln!(stderr, "{PROGRAM_NAME}: {error}"));
            error.exit_code()
        }
    };
    ExitCode::from(status_byte(code))
}

/// Connects, runs the invocation described by `args` and returns the
/// server's exit status.
fn execute<R, W, E>(args: &[OsString], stdin: R, stdout: &mut W, stderr: &mut E) -> Result<i32, AppError>
where
    R: Read + Send + 'static,
    W: Write,
    E: Write,
{
    let invocation = Invocation::parse(args).map_err(AppError::CliUsage)?;
    let cwd = env::current_dir().map_err(AppError::WorkingDirectory)?;
    let request = invocation.request(env::vars_os(), &cwd);
    let client = Client::connect((invocation.server(), invocation.port()))?;
    Ok(client.invoke(&request, Some(stdin), stdout, stderr)?)
}

fn report_usage<W, E>(error: &clap::Error, stdout: &mut W, stderr: &mut E) -> i32
where
    W: Write,
    E: Write,
{
    let rendered = error.render();
    let written = match error.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => write!(stdout, "{rendered}"),
        _ => write!(stderr, "{rendered}"),
    };
    drop(written);
    error.exit_code()
}

fn status_byte(code: i32) -> u8 {
    u8::try_from(code.rem_euclid(256)).unwrap_or(u8::MAX)
}
