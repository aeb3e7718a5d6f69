//! Command-line argument definitions for the Kindling client.

use clap::Parser;
use kindling_protocol::DEFAULT_PORT;

/// Runs a command on a Kindling server.
#[derive(Parser, Debug)]
#[command(name = "kindling", version)]
pub(crate) struct Cli {
    /// Server host name or address.
    #[arg(long, env = "KINDLING_SERVER", default_value = "127.0.0.1")]
    pub(crate) server: String,
    /// Server port.
    #[arg(long, env = "KINDLING_PORT", default_value_t = DEFAULT_PORT)]
    pub(crate) port: u16,
    /// Alias or entry-point identity to run, then its arguments. Everything
    /// after the command is passed through, options included.
    #[arg(
        value_name = "COMMAND",
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub(crate) argv: Vec<String>,
}
