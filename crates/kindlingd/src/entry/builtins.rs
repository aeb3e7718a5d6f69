//! Entry points every server carries.

use std::io::Write;
use std::sync::Arc;

use kindling_protocol::EXIT_NO_SUCH_COMMAND;

use super::{
    Alias, ArgvFn, ContextFn, EntryPoint, EntryPointError, Registry, RegistryError, SessionContext,
};
use crate::stdio;

/// Lists or adds aliases.
pub const ALIAS_IDENTITY: &str = "kindling.builtins.Alias";
/// Prints the server version.
pub const VERSION_IDENTITY: &str = "kindling.builtins.Version";
/// Prints per-entry-point lifecycle counters.
pub const STATS_IDENTITY: &str = "kindling.builtins.Stats";
/// Stops the server.
pub const STOP_IDENTITY: &str = "kindling.builtins.Stop";
/// Reports an unknown command and exits with the not-found status.
pub const DEFAULT_ENTRY_POINT_IDENTITY: &str = "kindling.builtins.DefaultEntryPoint";

const ALIAS_USAGE: &str = "kindling-alias [NAME IDENTITY [DESCRIPTION...]]";

/// Registers the builtin entry points and their aliases.
///
/// # Errors
///
/// Returns [`RegistryError`] when an identity is already taken.
pub fn register_builtins(registry: &mut Registry) -> Result<(), RegistryError> {
    let entries: [(Arc<dyn EntryPoint>, Option<(&str, &str)>); 5] = [
        (
            Arc::new(ContextFn::new(ALIAS_IDENTITY, alias)),
            Some(("kindling-alias", "lists aliases or adds one")),
        ),
        (
            Arc::new(ArgvFn::new(VERSION_IDENTITY, version)),
            Some(("kindling-version", "prints the server version")),
        ),
        (
            Arc::new(ContextFn::new(STATS_IDENTITY, stats)),
            Some(("kindling-stats", "prints entry-point counters")),
        ),
        (
            Arc::new(ContextFn::new(STOP_IDENTITY, stop)),
            Some(("kindling-stop", "stops the server")),
        ),
        (
            Arc::new(ContextFn::new(DEFAULT_ENTRY_POINT_IDENTITY, no_such_command)),
            None,
        ),
    ];
    for (entry, alias) in entries {
        let identity = entry.identity().to_owned();
        registry.register(entry)?;
        if let Some((name, description)) = alias {
            registry.add_alias(Alias::new(name, identity, description))?;
        }
    }
    Ok(())
}

fn alias(context: &mut SessionContext<'_>) -> Result<(), EntryPointError> {
    match context.args() {
        [] => {
            let aliases = context.server().registry().aliases();
            let width = aliases
                .iter()
                .map(|alias| alias.name().len())
                .max()
                .unwrap_or(0);
            let stdout = context.stdout();
            for alias in aliases {
                writeln!(stdout, "{:<width$}  {}", alias.name(), alias.identity())?;
                if !alias.description().is_empty() {
                    writeln!(stdout, "{:<width$}  {}", "", alias.description())?;
                }
            }
            Ok(())
        }
        [_] => Err(EntryPointError::usage(ALIAS_USAGE)),
        [name, identity, description @ ..] => {
            let alias = Alias::new(name.as_str(), identity.as_str(), description.join(" "));
            context
                .server()
                .registry()
                .add_alias(alias)
                .map_err(|error| EntryPointError::failed(error.to_string()))
        }
    }
}

fn version(_args: &[String]) -> Result<(), EntryPointError> {
    writeln!(
        stdio::stdout(),
        "Kindling server version {}",
        env!("CARGO_PKG_VERSION")
    )?;
    Ok(())
}

fn stats(context: &mut SessionContext<'_>) -> Result<(), EntryPointError> {
    let snapshot = context.server().stats_snapshot();
    let stdout = context.stdout();
    for (identity, counters) in snapshot {
        writeln!(
            stdout,
            "{identity}: {} started, {} finished, {} running",
            counters.started,
            counters.finished,
            counters.running()
        )?;
    }
    Ok(())
}

fn stop(context: &mut SessionContext<'_>) -> Result<(), EntryPointError> {
    writeln!(context.stdout(), "stopping server")?;
    context.server().request_shutdown("kindling-stop");
    Ok(())
}

fn no_such_command(context: &mut SessionContext<'_>) -> Result<(), EntryPointError> {
    let command = context.command().to_owned();
    writeln!(context.stderr(), "kindling: no such command: {command}")?;
    context.exit(EXIT_NO_SUCH_COMMAND)
}
