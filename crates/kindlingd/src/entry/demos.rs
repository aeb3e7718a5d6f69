//! Small entry points for trying a server out.

use std::io::{self, Write};
use std::sync::Arc;

use super::{
    Alias, ArgvFn, ContextFn, EntryPoint, EntryPointError, Registry, RegistryError, SessionContext,
};
use crate::{exit_trap, stdio};

/// Registers the demonstration entry points under `kindling.demos.*` with
/// short aliases.
///
/// # Errors
///
/// Returns [`RegistryError`] when an identity is already taken.
pub fn register_demos(registry: &mut Registry) -> Result<(), RegistryError> {
    let entries: [(Arc<dyn EntryPoint>, &str, &str); 5] = [
        (
            Arc::new(ArgvFn::new("kindling.demos.Echo", echo)),
            "echo",
            "prints its arguments",
        ),
        (
            Arc::new(ArgvFn::new("kindling.demos.Exit", exit)),
            "exit",
            "exits with the given status",
        ),
        (
            Arc::new(ContextFn::new("kindling.demos.Cat", cat)),
            "cat",
            "copies stdin to stdout",
        ),
        (
            Arc::new(ContextFn::new("kindling.demos.DumpAll", dump_all)),
            "dumpall",
            "prints the request",
        ),
        (
            Arc::new(ArgvFn::new("kindling.demos.Hello", hello)),
            "hello",
            "greets the world",
        ),
    ];
    for (entry, name, description) in entries {
        let identity = entry.identity().to_owned();
        registry.register(entry)?;
        registry.add_alias(Alias::new(name, identity, description))?;
    }
    Ok(())
}

fn echo(args: &[String]) -> Result<(), EntryPointError> {
    writeln!(stdio::stdout(), "{}", args.join(" "))?;
    Ok(())
}

fn exit(args: &[String]) -> Result<(), EntryPointError> {
    let code = match args.first() {
        Some(raw) => raw
            .parse::<i32>()
            .map_err(|_| EntryPointError::usage("exit [STATUS]"))?,
        None => 0,
    };
    writeln!(stdio::stdout(), "before")?;
    exit_trap::exit(code);
}

fn cat(context: &mut SessionContext<'_>) -> Result<(), EntryPointError> {
    let mut stdin = context.stdin().clone();
    io::copy(&mut stdin, context.stdout())?;
    Ok(())
}

fn dump_all(context: &mut SessionContext<'_>) -> Result<(), EntryPointError> {
    let request = context.request();
    let stdout = context.stdout();
    writeln!(stdout, "command: {}", request.command())?;
    for (index, arg) in request.args().iter().enumerate() {
        writeln!(stdout, "arg[{index}]: {arg}")?;
    }
    writeln!(stdout, "cwd: {}", request.cwd())?;
    if let Some(peer) = request.peer() {
        writeln!(stdout, "peer: {peer}")?;
    }
    for (key, value) in request.env() {
        writeln!(stdout, "env: {key}={value}")?;
    }
    Ok(())
}

fn hello(_args: &[String]) -> Result<(), EntryPointError> {
    writeln!(stdio::stdout(), "Hello, world!")?;
    Ok(())
}
