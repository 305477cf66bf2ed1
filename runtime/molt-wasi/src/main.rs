use std::env;
use std::ffi::OsString;
use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use molt_wasi::ExecutionOutcome;

const USAGE: &str = "usage: molt-wasi <module.wasm> [args...]";

/// Guest argv must be UTF-8; a bad argument is an error, not a panic.
fn utf8_args(args: impl Iterator<Item = OsString>) -> Result<Vec<String>> {
    args.map(|arg| {
        arg.into_string()
            .map_err(|arg| anyhow!("argument is not valid UTF-8: {}", arg.to_string_lossy()))
    })
    .collect()
}

fn main() -> Result<ExitCode> {
    let args = utf8_args(env::args_os().skip(1))?;
    match args.first().map(String::as_str) {
        None => {
            eprintln!("{USAGE}");
            return Ok(ExitCode::FAILURE);
        }
        Some("-h" | "--help") => {
            eprintln!("{USAGE}");
            return Ok(ExitCode::SUCCESS);
        }
        Some(_) => {}
    }

    let mut stderr = io::stderr().lock();
    let outcome = molt_wasi::load_and_execute(&args, &mut stderr);
    io::stdout().flush().context("flush guest stdout")?;
    Ok(ExitCode::from(exit_status(outcome.as_ref())))
}

/// The guest's own `proc_exit` status wins; codes that do not fit a process
/// status are clamped to 255.
fn exit_status(outcome: Option<&ExecutionOutcome>) -> u8 {
    match outcome {
        Some(ExecutionOutcome::Completed) => 0,
        Some(ExecutionOutcome::ExplicitExit(code)) => u8::try_from(*code).unwrap_or(u8::MAX),
        Some(ExecutionOutcome::Trapped(_)) | None => 1,
    }
}
