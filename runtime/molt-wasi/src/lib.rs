//! WASI command-mode runner for Molt.
//!
//! Binds a fixed `wasi_snapshot_preview1` catalogue to host adapters, checks
//! that a module follows the command convention (`_start` plus an exported
//! `memory`), runs it under a memory ceiling, and folds the outcome into a
//! single pass/fail result. Parsing and execution are wasmtime's job; syscall
//! semantics belong to a [`SyscallBackend`].

mod abi;
mod backend;
mod config;
mod driver;
mod errno;
mod error;
mod imports;
mod loader;
mod memory;
mod relay;

use std::io::Write;

pub use abi::{START_EXPORT, check_command_abi};
pub use backend::{SyscallBackend, WasiBackend};
pub use config::{CacheMode, DEFAULT_MAX_MEMORY_PAGES, RunConfig, WASM_PAGE_SIZE};
pub use driver::{CommandRunner, ExecutionOutcome, HostState};
pub use errno::Errno;
pub use error::{AbiError, LoadError, RunError};
pub use imports::{
    Adapter, ImportBinding, MEMORY_EXPORT, ValKind, WASI_IMPORTS, WASI_NAMESPACE, find_binding,
    resolve_imports,
};
pub use loader::load_file;

/// Backend for runs on behalf of the host process: its stdio and
/// environment, plus the configured preopens.
fn host_backend(config: &RunConfig) -> Result<WasiBackend, RunError> {
    let mut backend = WasiBackend::new().inherit_env();
    for dir in &config.preopens {
        backend = backend
            .preopen_dir(dir, &dir.to_string_lossy())
            .map_err(|err| RunError::BackendSetup(error::one_line(&err)))?;
    }
    Ok(backend)
}

fn execute_on_host(wasm_binary: &[u8], args: &[String]) -> Result<ExecutionOutcome, RunError> {
    let config = RunConfig::from_env();
    let backend = host_backend(&config)?;
    CommandRunner::new(config)?.execute(wasm_binary, args, backend)
}

fn load_and_execute_on_host(args: &[String]) -> Result<ExecutionOutcome, RunError> {
    let path = args.first().ok_or(RunError::NoModulePath)?;
    let wasm_binary = load_file(path)?;
    execute_on_host(&wasm_binary, args)
}

/// Runs `wasm_binary` with the process stdio and environment and the
/// configuration from `MOLT_WASI_*` variables.
pub fn run(wasm_binary: &[u8], args: &[String], err: &mut dyn Write) -> bool {
    driver::settle(execute_on_host(wasm_binary, args), err)
        .is_some_and(|outcome| outcome.is_success())
}

/// Loads the module named by `args[0]` and runs it with `args` as its argv.
/// Fatal failures and traps are reported on `err`; the outcome is returned
/// whenever `_start` was reached.
pub fn load_and_execute(args: &[String], err: &mut dyn Write) -> Option<ExecutionOutcome> {
    driver::settle(load_and_execute_on_host(args), err)
}

/// [`load_and_execute`] folded into a single pass/fail result.
pub fn load_and_run(args: &[String], err: &mut dyn Write) -> bool {
    load_and_execute(args, err).is_some_and(|outcome| outcome.is_success())
}
