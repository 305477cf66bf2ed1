//! Runs one WASI command module from bytes to a pass/fail verdict.

use std::io::Write;

use wasmtime::{Engine, Linker, Module, Store, StoreLimits, StoreLimitsBuilder, Trap};
use wasmtime_wasi::I32Exit;

use crate::abi::check_command_abi;
use crate::backend::SyscallBackend;
use crate::config::{RunConfig, debug_log};
use crate::error::{RunError, one_line};
use crate::imports::{WASI_NAMESPACE, add_to_linker, resolve_imports};
use crate::relay::{self, Relay};

/// Store data for a run. The backend's state lives here so host functions
/// reach it through their `Caller` rather than through shared global state.
pub struct HostState<S> {
    pub(crate) syscalls: S,
    limits: StoreLimits,
    pub(crate) relay: Relay,
}

impl<S> HostState<S> {
    /// The state returned by [`SyscallBackend::init`].
    pub fn syscalls(&self) -> &S {
        &self.syscalls
    }

    pub fn syscalls_mut(&mut self) -> &mut S {
        &mut self.syscalls
    }
}

/// How `_start` finished.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed,
    Trapped(String),
    ExplicitExit(u32),
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        match self {
            Self::Completed => true,
            Self::ExplicitExit(code) => *code == 0,
            Self::Trapped(_) => false,
        }
    }

    fn from_call(result: wasmtime::Result<()>) -> Self {
        let Err(err) = result else {
            return Self::Completed;
        };
        if let Some(exit) = err.downcast_ref::<I32Exit>() {
            return Self::ExplicitExit(exit.0 as u32);
        }
        match err.downcast_ref::<Trap>() {
            Some(trap) => Self::Trapped(trap.to_string()),
            None => Self::Trapped(one_line(&err)),
        }
    }
}

/// Owns the engine and configuration shared by consecutive runs. Each run
/// still gets its own store, instance and backend.
pub struct CommandRunner {
    config: RunConfig,
    engine: Engine,
    relay: Module,
}

impl CommandRunner {
    pub fn new(config: RunConfig) -> Result<Self, RunError> {
        let engine = config
            .build_engine()
            .map_err(|err| RunError::Engine(one_line(&err)))?;
        let relay = relay::compile(&engine).map_err(|err| RunError::Engine(one_line(&err)))?;
        Ok(Self {
            config,
            engine,
            relay,
        })
    }

    /// Pulls the backend's syscall functions into `store` for the relay.
    fn link_backend<B: SyscallBackend>(
        &self,
        store: &mut Store<HostState<B::State>>,
    ) -> Result<(), RunError> {
        let mut backend = Linker::new(&self.engine);
        B::add_to_linker(&mut backend).map_err(|err| RunError::Link(one_line(&err)))?;
        let mut functions = Vec::new();
        for binding in relay::relayed() {
            let function = backend
                .get(&mut *store, WASI_NAMESPACE, binding.name)
                .ok_or_else(|| {
                    RunError::Link(format!("backend does not provide {}", binding.name))
                })?;
            functions.push(function);
        }
        store.data_mut().relay = Relay::new(self.relay.clone(), functions);
        Ok(())
    }

    /// Drives init, parse, resolve, instantiate, validate and call. Errors
    /// are returned for every fatal step before the call; the call itself
    /// always yields an outcome.
    pub fn execute<B: SyscallBackend>(
        &self,
        wasm_binary: &[u8],
        args: &[String],
        backend: B,
    ) -> Result<ExecutionOutcome, RunError> {
        debug_log(|| format!("initialising backend with {} args", args.len()));
        let syscalls = backend.init(args).map_err(RunError::BackendInit)?;

        let module = Module::new(&self.engine, wasm_binary)
            .map_err(|err| RunError::Parse(one_line(&err)))?;
        debug_log(|| "module parsed".to_string());

        let bindings = resolve_imports(&module)?;
        debug_log(|| format!("resolved {} imports", bindings.len()));

        let state = HostState {
            syscalls,
            limits: StoreLimitsBuilder::new()
                .memory_size(self.config.max_memory_bytes())
                .build(),
            relay: Relay::new(self.relay.clone(), Vec::new()),
        };
        let mut store = Store::new(&self.engine, state);
        store.limiter(|state| &mut state.limits);
        self.link_backend::<B>(&mut store)?;
        let mut linker = Linker::new(&self.engine);
        add_to_linker::<B>(&mut linker, &self.engine)
            .map_err(|err| RunError::Link(one_line(&err)))?;

        debug_log(|| {
            format!(
                "instantiating with a ceiling of {} pages",
                self.config.max_memory_pages
            )
        });
        let instance = linker
            .instantiate(&mut store, &module)
            .map_err(|err| RunError::Instantiate(one_line(&err)))?;

        let start = check_command_abi(&mut store, &instance)?;

        debug_log(|| "calling _start".to_string());
        let outcome = ExecutionOutcome::from_call(start.call(&mut store, ()));
        debug_log(|| format!("_start finished: {outcome:?}"));
        Ok(outcome)
    }

    /// Runs a module and reports any fatal failure as one line on `err`.
    pub fn run<B: SyscallBackend>(
        &self,
        wasm_binary: &[u8],
        args: &[String],
        backend: B,
        err: &mut dyn Write,
    ) -> bool {
        settle(self.execute(wasm_binary, args, backend), err)
            .is_some_and(|outcome| outcome.is_success())
    }
}

/// Reports a fatal failure or a trap as one line on `err`. Returns the
/// outcome when `_start` was reached.
pub(crate) fn settle(
    result: Result<ExecutionOutcome, RunError>,
    err: &mut dyn Write,
) -> Option<ExecutionOutcome> {
    match result {
        Ok(ExecutionOutcome::Trapped(message)) => {
            let _ = writeln!(err, "{}", RunError::Trap(message.clone()));
            Some(ExecutionOutcome::Trapped(message))
        }
        Ok(outcome) => Some(outcome),
        Err(error) => {
            let _ = writeln!(err, "{error}");
            None
        }
    }
}
