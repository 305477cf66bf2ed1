//! Forwarding from adapters to backend host functions.
//!
//! Backend host functions find guest memory through their caller's `memory`
//! export, and a host function invoked straight from another host function
//! has no caller instance. Adapters therefore reach the backend through a
//! small relay instance: it imports the guest's memory, re-exports it as
//! `memory`, and forwards each syscall with its arguments untouched.

use std::fmt::Write as _;

use anyhow::Result;
use wasmtime::{Caller, Engine, Extern, Instance, Memory, Module, WasmParams};

use crate::config::debug_log;
use crate::driver::HostState;
use crate::imports::{ImportBinding, WASI_IMPORTS};

const GUEST_MEMORY_IMPORT: (&str, &str) = ("guest", "memory");

/// Catalogue entries served by the backend rather than by the adapters.
pub(crate) fn relayed() -> impl Iterator<Item = &'static ImportBinding> {
    WASI_IMPORTS
        .iter()
        .filter(|binding| binding.adapter.is_relayed())
}

fn signature(binding: &ImportBinding) -> String {
    let mut sig = String::from("(param");
    for param in binding.params {
        sig.push(' ');
        sig.push_str(param.wat_name());
    }
    sig.push(')');
    if let Some(result) = binding.result {
        let _ = write!(sig, " (result {})", result.wat_name());
    }
    sig
}

fn relay_wat() -> String {
    let (memory_module, memory_name) = GUEST_MEMORY_IMPORT;
    let mut wat = format!("(module\n  (import \"{memory_module}\" \"{memory_name}\" (memory 0))\n");
    for binding in relayed() {
        let _ = writeln!(
            wat,
            "  (import \"{}\" \"{}\" (func ${} {}))",
            binding.namespace,
            binding.name,
            binding.name,
            signature(binding)
        );
    }
    wat.push_str("  (export \"memory\" (memory 0))\n");
    for binding in relayed() {
        let args = (0..binding.params.len())
            .map(|index| format!(" (local.get {index})"))
            .collect::<String>();
        let _ = writeln!(
            wat,
            "  (func (export \"{}\") {}\n    (call ${}{}))",
            binding.name,
            signature(binding),
            binding.name,
            args
        );
    }
    wat.push(')');
    wat
}

/// Compiles the relay module. It only depends on the catalogue, so one copy
/// serves every run on an engine.
pub(crate) fn compile(engine: &Engine) -> Result<Module> {
    let wasm = wat::parse_str(relay_wat())?;
    Ok(Module::new(engine, wasm)?)
}

/// Backend functions for one store, and the relay instance once the guest's
/// memory is known.
pub(crate) struct Relay {
    module: Module,
    backend: Vec<Extern>,
    instance: Option<Instance>,
}

impl Relay {
    /// `backend` holds one function per [`relayed`] entry, in the same order.
    pub(crate) fn new(module: Module, backend: Vec<Extern>) -> Self {
        Self {
            module,
            backend,
            instance: None,
        }
    }
}

fn instance<S: Send + 'static>(
    caller: &mut Caller<'_, HostState<S>>,
    memory: Memory,
) -> wasmtime::Result<Instance> {
    if let Some(instance) = caller.data().relay.instance {
        return Ok(instance);
    }
    let relay = &caller.data().relay;
    let module = relay.module.clone();
    let mut imports = Vec::with_capacity(relay.backend.len() + 1);
    imports.push(Extern::from(memory));
    imports.extend(relay.backend.iter().cloned());
    let instance = Instance::new(&mut *caller, &module, &imports)?;
    debug_log(|| "syscall relay instantiated".to_string());
    caller.data_mut().relay.instance = Some(instance);
    Ok(instance)
}

/// Calls the backend's `name` with `memory` visible as the caller's memory.
pub(crate) fn call<S, P>(
    caller: &mut Caller<'_, HostState<S>>,
    memory: Memory,
    name: &str,
    params: P,
) -> wasmtime::Result<u32>
where
    S: Send + 'static,
    P: WasmParams,
{
    let relay = instance(caller, memory)?;
    let func = relay.get_typed_func::<P, u32>(&mut *caller, name)?;
    func.call(&mut *caller, params)
}
