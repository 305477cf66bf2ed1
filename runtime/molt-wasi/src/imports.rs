//! The closed catalogue of `wasi_snapshot_preview1` imports and the host
//! adapters that route them into the run's [`SyscallBackend`].

use anyhow::Result;
use wasmtime::{Caller, Engine, Extern, ExternType, FuncType, ImportType, Linker, Memory, Module, Val, ValType};
use wasmtime_wasi::I32Exit;

use crate::backend::SyscallBackend;
use crate::config::debug_log;
use crate::driver::HostState;
use crate::errno::Errno;
use crate::error::RunError;
use crate::memory::GuestMemoryView;
use crate::relay;

pub const WASI_NAMESPACE: &str = "wasi_snapshot_preview1";

/// Export name adapters read guest memory through.
pub const MEMORY_EXPORT: &str = "memory";

/// Value types that appear in catalogue signatures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValKind {
    I32,
}

impl ValKind {
    fn of(ty: &ValType) -> Option<Self> {
        match ty {
            ValType::I32 => Some(Self::I32),
            _ => None,
        }
    }

    fn val_type(self) -> ValType {
        match self {
            Self::I32 => ValType::I32,
        }
    }

    pub(crate) fn wat_name(self) -> &'static str {
        match self {
            Self::I32 => "i32",
        }
    }
}

/// Host-side handler a binding dispatches to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Adapter {
    ProcExit,
    FdRead,
    FdWrite,
    FdPrestatGet,
    EnvironSizesGet,
    ReturnEnosys,
}

impl Adapter {
    /// Whether the syscall itself is carried out by the backend.
    pub fn is_relayed(self) -> bool {
        !matches!(self, Self::ProcExit | Self::ReturnEnosys)
    }
}

#[derive(Debug)]
pub struct ImportBinding {
    pub namespace: &'static str,
    pub name: &'static str,
    pub params: &'static [ValKind],
    pub result: Option<ValKind>,
    pub adapter: Adapter,
}

use self::ValKind::I32;

pub static WASI_IMPORTS: [ImportBinding; 7] = [
    ImportBinding {
        namespace: WASI_NAMESPACE,
        name: "proc_exit",
        params: &[I32],
        result: None,
        adapter: Adapter::ProcExit,
    },
    ImportBinding {
        namespace: WASI_NAMESPACE,
        name: "fd_read",
        params: &[I32, I32, I32, I32],
        result: Some(I32),
        adapter: Adapter::FdRead,
    },
    ImportBinding {
        namespace: WASI_NAMESPACE,
        name: "fd_write",
        params: &[I32, I32, I32, I32],
        result: Some(I32),
        adapter: Adapter::FdWrite,
    },
    ImportBinding {
        namespace: WASI_NAMESPACE,
        name: "fd_prestat_get",
        params: &[I32, I32],
        result: Some(I32),
        adapter: Adapter::FdPrestatGet,
    },
    ImportBinding {
        namespace: WASI_NAMESPACE,
        name: "fd_prestat_dir_name",
        params: &[I32, I32, I32],
        result: Some(I32),
        adapter: Adapter::ReturnEnosys,
    },
    ImportBinding {
        namespace: WASI_NAMESPACE,
        name: "environ_sizes_get",
        params: &[I32, I32],
        result: Some(I32),
        adapter: Adapter::EnvironSizesGet,
    },
    ImportBinding {
        namespace: WASI_NAMESPACE,
        name: "environ_get",
        params: &[I32, I32],
        result: Some(I32),
        adapter: Adapter::ReturnEnosys,
    },
];

pub fn find_binding(namespace: &str, name: &str) -> Option<&'static ImportBinding> {
    WASI_IMPORTS
        .iter()
        .find(|binding| binding.namespace == namespace && binding.name == name)
}

impl ImportBinding {
    pub fn matches(&self, ty: &FuncType) -> bool {
        let params = ty.params().map(|p| ValKind::of(&p)).collect::<Vec<_>>();
        let results = ty.results().map(|r| ValKind::of(&r)).collect::<Vec<_>>();
        params.len() == self.params.len()
            && params
                .iter()
                .zip(self.params)
                .all(|(actual, expected)| *actual == Some(*expected))
            && results == self.result.map(Some).into_iter().collect::<Vec<_>>()
    }

    pub fn func_type(&self, engine: &Engine) -> FuncType {
        FuncType::new(
            engine,
            self.params.iter().map(|kind| kind.val_type()),
            self.result.map(ValKind::val_type),
        )
    }
}

fn unresolved(import: &ImportType<'_>) -> RunError {
    RunError::UnresolvedImport {
        module: import.module().to_string(),
        name: import.name().to_string(),
    }
}

/// Matches every import of `module` against the catalogue, kind and
/// signature included. The first miss is fatal.
pub fn resolve_imports(module: &Module) -> Result<Vec<&'static ImportBinding>, RunError> {
    let mut resolved = Vec::new();
    for import in module.imports() {
        let binding = find_binding(import.module(), import.name())
            .ok_or_else(|| unresolved(&import))?;
        match import.ty() {
            ExternType::Func(ty) if binding.matches(&ty) => resolved.push(binding),
            _ => return Err(unresolved(&import)),
        }
        debug_log(|| format!("resolved import {}.{}", import.module(), import.name()));
    }
    Ok(resolved)
}

/// Bounds-checks a call against the caller's exported memory, then hands it
/// to the backend. Instances without a `memory` export get `EFAULT`, and so
/// does any argument `check` rejects; the backend never sees either.
fn forward<S, P>(
    caller: &mut Caller<'_, HostState<S>>,
    name: &str,
    params: P,
    check: impl FnOnce(&GuestMemoryView<'_>) -> Result<(), Errno>,
) -> wasmtime::Result<u32>
where
    S: Send + 'static,
    P: wasmtime::WasmParams,
{
    let Some(memory) = guest_memory(caller) else {
        debug_log(|| format!("{name}: no exported memory"));
        return Ok(Errno::Fault.raw());
    };
    if let Err(errno) = check(&GuestMemoryView::new(memory.data(&*caller))) {
        debug_log(|| format!("{name}: {errno}"));
        return Ok(errno.raw());
    }
    relay::call(caller, memory, name, params)
}

fn guest_memory<S: Send + 'static>(caller: &mut Caller<'_, HostState<S>>) -> Option<Memory> {
    caller
        .get_export(MEMORY_EXPORT)
        .and_then(Extern::into_memory)
}

fn define_binding<B: SyscallBackend>(
    linker: &mut Linker<HostState<B::State>>,
    engine: &Engine,
    binding: &ImportBinding,
) -> Result<()> {
    let (ns, name) = (binding.namespace, binding.name);
    match binding.adapter {
        Adapter::ProcExit => {
            linker.func_wrap(
                ns,
                name,
                |mut caller: Caller<'_, HostState<B::State>>, code: u32| -> wasmtime::Result<()> {
                    debug_log(|| format!("proc_exit({code})"));
                    B::proc_exit(caller.data_mut().syscalls_mut(), code);
                    Err(I32Exit(code as i32).into())
                },
            )?;
        }
        Adapter::FdRead => {
            linker.func_wrap(
                ns,
                name,
                |mut caller: Caller<'_, HostState<B::State>>,
                 fd: u32,
                 iov_ptr: u32,
                 iov_cnt: u32,
                 nread_ptr: u32| {
                    forward(&mut caller, "fd_read", (fd, iov_ptr, iov_cnt, nread_ptr), |memory| {
                        memory.iovecs(iov_ptr, iov_cnt)?;
                        memory.check_slot(nread_ptr, 4)
                    })
                },
            )?;
        }
        Adapter::FdWrite => {
            linker.func_wrap(
                ns,
                name,
                |mut caller: Caller<'_, HostState<B::State>>,
                 fd: u32,
                 iov_ptr: u32,
                 iov_cnt: u32,
                 nwritten_ptr: u32| {
                    forward(
                        &mut caller,
                        "fd_write",
                        (fd, iov_ptr, iov_cnt, nwritten_ptr),
                        |memory| {
                            memory.iovecs(iov_ptr, iov_cnt)?;
                            memory.check_slot(nwritten_ptr, 4)
                        },
                    )
                },
            )?;
        }
        Adapter::FdPrestatGet => {
            linker.func_wrap(
                ns,
                name,
                |mut caller: Caller<'_, HostState<B::State>>, fd: u32, prestat_ptr: u32| {
                    // prestat: u8 tag, padding, u32 name length
                    forward(&mut caller, "fd_prestat_get", (fd, prestat_ptr), |memory| {
                        memory.check_slot(prestat_ptr, 8)
                    })
                },
            )?;
        }
        Adapter::EnvironSizesGet => {
            linker.func_wrap(
                ns,
                name,
                |mut caller: Caller<'_, HostState<B::State>>,
                 environc_ptr: u32,
                 environ_buf_size_ptr: u32| {
                    forward(
                        &mut caller,
                        "environ_sizes_get",
                        (environc_ptr, environ_buf_size_ptr),
                        |memory| {
                            memory.check_slot(environc_ptr, 4)?;
                            memory.check_slot(environ_buf_size_ptr, 4)
                        },
                    )
                },
            )?;
        }
        Adapter::ReturnEnosys => {
            // Arity differs per binding, so this one is untyped.
            linker.func_new(
                ns,
                name,
                binding.func_type(engine),
                |_caller: Caller<'_, HostState<B::State>>, _params: &[Val], results: &mut [Val]| {
                    results[0] = Val::I32(B::return_enosys().raw() as i32);
                    Ok(())
                },
            )?;
        }
    }
    Ok(())
}

/// Registers the full catalogue on `linker`. Nothing else is ever defined,
/// so instantiation cannot pick up backend functions, memories, tables or
/// globals from the host.
pub(crate) fn add_to_linker<B: SyscallBackend>(
    linker: &mut Linker<HostState<B::State>>,
    engine: &Engine,
) -> Result<()> {
    for binding in &WASI_IMPORTS {
        define_binding::<B>(linker, engine, binding)?;
    }
    Ok(())
}
