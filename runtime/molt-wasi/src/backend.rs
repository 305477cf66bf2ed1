//! Syscall emulation backends.
//!
//! A backend owns every OS-facing resource of a run (stdio, the environment
//! snapshot, preopened directories) and supplies the host functions behind
//! the catalogue's syscalls. One backend serves exactly one run: `init`
//! consumes it, and the state it returns moves into that run's store.

use std::env;
use std::path::Path;

use anyhow::Result;
use wasmtime::Linker;
use wasmtime_wasi::p1::{self, WasiP1Ctx};
use wasmtime_wasi::{DirPerms, FilePerms, WasiCtxBuilder};

use crate::config::debug_log;
use crate::driver::HostState;
use crate::errno::Errno;

/// Source of the syscall implementations the import catalogue routes to.
pub trait SyscallBackend: Sized + 'static {
    /// Per-run state the backend's host functions work on.
    type State: Send + 'static;

    /// Prepares the backend for a run with the guest's argument vector.
    fn init(self, args: &[String]) -> Result<Self::State, Errno>;

    /// Defines `fd_read`, `fd_write`, `fd_prestat_get` and
    /// `environ_sizes_get` in the `wasi_snapshot_preview1` namespace.
    ///
    /// These are never linked into the guest. Adapters bounds-check every
    /// guest pointer first and then call them from an instance whose
    /// `memory` export is the guest's memory.
    fn add_to_linker(linker: &mut Linker<HostState<Self::State>>) -> Result<()>;

    /// Runs before `proc_exit` unwinds the guest.
    fn proc_exit(_state: &mut Self::State, _code: u32) {}

    /// Status for syscalls that are bound but deliberately unimplemented.
    fn return_enosys() -> Errno {
        Errno::Nosys
    }
}

/// Backend on wasmtime-wasi's preview1 implementation.
pub struct WasiBackend {
    builder: WasiCtxBuilder,
    envs: Vec<(String, String)>,
}

impl Default for WasiBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl WasiBackend {
    /// A backend wired to the process stdio with an empty environment.
    pub fn new() -> Self {
        let mut builder = WasiCtxBuilder::new();
        builder.inherit_stdio();
        Self {
            builder,
            envs: Vec::new(),
        }
    }

    /// Snapshots the host process environment. Variables that are not valid
    /// UTF-8 are skipped.
    pub fn inherit_env(mut self) -> Self {
        let vars = env::vars_os().filter_map(|(key, value)| {
            Some((key.into_string().ok()?, value.into_string().ok()?))
        });
        self.envs.extend(vars);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Opens `host_dir` and hands it to the guest as `guest_path`. Preopens
    /// are numbered from fd 3 in the order they are added.
    pub fn preopen_dir(mut self, host_dir: impl AsRef<Path>, guest_path: &str) -> Result<Self> {
        let host_dir = host_dir.as_ref();
        if let Err(err) =
            self.builder
                .preopened_dir(host_dir, guest_path, DirPerms::all(), FilePerms::all())
        {
            return Err(anyhow::Error::from(err)
                .context(format!("cannot preopen {}", host_dir.display())));
        }
        debug_log(|| format!("preopened {} as {guest_path}", host_dir.display()));
        Ok(self)
    }
}

impl SyscallBackend for WasiBackend {
    type State = WasiP1Ctx;

    fn init(mut self, args: &[String]) -> Result<WasiP1Ctx, Errno> {
        if args.iter().any(|arg| arg.contains('\0')) {
            return Err(Errno::Inval);
        }
        if self
            .envs
            .iter()
            .any(|(key, value)| key.contains(['\0', '=']) || value.contains('\0'))
        {
            return Err(Errno::Inval);
        }
        self.builder.envs(&self.envs);
        self.builder.args(args);
        Ok(self.builder.build_p1())
    }

    fn add_to_linker(linker: &mut Linker<HostState<WasiP1Ctx>>) -> Result<()> {
        p1::add_to_linker_sync(linker, |state: &mut HostState<WasiP1Ctx>| {
            &mut state.syscalls
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prog() -> Vec<String> {
        vec!["prog.wasm".to_string()]
    }

    #[test]
    fn init_rejects_nul_in_arguments() {
        let result = WasiBackend::new().init(&["a\0b".to_string()]);
        assert!(matches!(result, Err(Errno::Inval)));
    }

    #[test]
    fn init_rejects_malformed_environment() {
        let bad_key = WasiBackend::new().env("A=B", "1").init(&prog());
        assert!(matches!(bad_key, Err(Errno::Inval)));
        let bad_value = WasiBackend::new().env("A", "1\02").init(&prog());
        assert!(matches!(bad_value, Err(Errno::Inval)));
    }

    #[test]
    fn init_builds_a_context() {
        let backend = WasiBackend::new().env("A", "1").env("HOME", "/root");
        assert!(backend.init(&prog()).is_ok());
    }

    #[test]
    fn preopen_opens_the_host_directory() {
        let dir = tempfile::tempdir().unwrap();
        let backend = WasiBackend::new().preopen_dir(dir.path(), "/sandbox");
        assert!(backend.is_ok());
    }

    #[test]
    fn preopen_of_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let Err(err) = WasiBackend::new().preopen_dir(&missing, "/sandbox") else {
            panic!("preopen of {} succeeded", missing.display());
        };
        assert!(
            format!("{err:#}").contains(&missing.display().to_string()),
            "{err:#}"
        );
    }

    #[test]
    fn unsupported_calls_report_enosys() {
        assert_eq!(WasiBackend::return_enosys(), Errno::Nosys);
    }
}
