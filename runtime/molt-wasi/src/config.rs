use std::env;
use std::path::{Path, PathBuf};

use anyhow::Result;
use wasmtime::{Cache, Config, Engine, OptLevel};

/// Size of one WebAssembly page in bytes.
pub const WASM_PAGE_SIZE: u64 = 64 * 1024;

/// Default memory ceiling: 256 MiB.
pub const DEFAULT_MAX_MEMORY_PAGES: u32 = 4096;

const DEFAULT_MAX_STACK: usize = 8 * 1024 * 1024;

pub(crate) fn debug_enabled() -> bool {
    env::var("MOLT_WASI_DEBUG").is_ok()
}

pub(crate) fn debug_log<F: FnOnce() -> String>(message: F) {
    if debug_enabled() {
        eprintln!("[molt-wasi] {}", message());
    }
}

fn env_number<T: std::str::FromStr + PartialEq + Default>(name: &str) -> Option<T> {
    env::var(name)
        .ok()
        .and_then(|val| val.parse::<T>().ok())
        .filter(|val| *val != T::default())
}

/// Knobs for one command run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunConfig {
    /// Upper bound on linear memory, in pages, enforced by the store limiter.
    pub max_memory_pages: u32,
    pub max_wasm_stack: usize,
    pub cache: CacheMode,
    pub parallel_compilation: bool,
    pub fast_compile: bool,
    /// Host directories preopened for the guest, each under its own path.
    pub preopens: Vec<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheMode {
    Disabled,
    Default,
    File(String),
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_memory_pages: DEFAULT_MAX_MEMORY_PAGES,
            max_wasm_stack: DEFAULT_MAX_STACK,
            cache: CacheMode::Disabled,
            parallel_compilation: true,
            fast_compile: false,
            preopens: Vec::new(),
        }
    }
}

impl RunConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let cache_toggle = env::var("MOLT_WASI_CACHE").ok();
        let cache_path = env::var("MOLT_WASI_CACHE_CONFIG").ok();
        let cache = match (cache_toggle.as_deref(), cache_path) {
            (Some("0"), _) => CacheMode::Disabled,
            (_, Some(path)) => CacheMode::File(path),
            (Some("1"), None) => CacheMode::Default,
            _ => CacheMode::Disabled,
        };
        Self {
            max_memory_pages: env_number("MOLT_WASI_MAX_MEMORY_PAGES")
                .unwrap_or(defaults.max_memory_pages),
            max_wasm_stack: env_number("MOLT_WASI_MAX_STACK").unwrap_or(defaults.max_wasm_stack),
            cache,
            parallel_compilation: !matches!(
                env::var("MOLT_WASI_COMPILE_SERIAL").as_deref(),
                Ok("1")
            ),
            fast_compile: matches!(env::var("MOLT_WASI_COMPILE_FAST").as_deref(), Ok("1")),
            preopens: env::var_os("MOLT_WASI_PREOPEN")
                .map(|paths| env::split_paths(&paths).collect())
                .unwrap_or_default(),
        }
    }

    pub fn with_max_memory_pages(mut self, pages: u32) -> Self {
        self.max_memory_pages = pages;
        self
    }

    pub fn with_max_wasm_stack(mut self, bytes: usize) -> Self {
        self.max_wasm_stack = bytes;
        self
    }

    pub fn with_preopen(mut self, dir: impl Into<PathBuf>) -> Self {
        self.preopens.push(dir.into());
        self
    }

    /// Memory ceiling in bytes as the store limiter expects it.
    pub fn max_memory_bytes(&self) -> usize {
        (self.max_memory_pages as u64 * WASM_PAGE_SIZE).min(usize::MAX as u64) as usize
    }

    pub fn build_engine(&self) -> Result<Engine> {
        let mut config = Config::new();
        config.max_wasm_stack(self.max_wasm_stack);
        debug_log(|| format!("wasmtime max_wasm_stack set to {}", self.max_wasm_stack));
        match &self.cache {
            CacheMode::Disabled => {}
            CacheMode::Default => {
                debug_log(|| "wasmtime cache config: default".to_string());
                config.cache(Some(Cache::from_file(None)?));
            }
            CacheMode::File(path) => {
                debug_log(|| format!("wasmtime cache config: {path}"));
                config.cache(Some(Cache::from_file(Some(Path::new(path)))?));
            }
        }
        if !self.parallel_compilation {
            config.parallel_compilation(false);
            debug_log(|| "wasmtime parallel compilation disabled".to_string());
        }
        if self.fast_compile {
            config.cranelift_opt_level(OptLevel::None);
            debug_log(|| "wasmtime opt level set to none".to_string());
        }
        Ok(Engine::new(&config)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ceiling_is_256_mib() {
        let config = RunConfig::default();
        assert_eq!(config.max_memory_pages, 4096);
        assert_eq!(config.max_memory_bytes(), 256 * 1024 * 1024);
    }

    #[test]
    fn setters_override_defaults() {
        let config = RunConfig::default()
            .with_max_memory_pages(2)
            .with_max_wasm_stack(1024 * 1024);
        assert_eq!(config.max_memory_bytes(), 128 * 1024);
        assert_eq!(config.max_wasm_stack, 1024 * 1024);
    }

    #[test]
    fn preopens_accumulate_in_order() {
        let config = RunConfig::default().with_preopen("/a").with_preopen("/b");
        assert_eq!(config.preopens, [PathBuf::from("/a"), PathBuf::from("/b")]);
    }

    #[test]
    fn default_engine_builds() {
        assert!(RunConfig::default().build_engine().is_ok());
    }
}
