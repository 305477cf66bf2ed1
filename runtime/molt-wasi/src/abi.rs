use wasmtime::{Instance, Store, TypedFunc};

use crate::error::AbiError;
use crate::imports::MEMORY_EXPORT;

pub const START_EXPORT: &str = "_start";

/// Gates execution on the WASI command convention: `_start: [] -> []` and an
/// exported `memory`. Checks run in that order and stop at the first miss.
pub fn check_command_abi<T: 'static>(
    store: &mut Store<T>,
    instance: &Instance,
) -> Result<TypedFunc<(), ()>, AbiError> {
    let start = instance
        .get_func(&mut *store, START_EXPORT)
        .ok_or(AbiError::MissingStart)?;
    let ty = start.ty(&*store);
    if ty.params().next().is_some() || ty.results().next().is_some() {
        return Err(AbiError::InvalidStartSignature);
    }
    if instance.get_memory(&mut *store, MEMORY_EXPORT).is_none() {
        return Err(AbiError::MissingMemory);
    }
    start
        .typed::<(), ()>(&*store)
        .map_err(|_| AbiError::InvalidStartSignature)
}
