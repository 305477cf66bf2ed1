use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::errno::Errno;

/// Why a module does not follow the WASI command convention.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbiError {
    MissingStart,
    InvalidStartSignature,
    MissingMemory,
}

impl fmt::Display for AbiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::MissingStart => "_start not found",
            Self::InvalidStartSignature => "_start has invalid signature",
            Self::MissingMemory => "no memory exported",
        };
        write!(f, "File is not WASI compatible ({reason})")
    }
}

impl std::error::Error for AbiError {}

/// Failure to read a module binary from disk.
#[derive(Debug)]
pub enum LoadError {
    NotFound(PathBuf),
    NotAFile(PathBuf),
    Open(PathBuf, io::Error),
    Read(PathBuf, io::Error),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(path) => write!(f, "File does not exist: {}", path.display()),
            Self::NotAFile(path) => write!(f, "Not a file: {}", path.display()),
            Self::Open(path, _) => write!(f, "Failed to open file: {}", path.display()),
            Self::Read(path, _) => write!(f, "Failed to load: {}", path.display()),
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Open(_, err) | Self::Read(_, err) => Some(err),
            _ => None,
        }
    }
}

/// Fatal failure of a command run. Each variant renders as one diagnostic line.
#[derive(Debug)]
pub enum RunError {
    NoModulePath,
    BackendSetup(String),
    BackendInit(Errno),
    Link(String),
    Engine(String),
    Parse(String),
    UnresolvedImport { module: String, name: String },
    Instantiate(String),
    Abi(AbiError),
    Trap(String),
    Load(LoadError),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoModulePath => f.write_str("No module path given"),
            Self::BackendSetup(msg) => write!(f, "Failed to set up WASI backend: {msg}"),
            Self::BackendInit(errno) => write!(f, "Failed to initialise WASI backend: {errno}"),
            Self::Link(msg) => write!(f, "Failed to link WASI imports: {msg}"),
            Self::Engine(msg) => write!(f, "Failed to configure engine: {msg}"),
            Self::Parse(msg) => write!(f, "Failed to parse module: {msg}"),
            Self::UnresolvedImport { module, name } => {
                write!(f, "Unresolved import: {module}.{name}")
            }
            Self::Instantiate(msg) => write!(f, "Failed to instantiate module: {msg}"),
            Self::Abi(err) => fmt::Display::fmt(err, f),
            Self::Trap(msg) => write!(f, "Execution aborted with WebAssembly trap: {msg}"),
            Self::Load(err) => fmt::Display::fmt(err, f),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::BackendInit(errno) => Some(errno),
            Self::Abi(err) => Some(err),
            Self::Load(err) => Some(err),
            _ => None,
        }
    }
}

impl From<AbiError> for RunError {
    fn from(err: AbiError) -> Self {
        Self::Abi(err)
    }
}

impl From<LoadError> for RunError {
    fn from(err: LoadError) -> Self {
        Self::Load(err)
    }
}

/// Renders an engine error with its context chain on a single line.
pub(crate) fn one_line(err: &impl fmt::Display) -> String {
    format!("{err:#}").replace('\n', " ")
}
