//! WASI preview1 errno values returned to the guest.

use std::fmt;

/// Subset of `wasi_snapshot_preview1` errno codes produced by this host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Errno {
    Success = 0,
    Badf = 8,
    Fault = 21,
    Inval = 28,
    Nosys = 52,
}

impl Errno {
    /// The raw value handed back across the guest ABI.
    pub fn raw(self) -> u32 {
        self as u16 as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Success => "ESUCCESS",
            Self::Badf => "EBADF",
            Self::Fault => "EFAULT",
            Self::Inval => "EINVAL",
            Self::Nosys => "ENOSYS",
        }
    }

    fn description(self) -> &'static str {
        match self {
            Self::Success => "no error",
            Self::Badf => "bad file descriptor",
            Self::Fault => "bad address",
            Self::Inval => "invalid argument",
            Self::Nosys => "function not supported",
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name(), self.raw(), self.description())
    }
}

impl std::error::Error for Errno {}
