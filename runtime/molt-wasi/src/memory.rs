//! Bounds checks over guest linear memory.
//!
//! Every offset and length coming from the guest is untrusted. Adapters run
//! each argument through a view before the backend sees the call, so a bad
//! pointer becomes `EFAULT` for the guest instead of a trap or an access
//! outside the bound.

use crate::errno::Errno;

/// Size of a preview1 `ciovec`/`iovec` record: `{ buf: u32, buf_len: u32 }`.
pub const IOVEC_SIZE: u32 = 8;

/// One guest scatter/gather entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IoVec {
    pub ptr: u32,
    pub len: u32,
}

/// Non-owning view over an instance's linear memory for one host call.
pub struct GuestMemoryView<'a> {
    bytes: &'a [u8],
}

impl<'a> GuestMemoryView<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn range(&self, ptr: u32, len: u32) -> Result<std::ops::Range<usize>, Errno> {
        let start = ptr as usize;
        let end = start.checked_add(len as usize).ok_or(Errno::Fault)?;
        if end > self.bytes.len() {
            return Err(Errno::Fault);
        }
        Ok(start..end)
    }

    pub fn check(&self, ptr: u32, len: u32) -> Result<(), Errno> {
        self.range(ptr, len).map(|_| ())
    }

    /// Checks a `u32`-aligned record of `len` bytes, such as a result slot.
    pub fn check_slot(&self, ptr: u32, len: u32) -> Result<(), Errno> {
        if ptr % 4 != 0 {
            return Err(Errno::Fault);
        }
        self.check(ptr, len)
    }

    pub fn read_u32(&self, ptr: u32) -> Result<u32, Errno> {
        let bytes = &self.bytes[self.range(ptr, 4)?];
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Decodes `count` iovec records at `ptr` and checks that every buffer
    /// they describe lies inside the view.
    pub fn iovecs(&self, ptr: u32, count: u32) -> Result<Vec<IoVec>, Errno> {
        let table_len = count.checked_mul(IOVEC_SIZE).ok_or(Errno::Fault)?;
        self.check_slot(ptr, table_len)?;
        let mut iovs = Vec::with_capacity(count as usize);
        for index in 0..count {
            let base = ptr + index * IOVEC_SIZE;
            let iov = IoVec {
                ptr: self.read_u32(base)?,
                len: self.read_u32(base + 4)?,
            };
            self.check(iov.ptr, iov.len)?;
            iovs.push(iov);
        }
        Ok(iovs)
    }
}
