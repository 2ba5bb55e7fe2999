use crate::page::{Addr, Page, Pages};
use std::io;

/// Linux (i386) errno values handed back to the guest.
pub mod errno {
    pub const EPERM: i32 = 1;
    pub const EBADF: i32 = 9;
    pub const EAGAIN: i32 = 11;
    pub const ENOMEM: i32 = 12;
    pub const EACCES: i32 = 13;
    pub const ENODEV: i32 = 19;
    pub const EINVAL: i32 = 22;
    pub const ENFILE: i32 = 23;
    pub const EMFILE: i32 = 24;
    pub const ETXTBSY: i32 = 26;
    pub const EOVERFLOW: i32 = 75;
}

/// Errors from mapping operations.
#[derive(Debug, thiserror::Error)]
pub enum MemError {
    /// The host refused to provide backing memory.
    #[error("host mmap failed: {0}")]
    MapFailed(#[source] io::Error),
    /// Installing the range would exceed the page table's entry budget.
    #[error("page table needs {needed} more entries but only {available} are available")]
    OutOfMemoryForMetadata { needed: usize, available: usize },
    /// An unmap/protect range contains an absent page. Nothing was modified.
    #[error("page 0x{page:x} is not mapped")]
    NotMapped { page: Page },
    /// The range does not fit in the guest address space.
    #[error("page range 0x{start:x}+0x{count:x} is outside the address space")]
    OutOfRange { start: Page, count: Pages },
}

pub type MemResult<T> = Result<T, MemError>;

impl MemError {
    /// Positive guest errno for this error.
    pub fn errno(&self) -> i32 {
        match self {
            MemError::MapFailed(err) => host_errno_to_guest(err),
            MemError::OutOfMemoryForMetadata { .. } => errno::ENOMEM,
            MemError::NotMapped { .. } => errno::ENOMEM,
            MemError::OutOfRange { .. } => errno::ENOMEM,
        }
    }
}

fn host_errno_to_guest(err: &io::Error) -> i32 {
    match err.raw_os_error() {
        Some(libc::EPERM) => errno::EPERM,
        Some(libc::EBADF) => errno::EBADF,
        Some(libc::EAGAIN) => errno::EAGAIN,
        Some(libc::ENOMEM) => errno::ENOMEM,
        Some(libc::EACCES) => errno::EACCES,
        Some(libc::ENODEV) => errno::ENODEV,
        Some(libc::EINVAL) => errno::EINVAL,
        Some(libc::ENFILE) => errno::ENFILE,
        Some(libc::EMFILE) => errno::EMFILE,
        Some(libc::ETXTBSY) => errno::ETXTBSY,
        Some(libc::EOVERFLOW) => errno::EOVERFLOW,
        Some(_) => errno::ENOMEM,
        None if err.kind() == io::ErrorKind::InvalidInput => errno::EINVAL,
        None => errno::ENOMEM,
    }
}

/// A translation failure. The caller decides what the guest sees (stack growth, SIGSEGV, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TranslateFault {
    /// No backed page at the address (absent or guard).
    #[error("page not mapped")]
    Unmapped,
    /// Write to a page without [`PageFlags::WRITE`](crate::PageFlags::WRITE).
    #[error("page is read-only")]
    ReadOnly,
}

/// A guest copy that stopped at `addr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("guest access at 0x{addr:08x} failed: {fault}")]
pub struct GuestAccessError {
    pub addr: Addr,
    pub fault: TranslateFault,
}
