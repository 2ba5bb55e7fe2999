//! User-space virtual memory for a process-level emulator.
//!
//! Guest code sees a flat 32-bit virtual address space; every guest page is backed by a page of
//! host memory obtained with `mmap(2)`. The crate is split the same way a hardware MMU is:
//! - [`PageTable`]: sparse page number → [`PageTableEntry`] map. Entries share their backing
//!   [`PageFrame`] through an `Arc`, so a frame is released when its last owner goes away.
//! - [`Tlb`]: a direct-mapped translation cache consulted on every guest memory access.
//! - [`AddressSpaceAllocator`]: top-down hole search used to place new mappings.
//! - [`Mem`]: the address space. It is the only writer of the page table and flushes the
//!   translation cache on every mutation, so a stale translation is never observed.
//!
//! Only one page size is supported and it must match the host's; [`init`] aborts the process
//! otherwise.

mod backing;
mod error;
mod flags;
mod hole;
mod host;
mod mem;
mod page;
mod pt;
mod tlb;

pub use backing::{HostRegion, PageFrame};
pub use error::{errno, GuestAccessError, MemError, MemResult, TranslateFault};
pub use flags::PageFlags;
pub use hole::AddressSpaceAllocator;
pub use host::{host_page_size, init};
pub use mem::{Mem, MemOptions, PageInfo};
pub use page::{page, page_addr, page_offset, Addr, Page, Pages, PAGE_BITS, PAGE_COUNT, PAGE_SIZE};
pub use pt::{PageTable, PageTableEntry};
pub use tlb::{AccessType, Tlb, TlbStats, TLB_PAGE_EMPTY, TLB_SIZE};

#[cfg(test)]
mod tests;
