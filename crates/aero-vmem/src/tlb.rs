use crate::error::TranslateFault;
use crate::page::{page, page_addr, Addr, Page, PAGE_COUNT};
use crate::pt::PageTable;

/// Type of memory access being translated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    Read,
    Write,
}

const TLB_BITS: u32 = 10;
pub const TLB_SIZE: usize = 1 << TLB_BITS;

/// Tag of an empty line. Page numbers are below [`PAGE_COUNT`], so this never hits.
pub const TLB_PAGE_EMPTY: Page = Page::MAX;
const _: () = assert!(TLB_PAGE_EMPTY >= PAGE_COUNT);

#[derive(Debug, Clone, Copy)]
struct TlbEntry {
    page: Page,
    /// `page` if the page was writable when the line was filled, else [`TLB_PAGE_EMPTY`]. Lets a
    /// write be served (or rejected into the slow path) from the line alone.
    page_if_writable: Page,
    /// Cached `host_base - guest_base` (wrapping) so translation is a single add.
    host_delta: usize,
}

impl TlbEntry {
    const EMPTY: Self = Self {
        page: TLB_PAGE_EMPTY,
        page_if_writable: TLB_PAGE_EMPTY,
        host_delta: 0,
    };

    #[inline]
    fn translate(&self, addr: Addr) -> *mut u8 {
        self.host_delta.wrapping_add(addr as usize) as *mut u8
    }
}

/// Translation-cache counters (feature `stats`).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TlbStats {
    pub hits: u64,
    pub misses: u64,
    pub flushes: u64,
}

/// Direct-mapped translation cache.
///
/// Line `i` caches the most recently resolved page whose number has `i` in its low bits; pages
/// that alias simply evict each other. The cache never holds anything the page table does not
/// currently say, which is why every page-table mutation is followed by [`Tlb::flush`].
#[derive(Debug, Clone)]
pub struct Tlb {
    entries: [TlbEntry; TLB_SIZE],
    dirty_page: Option<Page>,
    #[cfg(feature = "stats")]
    stats: TlbStats,
}

impl Default for Tlb {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn tlb_index(page: Page) -> usize {
    page as usize & (TLB_SIZE - 1)
}

impl Tlb {
    pub fn new() -> Self {
        Self {
            entries: [TlbEntry::EMPTY; TLB_SIZE],
            dirty_page: None,
            #[cfg(feature = "stats")]
            stats: TlbStats::default(),
        }
    }

    /// Cache-only lookup. Never touches the page table.
    #[inline]
    pub fn lookup(&self, addr: Addr, access: AccessType) -> Option<*mut u8> {
        let page = page(addr);
        let entry = &self.entries[tlb_index(page)];
        let tag = match access {
            AccessType::Read => entry.page,
            AccessType::Write => entry.page_if_writable,
        };
        (tag == page).then(|| entry.translate(addr))
    }

    /// Translates `addr` to a host pointer, filling the cache from `pt` on a miss.
    ///
    /// The pointer stays valid until the page is unmapped from every address space sharing it.
    #[inline]
    pub fn translate(
        &mut self,
        pt: &PageTable,
        addr: Addr,
        access: AccessType,
    ) -> Result<*mut u8, TranslateFault> {
        if let Some(ptr) = self.lookup(addr, access) {
            #[cfg(feature = "stats")]
            {
                self.stats.hits = self.stats.hits.wrapping_add(1);
            }
            return Ok(ptr);
        }
        self.handle_miss(pt, addr, access)
    }

    #[cold]
    fn handle_miss(
        &mut self,
        pt: &PageTable,
        addr: Addr,
        access: AccessType,
    ) -> Result<*mut u8, TranslateFault> {
        #[cfg(feature = "stats")]
        {
            self.stats.misses = self.stats.misses.wrapping_add(1);
        }

        let page = page(addr);
        let entry = pt.get(page).ok_or(TranslateFault::Unmapped)?;
        // Guard entries have no frame; whatever their flags say, they are never dereferenced.
        let host_base = entry.host_ptr().ok_or(TranslateFault::Unmapped)?;
        let writable = entry.flags().writable();
        if access == AccessType::Write && !writable {
            return Err(TranslateFault::ReadOnly);
        }

        let line = TlbEntry {
            page,
            page_if_writable: if writable { page } else { TLB_PAGE_EMPTY },
            host_delta: (host_base as usize).wrapping_sub(page_addr(page) as usize),
        };
        self.entries[tlb_index(page)] = line;
        if writable {
            self.dirty_page = Some(page);
        }
        tracing::trace!(page, writable, "tlb fill");
        Ok(line.translate(addr))
    }

    /// Empties every line.
    pub fn flush(&mut self) {
        #[cfg(feature = "stats")]
        {
            self.stats.flushes = self.stats.flushes.wrapping_add(1);
        }
        self.entries.fill(TlbEntry::EMPTY);
        tracing::trace!("tlb flush");
    }

    /// Most recent page resolved with write access available; consumed by dirty tracking.
    #[inline]
    pub fn dirty_page(&self) -> Option<Page> {
        self.dirty_page
    }

    /// Current counters, or `None` without the `stats` feature.
    #[inline]
    pub fn stats(&self) -> Option<TlbStats> {
        #[cfg(feature = "stats")]
        {
            Some(self.stats)
        }
        #[cfg(not(feature = "stats"))]
        {
            None
        }
    }
}
