use crate::backing::HostRegion;
use crate::error::{GuestAccessError, MemError, MemResult, TranslateFault};
use crate::flags::PageFlags;
use crate::hole::{AddressSpaceAllocator, DEFAULT_HOLE_HIGH, DEFAULT_HOLE_LOW};
use crate::host;
use crate::page::{page_offset, page_range, Addr, Page, Pages, PAGE_COUNT, PAGE_SIZE};
use crate::pt::{PageTable, PageTableEntry};
use crate::tlb::{AccessType, Tlb, TlbStats};
use core::fmt;
use std::fs::File;
use std::io;
use std::ops::Range;

/// Address-space configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemOptions {
    /// Exclusive floor of the hole search.
    pub hole_low: Page,
    /// Inclusive ceiling of the hole search.
    pub hole_high: Page,
    /// Maximum number of page-table entries (guard pages included).
    pub max_entries: usize,
}

impl Default for MemOptions {
    fn default() -> Self {
        Self {
            hole_low: DEFAULT_HOLE_LOW,
            hole_high: DEFAULT_HOLE_HIGH,
            max_entries: PAGE_COUNT as usize,
        }
    }
}

/// A guest address space.
///
/// All mutations go through `&mut self` and flush the translation cache before returning, so a
/// translation can never outlive the mapping or permissions it was derived from.
#[derive(Debug)]
pub struct Mem {
    pt: PageTable,
    tlb: Tlb,
    holes: AddressSpaceAllocator,
    max_entries: usize,
}

impl Default for Mem {
    fn default() -> Self {
        Self::new()
    }
}

impl Mem {
    pub fn new() -> Self {
        Self::with_options(MemOptions::default())
    }

    /// Panics if the hole-search bounds are inverted or outside the address space.
    #[track_caller]
    pub fn with_options(options: MemOptions) -> Self {
        host::init();
        Self {
            pt: PageTable::new(),
            tlb: Tlb::new(),
            holes: AddressSpaceAllocator::new(options.hole_low, options.hole_high),
            max_entries: options.max_entries,
        }
    }

    #[inline]
    pub fn page_table(&self) -> &PageTable {
        &self.pt
    }

    #[inline]
    pub fn entry(&self, page: Page) -> Option<&PageTableEntry> {
        self.pt.get(page)
    }

    /// Lowest page of a free window of `pages` pages, chosen top-down.
    pub fn allocate(&self, pages: Pages) -> Option<Page> {
        self.holes.allocate(&self.pt, pages)
    }

    /// Maps `count` zero-filled pages at `start`.
    pub fn map_anonymous(&mut self, start: Page, count: Pages, flags: PageFlags) -> MemResult<()> {
        self.map_with(start, count, flags, || HostRegion::anonymous(count))
    }

    /// Maps `count` pages of `file` starting at byte `offset`, copy-on-write.
    ///
    /// This may block on host I/O while the mapping is set up; translation never does.
    pub fn map_file(
        &mut self,
        start: Page,
        count: Pages,
        file: &File,
        offset: u64,
        flags: PageFlags,
    ) -> MemResult<()> {
        self.map_with(start, count, flags, || HostRegion::file(file, offset, count))
    }

    /// Installs fresh entries for `[start, start + count)` backed by the region from `acquire`.
    ///
    /// Present pages in the range are replaced and released as if unmapped. With
    /// [`PageFlags::GROWSDOWN`], the page just below `start` becomes a guard page. Nothing is
    /// touched unless both the entry budget and the host allow the whole request.
    fn map_with(
        &mut self,
        start: Page,
        count: Pages,
        flags: PageFlags,
        acquire: impl FnOnce() -> io::Result<HostRegion>,
    ) -> MemResult<()> {
        if count == 0 {
            return Ok(());
        }
        let range = checked_range(start, count)?;
        let guard = if flags.contains(PageFlags::GROWSDOWN) {
            start.checked_sub(1)
        } else {
            None
        };

        let mut needed = self.pt.absent_count(range.clone());
        if guard.is_some_and(|page| !self.pt.is_present(page)) {
            needed += 1;
        }
        self.reserve(needed)?;

        let region = acquire().map_err(MemError::MapFailed)?;
        for (page, frame) in range.clone().zip(region.into_frames()) {
            if let Some(old) = self.pt.insert(page, PageTableEntry::new(frame, flags)) {
                tracing::warn!(page, old_flags = ?old.flags(), "map replaced a present page");
            }
        }
        if let Some(page) = guard {
            if let Some(old) = self.pt.insert(page, PageTableEntry::guard()) {
                if old.flags() != PageFlags::GUARD {
                    tracing::warn!(
                        page,
                        old_flags = ?old.flags(),
                        "guard page replaced a present page"
                    );
                }
            }
        }

        self.tlb.flush();
        tracing::debug!(start, count, ?flags, ?guard, "map");
        Ok(())
    }

    fn reserve(&self, needed: usize) -> MemResult<()> {
        let available = self.max_entries.saturating_sub(self.pt.len());
        if needed > available {
            return Err(MemError::OutOfMemoryForMetadata { needed, available });
        }
        Ok(())
    }

    /// Unmaps `[start, start + count)`. Fails without modifying anything if any page is absent.
    pub fn unmap(&mut self, start: Page, count: Pages) -> MemResult<()> {
        let range = self.present_range(start, count)?;
        self.pt.remove_range(range);
        self.tlb.flush();
        tracing::debug!(start, count, "unmap");
        Ok(())
    }

    /// Unmaps whatever is present in `[start, start + count)`, skipping holes.
    ///
    /// Never fails: absent pages are skipped and the range is clipped to the address space. The
    /// `Result` keeps the signature in line with [`Mem::unmap`].
    pub fn unmap_force(&mut self, start: Page, count: Pages) -> MemResult<()> {
        let end = start.saturating_add(count).min(PAGE_COUNT);
        let removed = if start < end {
            self.pt.remove_range(start..end)
        } else {
            0
        };
        self.tlb.flush();
        tracing::debug!(start, count, removed, "unmap (force)");
        Ok(())
    }

    /// Replaces the flags of every page in `[start, start + count)`.
    ///
    /// Guard and grows-down markers are replaced too; a guard page stays inaccessible regardless
    /// because it has no backing frame.
    pub fn set_flags(&mut self, start: Page, count: Pages, flags: PageFlags) -> MemResult<()> {
        let range = self.present_range(start, count)?;
        for (_, entry) in self.pt.range_mut(range) {
            entry.set_flags(flags);
        }
        self.tlb.flush();
        tracing::debug!(start, count, ?flags, "protect");
        Ok(())
    }

    /// Makes `[start, start + count)` of `dst` refer to the same frames as this address space.
    ///
    /// Every page in the range must be present here; pages already present in `dst` are replaced.
    /// The frames stay alive until both sides have released them.
    pub fn share_pages(&self, dst: &mut Mem, start: Page, count: Pages) -> MemResult<()> {
        let range = self.present_range(start, count)?;
        dst.reserve(dst.pt.absent_count(range.clone()))?;
        for (page, entry) in self.pt.share(range) {
            dst.pt.insert(page, entry);
        }
        dst.tlb.flush();
        tracing::debug!(start, count, "share");
        Ok(())
    }

    fn present_range(&self, start: Page, count: Pages) -> MemResult<Range<Page>> {
        let range = checked_range(start, count)?;
        match self.pt.first_absent(range.clone()) {
            Some(page) => Err(MemError::NotMapped { page }),
            None => Ok(range),
        }
    }

    /// Host pointer for `addr`, or why the access cannot proceed.
    #[inline]
    pub fn translate(
        &mut self,
        addr: Addr,
        access: AccessType,
    ) -> Result<*mut u8, TranslateFault> {
        self.tlb.translate(&self.pt, addr, access)
    }

    /// Copies guest memory at `addr` into `buf`, page by page.
    ///
    /// On failure, bytes before the faulting address have already been copied.
    pub fn read(&mut self, addr: Addr, buf: &mut [u8]) -> Result<(), GuestAccessError> {
        let mut done = 0;
        while done < buf.len() {
            let cur = addr.wrapping_add(done as Addr);
            let chunk = (PAGE_SIZE - page_offset(cur)).min(buf.len() - done);
            let src = self
                .translate(cur, AccessType::Read)
                .map_err(|fault| GuestAccessError { addr: cur, fault })?;
            // SAFETY: `src` points into the frame backing `cur`, which `self` keeps mapped, and
            // `chunk` bytes from `cur` stay inside that page. `buf` cannot alias guest memory
            // handed out by this address space while `self` is mutably borrowed.
            unsafe { core::ptr::copy_nonoverlapping(src, buf[done..].as_mut_ptr(), chunk) };
            done += chunk;
        }
        Ok(())
    }

    /// Copies `buf` into guest memory at `addr`, page by page.
    ///
    /// On failure, bytes before the faulting address have already been written.
    pub fn write(&mut self, addr: Addr, buf: &[u8]) -> Result<(), GuestAccessError> {
        let mut done = 0;
        while done < buf.len() {
            let cur = addr.wrapping_add(done as Addr);
            let chunk = (PAGE_SIZE - page_offset(cur)).min(buf.len() - done);
            let dst = self
                .translate(cur, AccessType::Write)
                .map_err(|fault| GuestAccessError { addr: cur, fault })?;
            // SAFETY: as in `read`, with the page known to be writable.
            unsafe { core::ptr::copy_nonoverlapping(buf[done..].as_ptr(), dst, chunk) };
            done += chunk;
        }
        Ok(())
    }

    /// Most recently write-resolved page, for self-modifying code detection.
    #[inline]
    pub fn dirty_page(&self) -> Option<Page> {
        self.tlb.dirty_page()
    }

    /// Translation-cache counters when the `stats` feature is enabled.
    #[inline]
    pub fn tlb_stats(&self) -> Option<TlbStats> {
        self.tlb.stats()
    }

    /// Logs every present page at `trace` level and returns the same listing.
    pub fn dump(&self) -> Vec<PageInfo> {
        let pages: Vec<PageInfo> = self
            .pt
            .iter()
            .map(|(page, entry)| PageInfo {
                page,
                host: entry.host_ptr().map(|ptr| ptr as usize),
                refcount: entry.refcount(),
                flags: entry.flags(),
            })
            .collect();
        for info in &pages {
            tracing::trace!("{info}");
        }
        pages
    }
}

#[inline]
fn checked_range(start: Page, count: Pages) -> MemResult<Range<Page>> {
    page_range(start, count).ok_or(MemError::OutOfRange { start, count })
}

/// One line of [`Mem::dump`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub page: Page,
    /// Host address of the backing page, `None` for guard pages.
    pub host: Option<usize>,
    pub refcount: usize,
    pub flags: PageFlags,
}

impl fmt::Display for PageInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page 0x{:05x} data ", self.page)?;
        match self.host {
            Some(host) => write!(f, "0x{host:x}")?,
            None => f.write_str("none")?,
        }
        write!(f, " refcount {} flags {:?}", self.refcount, self.flags)
    }
}
