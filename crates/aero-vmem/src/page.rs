/// Guest virtual address.
pub type Addr = u32;
/// Guest page number (`addr >> PAGE_BITS`).
pub type Page = u32;
/// A count of guest pages.
pub type Pages = u32;

pub const PAGE_BITS: u32 = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_BITS;
/// Number of pages in the 32-bit guest address space.
pub const PAGE_COUNT: Pages = 1 << (Addr::BITS - PAGE_BITS);

#[inline]
pub const fn page(addr: Addr) -> Page {
    addr >> PAGE_BITS
}

#[inline]
pub const fn page_addr(page: Page) -> Addr {
    page << PAGE_BITS
}

/// Byte offset of `addr` within its page.
#[inline]
pub const fn page_offset(addr: Addr) -> usize {
    (addr & (PAGE_SIZE as Addr - 1)) as usize
}

/// Returns the page range `[start, start + count)` if it lies inside the guest address space.
#[inline]
pub(crate) fn page_range(start: Page, count: Pages) -> Option<core::ops::Range<Page>> {
    let end = start.checked_add(count)?;
    (end <= PAGE_COUNT).then_some(start..end)
}
