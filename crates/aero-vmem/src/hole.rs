use crate::page::{Page, Pages, PAGE_COUNT};
use crate::pt::PageTable;

/// Default exclusive floor of the hole search (keeps low memory free for the program break).
pub const DEFAULT_HOLE_LOW: Page = 0x40000;
/// Default inclusive ceiling of the hole search (just below the default stack).
pub const DEFAULT_HOLE_HIGH: Page = 0xf7ffd;

/// Picks placement for mappings whose address the guest left up to us.
///
/// The search walks down from `high` (inclusive) toward `low` (exclusive). The first free run,
/// counted from the top, that can hold the request wins, and the request is placed at the *top* of
/// that run. Larger runs further down are never considered, and neither is a larger window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressSpaceAllocator {
    low: Page,
    high: Page,
}

impl Default for AddressSpaceAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_HOLE_LOW, DEFAULT_HOLE_HIGH)
    }
}

impl AddressSpaceAllocator {
    #[track_caller]
    pub fn new(low: Page, high: Page) -> Self {
        assert!(
            low < high && high < PAGE_COUNT,
            "invalid hole search bounds: low=0x{low:x} high=0x{high:x}"
        );
        Self { low, high }
    }

    #[inline]
    pub fn low(&self) -> Page {
        self.low
    }

    #[inline]
    pub fn high(&self) -> Page {
        self.high
    }

    /// Lowest page of the chosen window, or `None` if no free run of `size` pages exists.
    ///
    /// Only occupancy matters: guard pages block placement like any other present page.
    pub fn allocate(&self, pt: &PageTable, size: Pages) -> Option<Page> {
        if size == 0 {
            return None;
        }

        // `top` is the highest page of the free run currently being measured. Instead of probing
        // every page, jump between the present pages bounding each run.
        let mut top = self.high;
        for used in pt.present_desc(self.low + 1..=self.high) {
            if let Some(start) = window(used + 1, top, size) {
                return Some(start);
            }
            // `used > low`, so this cannot underflow.
            top = used - 1;
        }
        window(self.low + 1, top, size)
    }
}

/// Topmost `size`-page window of the free run `[bottom, top]`.
#[inline]
fn window(bottom: Page, top: Page, size: Pages) -> Option<Page> {
    if top < bottom || top - bottom + 1 < size {
        return None;
    }
    Some(top + 1 - size)
}
