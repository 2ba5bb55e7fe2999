use crate::backing::PageFrame;
use crate::flags::PageFlags;
use crate::page::Page;
use std::collections::BTreeMap;
use std::ops::{Range, RangeInclusive};
use std::sync::Arc;

/// One present page.
///
/// Cloning an entry shares its frame (refcount + 1); dropping the last clone releases the frame,
/// and with it the host mapping once every frame of that mapping is gone.
#[derive(Debug, Clone)]
pub struct PageTableEntry {
    frame: Option<Arc<PageFrame>>,
    flags: PageFlags,
}

impl PageTableEntry {
    pub(crate) fn new(frame: Arc<PageFrame>, flags: PageFlags) -> Self {
        Self {
            frame: Some(frame),
            flags,
        }
    }

    /// Entry marking the page below a `GROWSDOWN` region. It has no backing memory.
    pub(crate) fn guard() -> Self {
        Self {
            frame: None,
            flags: PageFlags::GUARD,
        }
    }

    #[inline]
    pub fn flags(&self) -> PageFlags {
        self.flags
    }

    #[inline]
    pub(crate) fn set_flags(&mut self, flags: PageFlags) {
        self.flags = flags;
    }

    /// Backing frame, `None` for guard entries.
    #[inline]
    pub fn frame(&self) -> Option<&Arc<PageFrame>> {
        self.frame.as_ref()
    }

    /// Host address of the page, `None` for guard entries.
    #[inline]
    pub fn host_ptr(&self) -> Option<*mut u8> {
        self.frame.as_ref().map(|frame| frame.as_ptr())
    }

    /// Number of page-table slots (in any address space) sharing this page's frame.
    pub fn refcount(&self) -> usize {
        self.frame.as_ref().map_or(1, Arc::strong_count)
    }
}

/// Sparse page number → entry map.
///
/// A `BTreeMap` keeps memory proportional to what is mapped and iterates in page order, which both
/// the hole search and `dump` rely on.
#[derive(Debug, Default)]
pub struct PageTable {
    entries: BTreeMap<Page, PageTableEntry>,
}

impl PageTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get(&self, page: Page) -> Option<&PageTableEntry> {
        self.entries.get(&page)
    }

    #[inline]
    pub fn is_present(&self, page: Page) -> bool {
        self.entries.contains_key(&page)
    }

    /// Number of present entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Present pages in increasing page order.
    pub fn iter(&self) -> impl Iterator<Item = (Page, &PageTableEntry)> {
        self.entries.iter().map(|(&page, entry)| (page, entry))
    }

    /// Present page numbers within `range`, highest first.
    pub(crate) fn present_desc(
        &self,
        range: RangeInclusive<Page>,
    ) -> impl Iterator<Item = Page> + '_ {
        self.entries.range(range).rev().map(|(&page, _)| page)
    }

    /// First absent page in `range`, if any.
    pub(crate) fn first_absent(&self, range: Range<Page>) -> Option<Page> {
        // Walking the present keys is cheaper than probing every page of a large range.
        let mut expected = range.start;
        for (&page, _) in self.entries.range(range.clone()) {
            if page != expected {
                return Some(expected);
            }
            expected += 1;
        }
        (expected < range.end).then_some(expected)
    }

    /// Number of absent pages in `range`.
    pub(crate) fn absent_count(&self, range: Range<Page>) -> usize {
        let span = (range.end - range.start) as usize;
        span - self.entries.range(range).count()
    }

    /// Installs `entry`, returning whatever was there before.
    pub(crate) fn insert(&mut self, page: Page, entry: PageTableEntry) -> Option<PageTableEntry> {
        self.entries.insert(page, entry)
    }

    /// Drops this table's reference to the page.
    pub(crate) fn remove(&mut self, page: Page) -> Option<PageTableEntry> {
        self.entries.remove(&page)
    }

    /// Drops every present entry in `range`, returning how many there were.
    pub(crate) fn remove_range(&mut self, range: Range<Page>) -> usize {
        let pages: Vec<Page> = self.entries.range(range).map(|(&page, _)| page).collect();
        for &page in &pages {
            self.remove(page);
        }
        pages.len()
    }

    /// Mutable entries in `range`, in page order.
    pub(crate) fn range_mut(
        &mut self,
        range: Range<Page>,
    ) -> impl Iterator<Item = (Page, &mut PageTableEntry)> {
        self.entries.range_mut(range).map(|(&page, entry)| (page, entry))
    }

    /// Clones of the entries in `range`, each sharing its frame with this table.
    pub(crate) fn share(&self, range: Range<Page>) -> Vec<(Page, PageTableEntry)> {
        self.entries
            .range(range)
            .map(|(&page, entry)| (page, entry.clone()))
            .collect()
    }
}
