//! Host memory backing guest pages.
//!
//! A [`HostRegion`] is one host mapping covering some number of guest pages. Once handed to the
//! page table it is split into per-page [`PageFrame`]s, each holding an `Arc` on the region, so the
//! host mapping is unmapped exactly when the last page that uses it is released.

use crate::page::{Pages, PAGE_SIZE};
use memmap2::{MmapMut, MmapOptions};
use std::fs::File;
use std::io;
use std::ptr::NonNull;
use std::sync::Arc;

pub struct HostRegion {
    map: MmapMut,
    base: NonNull<u8>,
    pages: Pages,
}

// SAFETY: `base` points into `map`, which is owned by the region and lives as long as it does.
// The region is plain memory; callers synchronise guest accesses the same way they would for any
// shared guest RAM.
unsafe impl Send for HostRegion {}
// SAFETY: see above. Nothing in `HostRegion` itself is mutated through `&self`.
unsafe impl Sync for HostRegion {}

impl HostRegion {
    /// Zero-filled private memory for `pages` guest pages.
    pub fn anonymous(pages: Pages) -> io::Result<Self> {
        let map = MmapOptions::new().len(region_len(pages)?).map_anon()?;
        Ok(Self::from_map(map, pages))
    }

    /// Private copy-on-write view of `file` starting at byte `offset`.
    ///
    /// Guest writes stay local to the mapping and never reach the file. `offset` must be page
    /// aligned, as for `mmap(2)`.
    pub fn file(file: &File, offset: u64, pages: Pages) -> io::Result<Self> {
        let len = region_len(pages)?;
        // memmap2 would quietly round an unaligned offset down and hand back a pointer into the
        // middle of a host page; frames must start on a page boundary.
        if offset % PAGE_SIZE as u64 != 0 {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        // SAFETY: the mapping is private (`MAP_PRIVATE`), so modifications of the file by other
        // processes are the only way the contents can change underneath us. Guest code observing
        // such changes is acceptable and matches `mmap(2)` semantics for the guest.
        let map = unsafe { MmapOptions::new().offset(offset).len(len).map_copy(file)? };
        Ok(Self::from_map(map, pages))
    }

    fn from_map(mut map: MmapMut, pages: Pages) -> Self {
        let base = NonNull::from(&mut map[..]).cast::<u8>();
        Self { map, base, pages }
    }

    #[inline]
    pub fn pages(&self) -> Pages {
        self.pages
    }

    /// Host address of the first byte of the region.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Splits the region into one frame per page, in increasing address order.
    pub fn into_frames(self) -> impl Iterator<Item = Arc<PageFrame>> {
        let pages = self.pages;
        let region = Arc::new(self);
        (0..pages).map(move |index| {
            Arc::new(PageFrame {
                region: Arc::clone(&region),
                index,
            })
        })
    }
}

impl core::fmt::Debug for HostRegion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HostRegion")
            .field("base", &self.base)
            .field("pages", &self.pages)
            .finish()
    }
}

fn region_len(pages: Pages) -> io::Result<usize> {
    (pages as usize)
        .checked_mul(PAGE_SIZE)
        .filter(|&len| len != 0)
        .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))
}

/// One page of a [`HostRegion`].
///
/// The page table's refcount of a page is the strong count of its `Arc<PageFrame>`.
#[derive(Debug)]
pub struct PageFrame {
    region: Arc<HostRegion>,
    index: Pages,
}

impl PageFrame {
    /// Host address of the first byte of this page.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        // `index < region.pages`, so the offset stays inside the mapping.
        self.region
            .as_ptr()
            .wrapping_add(self.index as usize * PAGE_SIZE)
    }

    #[inline]
    pub fn region(&self) -> &Arc<HostRegion> {
        &self.region
    }

    /// Index of this page within its region.
    #[inline]
    pub fn index(&self) -> Pages {
        self.index
    }
}
