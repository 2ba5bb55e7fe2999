use super::*;

use std::sync::Arc;

const RW: PageFlags = PageFlags::READ.union(PageFlags::WRITE);

fn read_u8(ptr: *mut u8) -> u8 {
    // SAFETY: tests only pass pointers returned by a successful `translate` on a live mapping.
    unsafe { ptr.read() }
}

fn write_u8(ptr: *mut u8, value: u8) {
    // SAFETY: as above, for a write translation.
    unsafe { ptr.write(value) }
}

#[test]
fn allocate_map_translate_unmap_round() {
    let mut mem = Mem::new();

    let start = mem.allocate(4).unwrap();
    assert_eq!(start, 0xf7ffa);

    mem.map_anonymous(start, 4, RW).unwrap();
    let addr = page_addr(start);
    let ptr = mem.translate(addr, AccessType::Write).unwrap();
    assert_eq!(read_u8(ptr), 0);
    write_u8(ptr, 0x5a);
    assert_eq!(read_u8(mem.translate(addr, AccessType::Read).unwrap()), 0x5a);

    mem.unmap(start, 4).unwrap();
    assert_eq!(
        mem.translate(addr, AccessType::Read),
        Err(TranslateFault::Unmapped)
    );
    assert!(mem.page_table().is_empty());
}

#[test]
fn reads_resolve_to_backing_offset() {
    let mut mem = Mem::new();
    mem.map_anonymous(0x100, 2, PageFlags::READ).unwrap();
    mem.map_anonymous(0x200, 2, RW).unwrap();

    for page in [0x100, 0x101, 0x200, 0x201] {
        let base = mem.entry(page).unwrap().host_ptr().unwrap();
        for offset in [0usize, 1, 0x7ff, PAGE_SIZE - 1] {
            let addr = page_addr(page) + offset as Addr;
            assert_eq!(
                mem.translate(addr, AccessType::Read),
                Ok(base.wrapping_add(offset))
            );
        }
    }
}

#[test]
fn one_map_call_is_one_contiguous_host_region() {
    let mut mem = Mem::new();
    mem.map_anonymous(0x300, 3, RW).unwrap();
    let first = mem.entry(0x300).unwrap().host_ptr().unwrap();
    for i in 1..3 {
        let host = mem.entry(0x300 + i).unwrap().host_ptr().unwrap();
        assert_eq!(host, first.wrapping_add(i as usize * PAGE_SIZE));
    }
}

#[test]
fn unmapped_after_unmap_even_if_cached() {
    let mut mem = Mem::new();
    mem.map_anonymous(0x500, 3, RW).unwrap();
    for page in 0x500..0x503 {
        mem.translate(page_addr(page), AccessType::Write).unwrap();
    }

    mem.unmap(0x500, 3).unwrap();
    for page in 0x500..0x503 {
        for access in [AccessType::Read, AccessType::Write] {
            assert_eq!(
                mem.translate(page_addr(page) + 0x10, access),
                Err(TranslateFault::Unmapped)
            );
        }
    }
}

#[test]
fn write_to_read_only_page_fails() {
    let mut mem = Mem::new();
    mem.map_anonymous(0x10, 1, PageFlags::READ).unwrap();
    let addr = page_addr(0x10) + 4;

    assert_eq!(
        mem.translate(addr, AccessType::Write),
        Err(TranslateFault::ReadOnly)
    );
    // Still fails once a read has cached the page.
    mem.translate(addr, AccessType::Read).unwrap();
    assert_eq!(
        mem.translate(addr, AccessType::Write),
        Err(TranslateFault::ReadOnly)
    );
}

#[test]
fn protect_revokes_cached_write_access() {
    let mut mem = Mem::new();
    mem.map_anonymous(0x20, 2, RW).unwrap();
    let addr = page_addr(0x21) + 0x80;
    mem.translate(addr, AccessType::Write).unwrap();

    mem.set_flags(0x20, 2, PageFlags::READ).unwrap();
    assert_eq!(
        mem.translate(addr, AccessType::Write),
        Err(TranslateFault::ReadOnly)
    );
    assert!(mem.translate(addr, AccessType::Read).is_ok());

    mem.set_flags(0x20, 2, RW).unwrap();
    assert!(mem.translate(addr, AccessType::Write).is_ok());
}

#[test]
fn protect_none_still_reads_but_refuses_writes() {
    let mut mem = Mem::new();
    mem.map_anonymous(0x30, 1, RW).unwrap();
    let base = mem.translate(page_addr(0x30), AccessType::Write).unwrap();

    mem.set_flags(0x30, 1, PageFlags::empty()).unwrap();
    assert_eq!(
        mem.translate(page_addr(0x30), AccessType::Write),
        Err(TranslateFault::ReadOnly)
    );
    assert_eq!(mem.translate(page_addr(0x30), AccessType::Read), Ok(base));
    assert!(mem.entry(0x30).is_some());
}

#[test]
fn write_to_flagless_mapping_is_read_only() {
    let mut mem = Mem::new();
    mem.map_anonymous(0x30, 1, PageFlags::empty()).unwrap();

    assert_eq!(
        mem.translate(page_addr(0x30), AccessType::Write),
        Err(TranslateFault::ReadOnly)
    );
    let ptr = mem.translate(page_addr(0x30), AccessType::Read).unwrap();
    assert_eq!(read_u8(ptr), 0);
}

#[test]
fn remap_releases_previous_backing() {
    let mut mem = Mem::new();
    mem.map_anonymous(0x40, 2, RW).unwrap();
    let old = Arc::downgrade(mem.entry(0x40).unwrap().frame().unwrap().region());
    let ptr = mem.translate(page_addr(0x40), AccessType::Write).unwrap();
    write_u8(ptr, 0xff);

    // Only page 0x40 is replaced; 0x41 still holds the old region.
    mem.map_anonymous(0x40, 1, RW).unwrap();
    assert!(old.upgrade().is_some());
    let ptr = mem.translate(page_addr(0x40), AccessType::Read).unwrap();
    assert_eq!(read_u8(ptr), 0, "replacement page must be fresh");

    mem.map_anonymous(0x41, 1, RW).unwrap();
    assert!(old.upgrade().is_none(), "old host region leaked");
    assert_eq!(mem.page_table().len(), 2);
}

#[test]
fn unmap_releases_backing_when_last_page_goes() {
    let mut mem = Mem::new();
    mem.map_anonymous(0x60, 2, RW).unwrap();
    let region = Arc::downgrade(mem.entry(0x60).unwrap().frame().unwrap().region());

    mem.unmap(0x60, 1).unwrap();
    assert!(region.upgrade().is_some());
    mem.unmap(0x61, 1).unwrap();
    assert!(region.upgrade().is_none());
}

#[test]
fn grows_down_installs_guard_below() {
    let mut mem = Mem::new();
    let flags = RW | PageFlags::GROWSDOWN;
    mem.map_anonymous(0xbfff0, 0x10, flags).unwrap();

    let guard = mem.entry(0xbffef).unwrap();
    assert_eq!(guard.flags(), PageFlags::GUARD);
    assert!(guard.host_ptr().is_none());
    assert_eq!(mem.page_table().len(), 0x11);

    for access in [AccessType::Read, AccessType::Write] {
        assert_eq!(
            mem.translate(page_addr(0xbffef) + 0x123, access),
            Err(TranslateFault::Unmapped)
        );
    }
    assert!(mem.translate(page_addr(0xbfff0), AccessType::Write).is_ok());
}

#[test]
fn guard_page_stays_inaccessible_after_protect() {
    let mut mem = Mem::new();
    mem.map_anonymous(0x81, 1, RW | PageFlags::GROWSDOWN).unwrap();

    mem.set_flags(0x80, 1, RW).unwrap();
    assert_eq!(mem.entry(0x80).unwrap().flags(), RW);
    assert_eq!(
        mem.translate(page_addr(0x80), AccessType::Read),
        Err(TranslateFault::Unmapped)
    );
}

#[test]
fn grows_down_at_page_zero_has_no_guard() {
    let mut mem = Mem::new();
    mem.map_anonymous(0, 1, RW | PageFlags::GROWSDOWN).unwrap();
    assert_eq!(mem.page_table().len(), 1);
}

#[test]
fn unmap_with_hole_changes_nothing() {
    let mut mem = Mem::new();
    mem.map_anonymous(0x70, 2, RW).unwrap();
    mem.map_anonymous(0x73, 1, RW).unwrap();

    let err = mem.unmap(0x70, 4).unwrap_err();
    assert!(matches!(err, MemError::NotMapped { page: 0x72 }));
    assert_eq!(err.errno(), errno::ENOMEM);
    assert_eq!(mem.page_table().len(), 3);
    assert!(mem.translate(page_addr(0x70), AccessType::Read).is_ok());

    let err = mem.set_flags(0x70, 4, PageFlags::READ).unwrap_err();
    assert!(matches!(err, MemError::NotMapped { page: 0x72 }));
    assert_eq!(mem.entry(0x70).unwrap().flags(), RW);
}

#[test]
fn unmap_force_skips_holes() {
    let mut mem = Mem::new();
    mem.map_anonymous(0x70, 2, RW).unwrap();
    mem.map_anonymous(0x73, 1, RW).unwrap();
    mem.translate(page_addr(0x73), AccessType::Read).unwrap();

    mem.unmap_force(0x6f, 6).unwrap();
    assert!(mem.page_table().is_empty());
    assert_eq!(
        mem.translate(page_addr(0x73), AccessType::Read),
        Err(TranslateFault::Unmapped)
    );

    // Ranges running off the end of the address space are clipped.
    mem.unmap_force(PAGE_COUNT - 1, 10).unwrap();
}

#[test]
fn entry_budget_is_all_or_nothing() {
    let mut mem = Mem::with_options(MemOptions {
        max_entries: 4,
        ..MemOptions::default()
    });
    mem.map_anonymous(0x10, 2, RW).unwrap();

    let err = mem
        .map_anonymous(0x20, 2, RW | PageFlags::GROWSDOWN)
        .unwrap_err();
    assert!(matches!(
        err,
        MemError::OutOfMemoryForMetadata {
            needed: 3,
            available: 2
        }
    ));
    assert_eq!(mem.page_table().len(), 2);
    assert!(mem.entry(0x20).is_none());

    // Replacing present pages needs no new entries.
    mem.map_anonymous(0x10, 2, PageFlags::READ).unwrap();
    mem.map_anonymous(0x20, 2, RW).unwrap();
    assert_eq!(mem.page_table().len(), 4);
}

#[test]
fn zero_page_map_is_a_no_op() {
    let mut mem = Mem::new();
    mem.map_anonymous(0x10, 0, RW | PageFlags::GROWSDOWN).unwrap();
    assert!(mem.page_table().is_empty());
}

#[test]
fn ranges_past_the_address_space_are_rejected() {
    let mut mem = Mem::new();
    let err = mem.map_anonymous(PAGE_COUNT - 1, 2, RW).unwrap_err();
    assert!(matches!(err, MemError::OutOfRange { .. }));
    assert!(mem.page_table().is_empty());

    assert!(matches!(
        mem.unmap(PAGE_COUNT, 1),
        Err(MemError::OutOfRange { .. })
    ));
}

#[test]
fn allocate_skips_existing_mappings() {
    let mut mem = Mem::new();
    let first = mem.allocate(4).unwrap();
    mem.map_anonymous(first, 4, RW).unwrap();

    let second = mem.allocate(4).unwrap();
    assert_eq!(second, first - 4);
    mem.map_anonymous(second, 4, RW).unwrap();

    mem.unmap(first, 4).unwrap();
    assert_eq!(mem.allocate(4), Some(first));
    // Too big for the freed window at the top, so it goes below `second`.
    assert_eq!(mem.allocate(5), Some(second - 5));
}

#[test]
fn dirty_page_tracks_writable_resolutions() {
    let mut mem = Mem::new();
    assert_eq!(mem.dirty_page(), None);
    mem.map_anonymous(0x90, 1, PageFlags::READ).unwrap();
    mem.map_anonymous(0x91, 1, RW).unwrap();

    mem.translate(page_addr(0x90), AccessType::Read).unwrap();
    assert_eq!(mem.dirty_page(), None);
    mem.translate(page_addr(0x91), AccessType::Write).unwrap();
    assert_eq!(mem.dirty_page(), Some(0x91));
}

#[test]
fn address_spaces_do_not_share_dirty_state() {
    let mut a = Mem::new();
    let b = Mem::new();
    a.map_anonymous(0x91, 1, RW).unwrap();
    a.translate(page_addr(0x91), AccessType::Write).unwrap();
    assert_eq!(a.dirty_page(), Some(0x91));
    assert_eq!(b.dirty_page(), None);
}

#[test]
fn dump_lists_present_pages_in_order() {
    let mut mem = Mem::new();
    mem.map_anonymous(0x51, 2, RW | PageFlags::GROWSDOWN).unwrap();

    let dump = mem.dump();
    let pages: Vec<_> = dump.iter().map(|info| info.page).collect();
    assert_eq!(pages, vec![0x50, 0x51, 0x52]);

    assert_eq!(dump[0].host, None);
    assert_eq!(dump[0].flags, PageFlags::GUARD);
    assert_eq!(
        dump[1].host,
        mem.entry(0x51).unwrap().host_ptr().map(|p| p as usize)
    );
    assert_eq!(dump[1].refcount, 1);
    assert_eq!(dump[2].flags, RW | PageFlags::GROWSDOWN);

    let line = dump[0].to_string();
    assert!(line.starts_with("page 0x00050 data none"), "{line}");
}

#[test]
fn guest_copies_cross_pages() {
    let mut mem = Mem::new();
    mem.map_anonymous(0xa0, 2, RW).unwrap();

    let addr = page_addr(0xa1) - 3;
    mem.write(addr, b"hello!").unwrap();
    let mut buf = [0u8; 6];
    mem.read(addr, &mut buf).unwrap();
    assert_eq!(&buf, b"hello!");

    let tail = mem.entry(0xa1).unwrap().host_ptr().unwrap();
    assert_eq!(read_u8(tail), b'l');
}

#[test]
fn guest_copy_reports_faulting_address() {
    let mut mem = Mem::new();
    mem.map_anonymous(0xb0, 1, RW).unwrap();
    mem.map_anonymous(0xb1, 1, PageFlags::READ).unwrap();

    let addr = page_addr(0xb1) - 2;
    let err = mem.write(addr, &[1, 2, 3, 4]).unwrap_err();
    assert_eq!(
        err,
        GuestAccessError {
            addr: page_addr(0xb1),
            fault: TranslateFault::ReadOnly
        }
    );
    // The part before the fault landed.
    let mut buf = [0u8; 2];
    mem.read(addr, &mut buf).unwrap();
    assert_eq!(buf, [1, 2]);

    let mut buf = [0u8; 8];
    let err = mem.read(page_addr(0xb2) - 4, &mut buf).unwrap_err();
    assert_eq!(err.addr, page_addr(0xb2));
    assert_eq!(err.fault, TranslateFault::Unmapped);
}

#[cfg(feature = "stats")]
#[test]
fn stats_count_hits_misses_and_flushes() {
    let mut mem = Mem::new();
    mem.map_anonymous(0x10, 1, RW).unwrap();
    let flushes = mem.tlb_stats().unwrap().flushes;

    mem.translate(page_addr(0x10), AccessType::Read).unwrap();
    mem.translate(page_addr(0x10) + 1, AccessType::Write).unwrap();
    let stats = mem.tlb_stats().unwrap();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);

    // Failed precondition: no flush.
    mem.unmap(0x11, 1).unwrap_err();
    assert_eq!(mem.tlb_stats().unwrap().flushes, flushes);
}

#[cfg(not(feature = "stats"))]
#[test]
fn stats_are_off_by_default() {
    assert_eq!(Mem::new().tlb_stats(), None);
}
