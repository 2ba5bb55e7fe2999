use crate::page::PAGE_SIZE;
use std::sync::Once;

static PAGE_SIZE_CHECK: Once = Once::new();

/// Host memory page size as reported by `sysconf(_SC_PAGESIZE)`.
pub fn host_page_size() -> usize {
    // SAFETY: `sysconf` has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size).unwrap_or(0)
}

/// Checks that guest pages can be backed one-to-one by host pages.
///
/// Every guest page is its own slice of an `mmap` region, so a host page size other than
/// [`PAGE_SIZE`] cannot work at all. This aborts the process instead of returning an error. Safe to
/// call any number of times; the check runs once.
pub fn init() {
    PAGE_SIZE_CHECK.call_once(|| {
        let host = host_page_size();
        if host != PAGE_SIZE {
            tracing::error!(host, expected = PAGE_SIZE, "unsupported host page size");
            std::process::abort();
        }
    });
}
