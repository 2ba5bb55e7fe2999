use bitflags::bitflags;

bitflags! {
    /// Per-page access flags stored in the page table.
    #[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct PageFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        /// Reserved sentinel below a `GROWSDOWN` region. Never has backing memory.
        const GUARD = 1 << 2;
        /// The region may grow toward lower addresses (stacks).
        const GROWSDOWN = 1 << 3;
    }
}

impl PageFlags {
    /// Whether a write may go through. Reads only need the page to be backed.
    #[inline]
    pub fn writable(self) -> bool {
        self.contains(Self::WRITE)
    }
}
