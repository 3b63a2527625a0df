//! The common x86 page-table-entry bit layout, shared by all three walkers.
//!
//! Read as raw bytes via `zerocopy`, never assumed to match host struct
//! layout, per the design note in §9 of the spec.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// A single page-table descriptor. The same bit layout applies to legacy,
/// PAE, and IA-32e entries; only the width (4 vs. 8 bytes) and the number of
/// levels differ between them.
#[repr(transparent)]
#[derive(Default, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct PageTableEntry(pub u64);

impl PageTableEntry {
    /// The present (P) bit.
    pub fn present(self) -> bool {
        self.0 & 1 != 0
    }

    /// The read/write (R/W) bit.
    pub fn write(self) -> bool {
        (self.0 >> 1) & 1 != 0
    }

    /// The user/supervisor (U/S) bit.
    pub fn supervisor(self) -> bool {
        (self.0 >> 2) & 1 != 0
    }

    /// The page size (PS) bit: large page at this level.
    pub fn large(self) -> bool {
        (self.0 >> 7) & 1 != 0
    }

    /// The PAT bit for a 4 KiB leaf (bit 7) or a large-page leaf (bit 12).
    ///
    /// Per the spec's tie-break rule, PAT is ignored for translation — this
    /// accessor exists only for diagnostics, never consulted by a walker to
    /// compute an address.
    pub fn pat_large(self) -> bool {
        (self.0 >> 12) & 1 != 0
    }

    /// The page frame number: bits `[M-1:12]` for a non-leaf or 4 KiB leaf
    /// entry, masked to 40 bits (the widest PFN this crate's architectures
    /// use).
    pub fn pfn(self) -> u64 {
        const MASK: u64 = (1u64 << 40) - 1;
        (self.0 >> 12) & MASK
    }

    /// The physical base address of a large page, i.e. the PFN with the
    /// low-order bits that are actually part of the in-page offset for a
    /// large leaf masked away by the caller.
    pub fn large_pfn_base(self, low_bits_to_clear: u32) -> u64 {
        (self.pfn() << 12) & !((1u64 << low_bits_to_clear) - 1)
    }

    /// Whether any bit reserved for the given leaf-ness is set. A conservative
    /// check covering the high "no-execute" and reserved bits above bit 51;
    /// this crate does not model NX since translation never needs it.
    pub fn reserved_bits_set(self, leaf: bool) -> bool {
        // Bits 52..62 are reserved on every mode this crate supports, whether
        // leaf or not; bit 63 (NX) is meaningful but irrelevant to address
        // computation so it is not treated as reserved here.
        let _ = leaf;
        (self.0 >> 52) & 0x3FF != 0
    }
}

impl std::fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageTableEntry")
            .field("present", &self.present())
            .field("write", &self.write())
            .field("supervisor", &self.supervisor())
            .field("large", &self.large())
            .field("pfn", &format_args!("0x{:x}", self.pfn()))
            .finish()
    }
}
