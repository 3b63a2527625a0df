//! Output types produced by an address-translation walk.

use crate::addr::{Pa, Va};

/// The size of a leaf mapping produced by a page-table walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PageSize {
    /// 1 KiB (ARM tiny page).
    Size1Kb,
    /// 4 KiB (the common case on every supported architecture).
    Size4Kb,
    /// 64 KiB (ARM large page).
    Size64Kb,
    /// 1 MiB (ARM section).
    Size1Mb,
    /// 2 MiB (x86 PAE/IA-32e large page).
    Size2Mb,
    /// 4 MiB (x86 legacy large page).
    Size4Mb,
    /// 16 MiB (ARM supersection).
    Size16Mb,
    /// 1 GiB (x86-64 huge page).
    Size1Gb,
}

impl PageSize {
    /// Returns the size in bytes.
    pub const fn bytes(self) -> u64 {
        match self {
            Self::Size1Kb => 1 << 10,
            Self::Size4Kb => 4 << 10,
            Self::Size64Kb => 64 << 10,
            Self::Size1Mb => 1 << 20,
            Self::Size2Mb => 2 << 20,
            Self::Size4Mb => 4 << 20,
            Self::Size16Mb => 16 << 20,
            Self::Size1Gb => 1 << 30,
        }
    }

    /// Returns the mask that isolates the in-page offset.
    pub const fn offset_mask(self) -> u64 {
        self.bytes() - 1
    }
}

/// A single level's intermediate descriptor, kept for diagnostics even when
/// the walk ultimately fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelEntry {
    /// The physical address at which the descriptor was read.
    pub address: Pa,
    /// The raw value of the descriptor.
    pub value: u64,
}

/// The result of walking a page table for a single virtual address.
///
/// Walkers must fill in every intermediate level they actually consulted,
/// even on failure, so callers can diagnose where the walk stopped.
#[derive(Debug, Clone)]
pub struct PageInfo {
    /// The virtual address that was translated.
    pub vaddr: Va,
    /// The directory table base used for the translation.
    pub dtb: Pa,
    /// The resulting physical address, if the walk succeeded.
    pub paddr: Pa,
    /// The size of the leaf mapping.
    pub page_size: PageSize,
    /// Intermediate levels, ordered from the root of the table down to the
    /// leaf. Index 0 is `l1`, index 3 is `l4`; architectures with fewer
    /// levels leave the trailing entries `None`.
    pub levels: [Option<LevelEntry>; 4],
}

impl PageInfo {
    /// The first (topmost) level consulted, e.g. PML4E on IA-32e, PDE on
    /// legacy 32-bit.
    pub fn l1(&self) -> Option<LevelEntry> {
        self.levels[0]
    }

    /// The second level consulted.
    pub fn l2(&self) -> Option<LevelEntry> {
        self.levels[1]
    }

    /// The third level consulted.
    pub fn l3(&self) -> Option<LevelEntry> {
        self.levels[2]
    }

    /// The fourth (leaf) level consulted.
    pub fn l4(&self) -> Option<LevelEntry> {
        self.levels[3]
    }
}
