//! ARMv7 short-descriptor page-table walker, per §4.3 of the spec.
//!
//! First-level index is `vaddr >> 20` into a 4096-entry, 16 KiB-aligned L1
//! table. The L1 descriptor's low two bits select one of: fault, a coarse
//! (256-entry, 8-bit-indexed) second-level table, a section/supersection
//! leaf, or a fine (1024-entry, 10-bit-indexed) second-level table. Leaf
//! type within a second-level table is selected by *that table's* low two
//! bits — see [`Open Question #1`](#fine-table-leaf-selection) below.
//!
//! # Fine-table leaf selection
//!
//! The original C implementation this crate's spec was distilled from
//! selects the second-level leaf type for a fine table by re-switching on
//! the *first*-level descriptor's low bits, which always reads as `0b11`
//! (that's how the fine-table branch was reached in the first place) and so
//! can never discriminate tiny/small/large. This walker instead switches on
//! the L2 descriptor's own low bits, which is what actually varies.

use vmi_core::{
    Memory, Pa, PageMode, PageSize, PagingWalker, Va, VmiError,
    page::{LevelEntry, PageInfo},
};

/// The ARMv7 short-descriptor walker.
#[derive(Debug, Default, Clone, Copy)]
pub struct Arm32Walker;

impl PagingWalker for Arm32Walker {
    fn page_mode(&self) -> PageMode {
        PageMode::Arm32
    }

    fn translate(&self, mem: &Memory<'_>, dtb: Pa, vaddr: Va) -> Result<PageInfo, VmiError> {
        let mut levels = [None; 4];

        let l1_index = vaddr.value() >> 20;
        let l1_address = Pa(dtb.value() & !0x3FFF) + l1_index * 4;
        let l1_value = mem.read_u32(l1_address)?;
        levels[0] = Some(LevelEntry {
            address: l1_address,
            value: l1_value as u64,
        });

        match l1_value & 0b11 {
            0b00 => Err(VmiError::PageNotPresent { vaddr, levels }),

            // Coarse second-level table: 256 entries, 8-bit index.
            0b01 => {
                let l2_table_base = (l1_value & 0xFFFF_FC00) as u64;
                let l2_index = (vaddr.value() >> 12) & 0xFF;
                let l2_address = Pa(l2_table_base) + l2_index * 4;
                let l2_value = mem.read_u32(l2_address)?;
                levels[1] = Some(LevelEntry {
                    address: l2_address,
                    value: l2_value as u64,
                });

                coarse_leaf(vaddr, dtb, l2_value, levels)
            }

            // Section or supersection.
            0b10 => {
                if l1_value & (1 << 18) != 0 {
                    tracing::trace!(?vaddr, "ARM walk: supersection leaf");
                    // High-order extended bits [23:20] form PA[39:36] and
                    // must be combined with the descriptor's [31:24] before
                    // the low 24 bits of vaddr are added in.
                    let base_high = (l1_value & 0xFF00_0000) as u64;
                    let ext = ((l1_value >> 20) & 0xF) as u64;
                    let base = base_high | (ext << 32);
                    let paddr = Pa(base | (vaddr.value() & 0x00FF_FFFF));
                    Ok(PageInfo {
                        vaddr,
                        dtb,
                        paddr,
                        page_size: PageSize::Size16Mb,
                        levels,
                    })
                } else {
                    let base = (l1_value & 0xFFF0_0000) as u64;
                    let paddr = Pa(base | (vaddr.value() & 0x000F_FFFF));
                    Ok(PageInfo {
                        vaddr,
                        dtb,
                        paddr,
                        page_size: PageSize::Size1Mb,
                        levels,
                    })
                }
            }

            // Fine second-level table: 1024 entries, 10-bit index.
            0b11 => {
                let l2_table_base = (l1_value & 0xFFFF_F000) as u64;
                let l2_index = (vaddr.value() >> 10) & 0x3FF;
                let l2_address = Pa(l2_table_base) + l2_index * 4;
                let l2_value = mem.read_u32(l2_address)?;
                levels[1] = Some(LevelEntry {
                    address: l2_address,
                    value: l2_value as u64,
                });

                fine_leaf(vaddr, dtb, l2_value, levels)
            }

            _ => unreachable!("2-bit mask"),
        }
    }

    fn enumerate(&self, _mem: &Memory<'_>, _dtb: Pa) -> Result<Vec<(Va, PageSize)>, VmiError> {
        // Not implemented on ARM, per §4.3: "Empty on ARM (not implemented —
        // see §9)".
        Ok(Vec::new())
    }
}

fn coarse_leaf(
    vaddr: Va,
    dtb: Pa,
    l2_value: u32,
    levels: [Option<LevelEntry>; 4],
) -> Result<PageInfo, VmiError> {
    match l2_value & 0b11 {
        0b00 => Err(VmiError::PageNotPresent { vaddr, levels }),
        0b01 => {
            let base = (l2_value & 0xFFFF_0000) as u64;
            let paddr = Pa(base | (vaddr.value() & 0xFFFF));
            Ok(PageInfo {
                vaddr,
                dtb,
                paddr,
                page_size: PageSize::Size64Kb,
                levels,
            })
        }
        // Both 0b10 and 0b11 denote a small page in a coarse table; bit 0
        // only carries the XN (execute-never) attribute here.
        _ => {
            let base = (l2_value & 0xFFFF_F000) as u64;
            let paddr = Pa(base | (vaddr.value() & 0xFFF));
            Ok(PageInfo {
                vaddr,
                dtb,
                paddr,
                page_size: PageSize::Size4Kb,
                levels,
            })
        }
    }
}

fn fine_leaf(
    vaddr: Va,
    dtb: Pa,
    l2_value: u32,
    levels: [Option<LevelEntry>; 4],
) -> Result<PageInfo, VmiError> {
    match l2_value & 0b11 {
        0b00 => Err(VmiError::PageNotPresent { vaddr, levels }),
        0b01 => {
            let base = (l2_value & 0xFFFF_0000) as u64;
            let paddr = Pa(base | (vaddr.value() & 0xFFFF));
            Ok(PageInfo {
                vaddr,
                dtb,
                paddr,
                page_size: PageSize::Size64Kb,
                levels,
            })
        }
        0b10 => {
            let base = (l2_value & 0xFFFF_F000) as u64;
            let paddr = Pa(base | (vaddr.value() & 0xFFF));
            Ok(PageInfo {
                vaddr,
                dtb,
                paddr,
                page_size: PageSize::Size4Kb,
                levels,
            })
        }
        0b11 => {
            let base = (l2_value & 0xFFFF_FC00) as u64;
            let paddr = Pa(base | (vaddr.value() & 0x3FF));
            Ok(PageInfo {
                vaddr,
                dtb,
                paddr,
                page_size: PageSize::Size1Kb,
                levels,
            })
        }
        _ => unreachable!("2-bit mask"),
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, collections::HashMap};

    use vmi_core::{Caches, Driver, ReadOutcome, VcpuRegister};

    use super::*;

    struct FakeDriver {
        pages: RefCell<HashMap<u64, [u8; 4096]>>,
    }

    impl FakeDriver {
        fn new() -> Self {
            Self {
                pages: RefCell::new(HashMap::new()),
            }
        }

        fn write_u32(&self, pa: u64, value: u32) {
            let page_pa = pa & !0xFFF;
            let offset = (pa & 0xFFF) as usize;
            let mut pages = self.pages.borrow_mut();
            let page = pages.entry(page_pa).or_insert([0u8; 4096]);
            page[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        }
    }

    impl Driver for FakeDriver {
        fn read_pa(&self, pa: Pa, len: usize) -> Result<ReadOutcome, VmiError> {
            let page_pa = pa.value() & !0xFFF;
            let pages = self.pages.borrow();
            let page = pages.get(&page_pa).copied().unwrap_or([0u8; 4096]);
            Ok(ReadOutcome {
                data: page[..len].to_vec(),
                short: false,
            })
        }

        fn memsize(&self) -> Result<u64, VmiError> {
            Ok(1 << 32)
        }

        fn vcpu_register(&self, _reg: VcpuRegister, _vcpu: u32) -> Result<u64, VmiError> {
            Err(VmiError::NotSupported("fake driver"))
        }

        fn pause(&self) -> Result<(), VmiError> {
            Ok(())
        }

        fn resume(&self) -> Result<(), VmiError> {
            Ok(())
        }

        fn id_from_name(&self, _name: &str) -> Result<u64, VmiError> {
            Err(VmiError::NotSupported("fake driver"))
        }

        fn name_from_id(&self, _id: u64) -> Result<String, VmiError> {
            Err(VmiError::NotSupported("fake driver"))
        }

        fn check_id(&self, _id: u64) -> Result<bool, VmiError> {
            Ok(true)
        }
    }

    /// Scenario 3 from spec §8: L1 descriptor `0x00C1_1C02` at index
    /// `va>>20 = 0xC00`.
    #[test]
    fn scenario_3_section_leaf() {
        let driver = FakeDriver::new();
        let vaddr = Va(0xC000_1234);
        let l1_index = vaddr.value() >> 20;
        assert_eq!(l1_index, 0xC00);
        driver.write_u32(l1_index * 4, 0x00C1_1C02);

        let caches = Caches::new();
        let mem = Memory::new(&driver, &caches.page);
        let walker = Arm32Walker;

        let info = walker.translate(&mem, Pa(0), vaddr).unwrap();
        assert_eq!(info.paddr, Pa(0x00C0_1234));
        assert_eq!(info.page_size, PageSize::Size1Mb);
    }

    #[test]
    fn supersection_combines_extended_bits() {
        let driver = FakeDriver::new();
        let vaddr = Va(0x1000_0000);
        let l1_index = vaddr.value() >> 20;
        // bit18 set -> supersection; extended bits [23:20] = 0x5.
        driver.write_u32(l1_index * 4, 0x0500_0042 | (1 << 18));

        let caches = Caches::new();
        let mem = Memory::new(&driver, &caches.page);
        let walker = Arm32Walker;

        let info = walker.translate(&mem, Pa(0), vaddr).unwrap();
        assert_eq!(info.page_size, PageSize::Size16Mb);
        assert_eq!(info.paddr.value() >> 32, 0x5);
    }

    #[test]
    fn fine_table_selects_leaf_from_l2_bits() {
        let driver = FakeDriver::new();
        let vaddr = Va(0x2000_0400);
        let l1_index = vaddr.value() >> 20;
        // Fine page table descriptor (low bits 0b11), base 0x3000.
        driver.write_u32(l1_index * 4, 0x0000_3003);

        let l2_index = (vaddr.value() >> 10) & 0x3FF;
        // Tiny page leaf (low bits 0b11), base 0x4000_0000 | tiny-alignment.
        driver.write_u32(0x3000 + l2_index * 4, 0x4000_0003);

        let caches = Caches::new();
        let mem = Memory::new(&driver, &caches.page);
        let walker = Arm32Walker;

        let info = walker.translate(&mem, Pa(0), vaddr).unwrap();
        assert_eq!(info.page_size, PageSize::Size1Kb);
        assert_eq!(info.paddr, Pa(0x4000_0000 | (vaddr.value() & 0x3FF)));
    }

    #[test]
    fn fault_descriptor_fails() {
        let driver = FakeDriver::new();
        let caches = Caches::new();
        let mem = Memory::new(&driver, &caches.page);
        let walker = Arm32Walker;

        let err = walker.translate(&mem, Pa(0), Va(0x1234_5678)).unwrap_err();
        assert!(matches!(err, VmiError::PageNotPresent { .. }));
    }

    #[test]
    fn enumerate_is_empty() {
        let driver = FakeDriver::new();
        let caches = Caches::new();
        let mem = Memory::new(&driver, &caches.page);
        let walker = Arm32Walker;

        assert!(walker.enumerate(&mem, Pa(0)).unwrap().is_empty());
    }
}
