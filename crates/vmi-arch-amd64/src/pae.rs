//! The PAE walker: 3-level paging (PDPTE → PDE → PTE), 8-byte descriptors,
//! 4 KiB and 2 MiB leaves.

use vmi_core::{
    Memory, Pa, PageMode, PageSize, PagingWalker, Va, VmiError,
    page::{LevelEntry, PageInfo},
};

use crate::pte::PageTableEntry;

/// 3-level PAE paging: PDPTE selected by `vaddr[31:30]` (4 entries), PDE by
/// `vaddr[29:21]`, PTE by `vaddr[20:12]`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PaeWalker;

impl PagingWalker for PaeWalker {
    fn page_mode(&self) -> PageMode {
        PageMode::Pae
    }

    fn translate(&self, mem: &Memory<'_>, dtb: Pa, vaddr: Va) -> Result<PageInfo, VmiError> {
        let mut levels = [None; 4];

        // The PDPT has only 4 entries and is not itself page-aligned to a
        // full page, but to a 32-byte boundary from CR3.
        let pdpte_index = (vaddr.value() >> 30) & 0x3;
        let pdpte_address = Pa(dtb.value() & !0x1F) + pdpte_index * 8;
        let pdpte = PageTableEntry(mem.read_u64(pdpte_address)?);
        levels[0] = Some(LevelEntry {
            address: pdpte_address,
            value: pdpte.0,
        });

        if !pdpte.present() {
            return Err(VmiError::PageNotPresent { vaddr, levels });
        }
        if pdpte.reserved_bits_set(false) {
            return Err(VmiError::ReservedBitsSet { vaddr, levels });
        }

        let pde_index = (vaddr.value() >> 21) & 0x1FF;
        let pde_address = Pa((pdpte.pfn() << 12) & !0xFFF) + pde_index * 8;
        let pde = PageTableEntry(mem.read_u64(pde_address)?);
        levels[1] = Some(LevelEntry {
            address: pde_address,
            value: pde.0,
        });

        if !pde.present() {
            return Err(VmiError::PageNotPresent { vaddr, levels });
        }
        if pde.reserved_bits_set(false) {
            return Err(VmiError::ReservedBitsSet { vaddr, levels });
        }

        if pde.large() {
            tracing::trace!(?vaddr, "PAE walk: 2 MiB leaf");
            let base = pde.pfn() << 12 & !0x1FFFFF;
            let paddr = Pa(base | (vaddr.value() & 0x1F_FFFF));
            return Ok(PageInfo {
                vaddr,
                dtb,
                paddr,
                page_size: PageSize::Size2Mb,
                levels,
            });
        }

        let pte_index = (vaddr.value() >> 12) & 0x1FF;
        let pte_address = Pa((pde.pfn() << 12) & !0xFFF) + pte_index * 8;
        let pte = PageTableEntry(mem.read_u64(pte_address)?);
        levels[2] = Some(LevelEntry {
            address: pte_address,
            value: pte.0,
        });

        if !pte.present() {
            return Err(VmiError::PageNotPresent { vaddr, levels });
        }
        if pte.reserved_bits_set(true) {
            return Err(VmiError::ReservedBitsSet { vaddr, levels });
        }

        let paddr = Pa((pte.pfn() << 12) | vaddr.page_offset(12));
        Ok(PageInfo {
            vaddr,
            dtb,
            paddr,
            page_size: PageSize::Size4Kb,
            levels,
        })
    }

    fn enumerate(&self, mem: &Memory<'_>, dtb: Pa) -> Result<Vec<(Va, PageSize)>, VmiError> {
        let mut out = Vec::new();
        let pdpt_base = Pa(dtb.value() & !0x1F);

        for pdpti in 0..4u64 {
            let pdpte = PageTableEntry(match mem.read_u64(pdpt_base + pdpti * 8) {
                Ok(v) => v,
                Err(_) => continue,
            });
            if !pdpte.present() {
                continue;
            }

            let pd_base = Pa((pdpte.pfn() << 12) & !0xFFF);
            for pdi in 0..512u64 {
                let pde = PageTableEntry(match mem.read_u64(pd_base + pdi * 8) {
                    Ok(v) => v,
                    Err(_) => continue,
                });
                if !pde.present() {
                    continue;
                }

                let va_base = (pdpti << 30) | (pdi << 21);
                if pde.large() {
                    out.push((Va(va_base), PageSize::Size2Mb));
                    continue;
                }

                let pt_base = Pa((pde.pfn() << 12) & !0xFFF);
                for pti in 0..512u64 {
                    let pte = match mem.read_u64(pt_base + pti * 8) {
                        Ok(v) => PageTableEntry(v),
                        Err(_) => continue,
                    };
                    if pte.present() {
                        out.push((Va(va_base | (pti << 12)), PageSize::Size4Kb));
                    }
                }
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use vmi_core::Caches;

    use super::*;
    use crate::testutil::FakeDriver;

    #[test]
    fn two_mb_large_page_leaf() {
        let driver = FakeDriver::new();
        // PDPTE 0 -> present, points to PD at 0x3000.
        driver.write_u64(0x2000, 0x0000_0000_0000_3001);
        // PDE at index 0: large, base 0x0020_0000.
        driver.write_u64(0x3000, 0x0000_0000_0020_0081);

        let caches = Caches::new();
        let mem = Memory::new(&driver, &caches.page);
        let walker = PaeWalker;

        let info = walker.translate(&mem, Pa(0x2000), Va(0x0020_1234)).unwrap();
        assert_eq!(info.paddr, Pa(0x0020_1234));
        assert_eq!(info.page_size, PageSize::Size2Mb);
    }
}
