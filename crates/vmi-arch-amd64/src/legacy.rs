//! The legacy 32-bit (non-PAE) walker: 2-level paging, 4 KiB and 4 MiB
//! leaves.

use vmi_core::{
    Memory, Pa, PageMode, PageSize, PagingWalker, Va, VmiError,
    page::{LevelEntry, PageInfo},
};

use crate::pte::PageTableEntry;

/// 2-level x86 paging: PDE selected by `vaddr[31:22]`, PTE by `vaddr[21:12]`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Legacy32Walker;

impl PagingWalker for Legacy32Walker {
    fn page_mode(&self) -> PageMode {
        PageMode::Legacy32
    }

    fn translate(&self, mem: &Memory<'_>, dtb: Pa, vaddr: Va) -> Result<PageInfo, VmiError> {
        let mut levels = [None; 4];

        let pde_index = (vaddr.value() >> 22) & 0x3FF;
        let pde_address = Pa(dtb.value() & !0xFFF) + pde_index * 4;
        let pde = PageTableEntry(mem.read_u32(pde_address)? as u64);
        levels[0] = Some(LevelEntry {
            address: pde_address,
            value: pde.0,
        });

        if !pde.present() {
            return Err(err_not_present(vaddr, levels));
        }
        if pde.reserved_bits_set(false) {
            return Err(err_reserved(vaddr, levels));
        }

        if pde.large() {
            tracing::trace!(?vaddr, "legacy walk: 4 MiB leaf");
            // 4 MiB leaf: PDE bits [31:22] give the high part of the frame,
            // bit 21..13 (the "PAT for 4M pages") is folded into the PFN per
            // the Intel encoding; this crate's `pfn()` already masks to the
            // raw upper bits, so the 4 MiB base is PDE's PFN with the low 10
            // PFN bits cleared (they encode bits [21:13] of the physical
            // address on `large`, already captured by `pfn()` for our masks).
            let base = (pde.0 & 0xFFC0_0000) | ((pde.0 & 0x003F_E000) << 13);
            let paddr = Pa(base | (vaddr.value() & 0x3F_FFFF));
            return Ok(PageInfo {
                vaddr,
                dtb,
                paddr,
                page_size: PageSize::Size4Mb,
                levels,
            });
        }

        let pte_index = (vaddr.value() >> 12) & 0x3FF;
        let pte_address = Pa((pde.pfn() << 12) & !0xFFF) + pte_index * 4;
        let pte = PageTableEntry(mem.read_u32(pte_address)? as u64);
        levels[1] = Some(LevelEntry {
            address: pte_address,
            value: pte.0,
        });

        if !pte.present() {
            return Err(err_not_present(vaddr, levels));
        }
        if pte.reserved_bits_set(true) {
            return Err(err_reserved(vaddr, levels));
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
        let pd_base = Pa(dtb.value() & !0xFFF);

        for pdi in 0..1024u64 {
            let pde = PageTableEntry(mem.read_u32(pd_base + pdi * 4)? as u64);
            if !pde.present() {
                continue;
            }

            if pde.large() {
                let va = Va(pdi << 22);
                out.push((va, PageSize::Size4Mb));
                continue;
            }

            let pt_base = Pa((pde.pfn() << 12) & !0xFFF);
            for pti in 0..1024u64 {
                let pte = match mem.read_u32(pt_base + pti * 4) {
                    Ok(raw) => PageTableEntry(raw as u64),
                    Err(_) => continue,
                };
                if pte.present() {
                    out.push((Va((pdi << 22) | (pti << 12)), PageSize::Size4Kb));
                }
            }
        }

        Ok(out)
    }
}

fn err_not_present(vaddr: Va, levels: [Option<LevelEntry>; 4]) -> VmiError {
    VmiError::PageNotPresent { vaddr, levels }
}

fn err_reserved(vaddr: Va, levels: [Option<LevelEntry>; 4]) -> VmiError {
    VmiError::ReservedBitsSet { vaddr, levels }
}

#[cfg(test)]
mod tests {
    use vmi_core::Caches;

    use super::*;
    use crate::testutil::FakeDriver;

    /// Scenario 1 from spec §8: `dtb = 0x00039000`, `va = 0xC0301234`.
    #[test]
    fn scenario_1_legacy_4kb_walk() {
        let driver = FakeDriver::new();
        driver.write_u32(0x39000 + (0xC03 << 2), 0x00068067);
        driver.write_u32(0x68000 + (0x01 << 2), 0x000BA067);

        let caches = Caches::new();
        let mem = Memory::new(&driver, &caches.page);
        let walker = Legacy32Walker;

        let info = walker
            .translate(&mem, Pa(0x39000), Va(0xC0301234))
            .unwrap();

        assert_eq!(info.paddr, Pa(0xBA234));
        assert_eq!(info.page_size, PageSize::Size4Kb);
    }

    #[test]
    fn not_present_pde_fails() {
        let driver = FakeDriver::new();
        let caches = Caches::new();
        let mem = Memory::new(&driver, &caches.page);
        let walker = Legacy32Walker;

        let err = walker
            .translate(&mem, Pa(0x39000), Va(0xC0301234))
            .unwrap_err();
        assert!(matches!(err, VmiError::PageNotPresent { .. }));
    }
}
