//! The IA-32e (long mode) walker: 4-level paging (PML4E → PDPTE → PDE →
//! PTE), 4 KiB / 2 MiB / 1 GiB leaves.

use vmi_core::{
    Memory, Pa, PageMode, PageSize, PagingWalker, Va, VmiError,
    page::{LevelEntry, PageInfo},
};

use crate::pte::PageTableEntry;

/// 4-level IA-32e paging: PML4E selected by `vaddr[47:39]`, PDPTE by
/// `vaddr[38:30]`, PDE by `vaddr[29:21]`, PTE by `vaddr[20:12]`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ia32eWalker;

impl PagingWalker for Ia32eWalker {
    fn page_mode(&self) -> PageMode {
        PageMode::Ia32e
    }

    fn translate(&self, mem: &Memory<'_>, dtb: Pa, vaddr: Va) -> Result<PageInfo, VmiError> {
        if !vaddr.is_canonical() {
            return Err(VmiError::NonCanonical(vaddr));
        }

        let mut levels = [None; 4];

        let pml4_index = (vaddr.value() >> 39) & 0x1FF;
        let pml4e_address = Pa(dtb.value() & !0xFFF) + pml4_index * 8;
        let pml4e = PageTableEntry(mem.read_u64(pml4e_address)?);
        levels[0] = Some(LevelEntry {
            address: pml4e_address,
            value: pml4e.0,
        });

        if !pml4e.present() {
            return Err(VmiError::PageNotPresent { vaddr, levels });
        }
        if pml4e.reserved_bits_set(false) {
            return Err(VmiError::ReservedBitsSet { vaddr, levels });
        }

        let pdpte_index = (vaddr.value() >> 30) & 0x1FF;
        let pdpte_address = Pa((pml4e.pfn() << 12) & !0xFFF) + pdpte_index * 8;
        let pdpte = PageTableEntry(mem.read_u64(pdpte_address)?);
        levels[1] = Some(LevelEntry {
            address: pdpte_address,
            value: pdpte.0,
        });

        if !pdpte.present() {
            return Err(VmiError::PageNotPresent { vaddr, levels });
        }
        if pdpte.reserved_bits_set(false) {
            return Err(VmiError::ReservedBitsSet { vaddr, levels });
        }

        if pdpte.large() {
            tracing::trace!(?vaddr, "IA-32e walk: 1 GiB leaf");
            let base = (pdpte.pfn() << 12) & !0x3FFF_FFFF;
            let paddr = Pa(base | (vaddr.value() & 0x3FFF_FFFF));
            return Ok(PageInfo {
                vaddr,
                dtb,
                paddr,
                page_size: PageSize::Size1Gb,
                levels,
            });
        }

        let pde_index = (vaddr.value() >> 21) & 0x1FF;
        let pde_address = Pa((pdpte.pfn() << 12) & !0xFFF) + pde_index * 8;
        let pde = PageTableEntry(mem.read_u64(pde_address)?);
        levels[2] = Some(LevelEntry {
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
            let base = (pde.pfn() << 12) & !0x1F_FFFF;
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
        levels[3] = Some(LevelEntry {
            address: pte_address,
            value: pte.0,
        });

        if !pte.present() {
            return Err(VmiError::PageNotPresent { vaddr, levels });
        }
        // PAT is explicitly ignored for translation per the tie-break rule;
        // `pte.reserved_bits_set` does not inspect the PAT bit.
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
        let pml4_base = Pa(dtb.value() & !0xFFF);

        for i4 in 0..512u64 {
            let pml4e = match mem.read_u64(pml4_base + i4 * 8) {
                Ok(v) => PageTableEntry(v),
                Err(_) => continue,
            };
            if !pml4e.present() {
                continue;
            }

            let pdpt_base = Pa((pml4e.pfn() << 12) & !0xFFF);
            for i3 in 0..512u64 {
                let pdpte = match mem.read_u64(pdpt_base + i3 * 8) {
                    Ok(v) => PageTableEntry(v),
                    Err(_) => continue,
                };
                if !pdpte.present() {
                    continue;
                }

                let va3 = (i4 << 39) | (i3 << 30);
                if pdpte.large() {
                    out.push((Va(sign_extend_48(va3)), PageSize::Size1Gb));
                    continue;
                }

                let pd_base = Pa((pdpte.pfn() << 12) & !0xFFF);
                for i2 in 0..512u64 {
                    let pde = match mem.read_u64(pd_base + i2 * 8) {
                        Ok(v) => PageTableEntry(v),
                        Err(_) => continue,
                    };
                    if !pde.present() {
                        continue;
                    }

                    let va2 = va3 | (i2 << 21);
                    if pde.large() {
                        out.push((Va(sign_extend_48(va2)), PageSize::Size2Mb));
                        continue;
                    }

                    let pt_base = Pa((pde.pfn() << 12) & !0xFFF);
                    for i1 in 0..512u64 {
                        let pte = match mem.read_u64(pt_base + i1 * 8) {
                            Ok(v) => PageTableEntry(v),
                            Err(_) => continue,
                        };
                        if pte.present() {
                            out.push((Va(sign_extend_48(va2 | (i1 << 12))), PageSize::Size4Kb));
                        }
                    }
                }
            }
        }

        Ok(out)
    }
}

/// Sign-extends a 48-bit VA assembled from table indices into a canonical
/// 64-bit address, so enumeration results are usable directly by callers.
fn sign_extend_48(va: u64) -> u64 {
    if va & (1 << 47) != 0 {
        va | 0xFFFF_0000_0000_0000
    } else {
        va
    }
}

#[cfg(test)]
mod tests {
    use vmi_core::Caches;

    use super::*;
    use crate::testutil::FakeDriver;

    /// Scenario 2 from spec §8: a 1 GiB page via PDPTE with PS=1.
    #[test]
    fn scenario_2_one_gb_page() {
        let driver = FakeDriver::new();

        let vaddr = Va(0xFFFF_8000_1234_5678);
        let pml4_index = (vaddr.value() >> 39) & 0x1FF;
        let pdpte_index = (vaddr.value() >> 30) & 0x1FF;

        driver.write_u64(pml4_index * 8, 0x0000_0000_0000_2001);
        driver.write_u64(0x2000 + pdpte_index * 8, 0x0000_0001_4000_0081);

        let caches = Caches::new();
        let mem = Memory::new(&driver, &caches.page);
        let walker = Ia32eWalker;

        let info = walker.translate(&mem, Pa(0), vaddr).unwrap();
        assert_eq!(info.paddr, Pa(0x1_4234_5678));
        assert_eq!(info.page_size, PageSize::Size1Gb);
    }

    #[test]
    fn non_canonical_address_fails() {
        let driver = FakeDriver::new();
        let caches = Caches::new();
        let mem = Memory::new(&driver, &caches.page);
        let walker = Ia32eWalker;

        let err = walker
            .translate(&mem, Pa(0), Va(0x0001_0000_0000_0000))
            .unwrap_err();
        assert!(matches!(err, VmiError::NonCanonical(_)));
    }
}
