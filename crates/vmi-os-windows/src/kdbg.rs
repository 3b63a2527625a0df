//! Locating and reading the `KdDebuggerDataBlock` ("KDBG"), the Windows
//! kernel structure that anchors every other symbol resolution.
//!
//! Four strategies are tried in order, fastest first; the first to
//! succeed wins and the rest are never run. Each strategy is a
//! [`KdbgStrategy`] returning `Ok(None)` (not an error) when it simply
//! doesn't apply or doesn't find anything, so the cascade can fall
//! through cleanly. A strategy's hard `Err` also cascades rather than
//! aborting the whole locate.

use vmi_core::{EngineView, Pa, Va, VcpuRegister, VmiError};

use crate::pe::PeHeader;

/// Offset, in bytes, of a named field within the debugger data block.
///
/// Mirrors the ~140-field, packed `KDDEBUGGER_DATA64` layout: a 24-byte
/// header (two `u64`s, then two `u32`s) followed by a flat run of `u64`/
/// `u16` fields with no padding. Every field is read as raw little-endian
/// bytes at `kdbg_pa + offset`, never through a host-layout struct.
pub fn field_offset(name: &str) -> Option<u64> {
    Some(match name {
        "KernBase" => 0x18,
        "BreakpointWithStatus" => 0x20,
        "SavedContext" => 0x28,
        "ThCallbackStack" => 0x30,
        "NextCallback" => 0x32,
        "FramePointer" => 0x34,
        "PaeEnabled" => 0x36,
        "KiCallUserMode" => 0x38,
        "KeUserCallbackDispatcher" => 0x40,
        "PsLoadedModuleList" => 0x48,
        "PsActiveProcessHead" => 0x50,
        "PspCidTable" => 0x58,
        "ExpSystemResourcesList" => 0x60,
        "ExpPagedPoolDescriptor" => 0x68,
        "ExpNumberOfPagedPools" => 0x70,
        "KeTimeIncrement" => 0x78,
        "KeBugCheckCallbackListHead" => 0x80,
        "KiBugcheckData" => 0x88,
        "IopErrorLogListHead" => 0x90,
        "ObpRootDirectoryObject" => 0x98,
        "ObpTypeObjectType" => 0xa0,
        "MmSystemCacheStart" => 0xa8,
        "MmSystemCacheEnd" => 0xb0,
        "MmSystemCacheWs" => 0xb8,
        "MmPfnDatabase" => 0xc0,
        "MmSystemPtesStart" => 0xc8,
        "MmSystemPtesEnd" => 0xd0,
        "MmSubsectionBase" => 0xd8,
        "MmNumberOfPagingFiles" => 0xe0,
        "MmLowestPhysicalPage" => 0xe8,
        "MmHighestPhysicalPage" => 0xf0,
        "MmNumberOfPhysicalPages" => 0xf8,
        "MmMaximumNonPagedPoolInBytes" => 0x100,
        "MmNonPagedSystemStart" => 0x108,
        "MmNonPagedPoolStart" => 0x110,
        "MmNonPagedPoolEnd" => 0x118,
        "MmPagedPoolStart" => 0x120,
        "MmPagedPoolEnd" => 0x128,
        "MmPagedPoolInformation" => 0x130,
        "MmPageSize" => 0x138,
        "MmSizeOfPagedPoolInBytes" => 0x140,
        "MmTotalCommitLimit" => 0x148,
        "MmTotalCommittedPages" => 0x150,
        "MmSharedCommit" => 0x158,
        "MmDriverCommit" => 0x160,
        "MmProcessCommit" => 0x168,
        "MmPagedPoolCommit" => 0x170,
        "MmExtendedCommit" => 0x178,
        "MmZeroedPageListHead" => 0x180,
        "MmFreePageListHead" => 0x188,
        "MmStandbyPageListHead" => 0x190,
        "MmModifiedPageListHead" => 0x198,
        "MmModifiedNoWritePageListHead" => 0x1a0,
        "MmAvailablePages" => 0x1a8,
        "MmResidentAvailablePages" => 0x1b0,
        "PoolTrackTable" => 0x1b8,
        "NonPagedPoolDescriptor" => 0x1c0,
        "MmHighestUserAddress" => 0x1c8,
        "MmSystemRangeStart" => 0x1d0,
        "MmUserProbeAddress" => 0x1d8,
        "KdPrintCircularBuffer" => 0x1e0,
        "KdPrintCircularBufferEnd" => 0x1e8,
        "KdPrintWritePointer" => 0x1f0,
        "KdPrintRolloverCount" => 0x1f8,
        "MmLoadedUserImageList" => 0x200,
        "NtBuildLab" => 0x208,
        "KiNormalSystemCall" => 0x210,
        "KiProcessorBlock" => 0x218,
        "MmUnloadedDrivers" => 0x220,
        "MmLastUnloadedDriver" => 0x228,
        "MmTriageActionTaken" => 0x230,
        "MmSpecialPoolTag" => 0x238,
        "KernelVerifier" => 0x240,
        "MmVerifierData" => 0x248,
        "MmAllocatedNonPagedPool" => 0x250,
        "MmPeakCommitment" => 0x258,
        "MmTotalCommitLimitMaximum" => 0x260,
        "CmNtCSDVersion" => 0x268,
        "MmPhysicalMemoryBlock" => 0x270,
        "MmSessionBase" => 0x278,
        "MmSessionSize" => 0x280,
        "MmSystemParentTablePage" => 0x288,
        "MmVirtualTranslationBase" => 0x290,
        "OffsetKThreadNextProcessor" => 0x298,
        "OffsetKThreadTeb" => 0x29a,
        "OffsetKThreadKernelStack" => 0x29c,
        "OffsetKThreadInitialStack" => 0x29e,
        "OffsetKThreadApcProcess" => 0x2a0,
        "OffsetKThreadState" => 0x2a2,
        "OffsetKThreadBStore" => 0x2a4,
        "OffsetKThreadBStoreLimit" => 0x2a6,
        "SizeEProcess" => 0x2a8,
        "OffsetEprocessPeb" => 0x2aa,
        "OffsetEprocessParentCID" => 0x2ac,
        "OffsetEprocessDirectoryTableBase" => 0x2ae,
        "SizePrcb" => 0x2b0,
        "OffsetPrcbDpcRoutine" => 0x2b2,
        "OffsetPrcbCurrentThread" => 0x2b4,
        "OffsetPrcbMhz" => 0x2b6,
        "OffsetPrcbCpuType" => 0x2b8,
        "OffsetPrcbVendorString" => 0x2ba,
        "OffsetPrcbProcStateContext" => 0x2bc,
        "OffsetPrcbNumber" => 0x2be,
        "SizeEThread" => 0x2c0,
        "KdPrintCircularBufferPtr" => 0x2c2,
        "KdPrintBufferSize" => 0x2ca,
        "KeLoaderBlock" => 0x2d2,
        "SizePcr" => 0x2da,
        "OffsetPcrSelfPcr" => 0x2dc,
        "OffsetPcrCurrentPrcb" => 0x2de,
        "OffsetPcrContainedPrcb" => 0x2e0,
        "OffsetPcrInitialBStore" => 0x2e2,
        "OffsetPcrBStoreLimit" => 0x2e4,
        "OffsetPcrInitialStack" => 0x2e6,
        "OffsetPcrStackLimit" => 0x2e8,
        "OffsetPrcbPcrPage" => 0x2ea,
        "OffsetPrcbProcStateSpecialReg" => 0x2ec,
        "GdtR0Code" => 0x2ee,
        "GdtR0Data" => 0x2f0,
        "GdtR0Pcr" => 0x2f2,
        "GdtR3Code" => 0x2f4,
        "GdtR3Data" => 0x2f6,
        "GdtR3Teb" => 0x2f8,
        "GdtLdt" => 0x2fa,
        "GdtTss" => 0x2fc,
        "Gdt64R3CmCode" => 0x2fe,
        "Gdt64R3CmTeb" => 0x300,
        "IopNumTriageDumpDataBlocks" => 0x302,
        "IopTriageDumpDataBlocks" => 0x30a,
        "VfCrashDataBlock" => 0x312,
        _ => return None,
    })
}

const KERNBASE_OFFSET: u64 = 0x18;

/// Tail signature placed right after `OwnerTag` in a live (IA-32e) block:
/// the high dword of `List[1]` (a kernel VA, reliably `0xfffff800`-ish)
/// followed by the `"KDBG"` tag itself. `find_ofs` is the match's distance
/// back to the struct head.
const SIG_IA32E: &[u8] = b"\x00\xf8\xff\xffKDBG";
const SIG_IA32E_FIND_OFS: u64 = 0xc;

/// The legacy (32-bit) equivalent: `List[1]` is a zeroed 32-bit-padded
/// pointer, so the whole field reads as eight zero bytes ahead of the tag.
const SIG_LEGACY: &[u8] = b"\x00\x00\x00\x00\x00\x00\x00\x00KDBG";
const SIG_LEGACY_FIND_OFS: u64 = 0x8;

/// The bare tag, used once a candidate `.data` section has already been
/// narrowed down by PE-header recognition.
const SIG_TAG_ONLY: &[u8] = b"KDBG";
const SIG_TAG_FIND_OFS: u64 = 0x10;

/// Physical and virtual placement of a located debugger block.
///
/// `kdbg_va` is only known for strategies that reached the block by
/// translating a virtual address ([`InstantStrategy`], [`FastStrategy`]);
/// [`FasterStrategy`] and [`SlowStrategy`] work entirely in physical
/// address space and leave it `None`.
#[derive(Debug, Clone, Copy)]
pub struct KdbgLocation {
    /// Physical address of the debugger block.
    pub kdbg_pa: Pa,
    /// Virtual address of the debugger block, when known.
    pub kdbg_va: Option<Va>,
    /// The kernel base VA read back from the block's own `KernBase` field.
    pub kernbase_va: Va,
}

/// One entry in the KDBG-locator cascade.
pub trait KdbgStrategy {
    /// A short name for logging.
    fn name(&self) -> &'static str;

    /// Attempts to locate the debugger block. `Ok(None)` means "this
    /// strategy doesn't apply here, try the next one" — not a failure.
    fn locate(
        &self,
        engine: &EngineView<'_>,
        ia32e: bool,
        dtb: Pa,
    ) -> Result<Option<KdbgLocation>, VmiError>;
}

/// Runs the four-strategy cascade in order, returning the first success.
pub fn locate_kdbg(
    strategies: &[Box<dyn KdbgStrategy>],
    engine: &EngineView<'_>,
    ia32e: bool,
    dtb: Pa,
) -> Result<Option<KdbgLocation>, VmiError> {
    for strategy in strategies {
        match strategy.locate(engine, ia32e, dtb) {
            Ok(Some(location)) => {
                tracing::info!(
                    strategy = strategy.name(),
                    kdbg_pa = ?location.kdbg_pa,
                    "located KDBG; consider persisting win_kdvb/win_kdbg for an instant boot next time"
                );
                return Ok(Some(location));
            }
            Ok(None) => continue,
            Err(err) => {
                tracing::debug!(strategy = strategy.name(), %err, "KDBG strategy failed, cascading");
                continue;
            }
        }
    }
    Ok(None)
}

fn kpcr_register(ia32e: bool) -> VcpuRegister {
    if ia32e {
        VcpuRegister::GsBase
    } else {
        VcpuRegister::FsBase
    }
}

pub(crate) fn read_kernbase(engine: &EngineView<'_>, kdbg_pa: Pa) -> Result<Va, VmiError> {
    let value = engine.mem().read_u64(kdbg_pa + KERNBASE_OFFSET)?;
    Ok(Va(value))
}

/// Strategy 1: the caller already supplied both offsets via config, so the
/// block is one register read and one translation away.
pub struct InstantStrategy {
    /// Configured RVA of `_KPCR` from the kernel base.
    pub kpcr_offset: u64,
    /// Configured offset of KDBG from the kernel base.
    pub kdbg_offset: u64,
}

impl KdbgStrategy for InstantStrategy {
    fn name(&self) -> &'static str {
        "instant"
    }

    fn locate(
        &self,
        engine: &EngineView<'_>,
        ia32e: bool,
        dtb: Pa,
    ) -> Result<Option<KdbgLocation>, VmiError> {
        let fsgs = match engine.vcpu_register(kpcr_register(ia32e), 0) {
            Ok(v) => v,
            Err(_) => return Ok(None),
        };

        let kernbase_va = Va(fsgs.wrapping_sub(self.kpcr_offset));
        let kernbase_pa = engine.translate(dtb, kernbase_va)?;
        let kdbg_pa = kernbase_pa + self.kdbg_offset;
        let kernbase_va = read_kernbase(engine, kdbg_pa)?;

        Ok(Some(KdbgLocation {
            kdbg_pa,
            kdbg_va: Some(kernbase_va + self.kdbg_offset),
            kernbase_va,
        }))
    }
}

/// Strategy 2: walk physical pages outward from the live KPCR, looking for
/// a page that parses as the ntoskrnl.exe PE header, then scan only that
/// image's `.data` section for the bare `"KDBG"` tag.
pub struct FasterStrategy;

impl KdbgStrategy for FasterStrategy {
    fn name(&self) -> &'static str {
        "faster"
    }

    fn locate(
        &self,
        engine: &EngineView<'_>,
        ia32e: bool,
        dtb: Pa,
    ) -> Result<Option<KdbgLocation>, VmiError> {
        let fsgs = match engine.vcpu_register(kpcr_register(ia32e), 0) {
            Ok(v) => v,
            Err(_) => return Ok(None),
        };

        let kpcr_pa = match engine.translate(dtb, Va(fsgs)) {
            Ok(pa) => pa,
            Err(_) => return Ok(None),
        };

        let memsize = engine.mem().memsize()?;
        let start = kpcr_pa.page_base(12).value();

        // Scan downward first, then upward, one page at a time, per the
        // original cascade's ordering.
        let mut candidates = Vec::new();
        let mut down = start;
        while down >= 4096 {
            down -= 4096;
            candidates.push(down);
        }
        let mut up = start;
        loop {
            up += 4096;
            if up >= memsize {
                break;
            }
            candidates.push(up);
        }

        for pa in candidates {
            let header = match PeHeader::parse(engine.mem(), Pa(pa))? {
                Some(header) => header,
                None => continue,
            };
            if !header.names_module(engine.mem(), b"ntoskrnl.exe")? {
                continue;
            }

            let data = match header.data_section_bytes(engine.mem())? {
                Some(data) => data,
                None => continue,
            };
            let Some(match_offset) = memchr::memmem::find(&data, SIG_TAG_ONLY) else {
                continue;
            };
            if (match_offset as u64) < SIG_TAG_FIND_OFS {
                continue;
            }

            let kdbg_pa = Pa(pa) + match_offset as u64 - SIG_TAG_FIND_OFS;
            let kernbase_va = read_kernbase(engine, kdbg_pa)?;

            // Sanity check: the low bits of KernBase (after the run of
            // leading zero bits in the page's own physical address) should
            // line up with the page's physical placement.
            let clz = Pa(pa).value().leading_zeros().min(63);
            if (kernbase_va.value() << clz) != (Pa(pa).value() << clz) {
                continue;
            }

            return Ok(Some(KdbgLocation {
                kdbg_pa,
                kdbg_va: None,
                kernbase_va,
            }));
        }

        Ok(None)
    }
}

/// Strategy 3: enumerate the kernel's own VA pages through CR3 and
/// `get_va_pages`, Boyer-Moore-searching each one for the full tail
/// signature.
pub struct FastStrategy;

impl KdbgStrategy for FastStrategy {
    fn name(&self) -> &'static str {
        "fast"
    }

    fn locate(
        &self,
        engine: &EngineView<'_>,
        ia32e: bool,
        dtb: Pa,
    ) -> Result<Option<KdbgLocation>, VmiError> {
        let (sig, find_ofs) = if ia32e {
            (SIG_IA32E, SIG_IA32E_FIND_OFS)
        } else {
            (SIG_LEGACY, SIG_LEGACY_FIND_OFS)
        };

        let pages = engine.enumerate(dtb)?;
        for (va, _size) in pages {
            let pa = match engine.translate(dtb, va) {
                Ok(pa) => pa,
                Err(_) => continue,
            };
            let page = match engine.mem().read_page(pa.page_base(12)) {
                Ok(page) => page,
                Err(_) => continue,
            };
            let Some(match_offset) = memchr::memmem::find(&page, sig) else {
                continue;
            };
            if (match_offset as u64) < find_ofs {
                continue;
            }

            let kdbg_pa = pa.page_base(12) + match_offset as u64 - find_ofs;
            let kdbg_va = va.page_base(12) + match_offset as u64 - find_ofs;
            let kernbase_va = read_kernbase(engine, kdbg_pa)?;

            return Ok(Some(KdbgLocation {
                kdbg_pa,
                kdbg_va: Some(kdbg_va),
                kernbase_va,
            }));
        }

        Ok(None)
    }
}

/// Strategy 4: brute-force scan of the entire physical address space, 4
/// KiB at a time, for either tail signature.
pub struct SlowStrategy;

impl KdbgStrategy for SlowStrategy {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn locate(
        &self,
        engine: &EngineView<'_>,
        ia32e: bool,
        _dtb: Pa,
    ) -> Result<Option<KdbgLocation>, VmiError> {
        let (sig, find_ofs) = if ia32e {
            (SIG_IA32E, SIG_IA32E_FIND_OFS)
        } else {
            (SIG_LEGACY, SIG_LEGACY_FIND_OFS)
        };

        let memsize = engine.mem().memsize()?;
        let mut pa = 0u64;
        while pa < memsize {
            if let Ok(page) = engine.mem().read_page(Pa(pa)) {
                if let Some(match_offset) = memchr::memmem::find(&page, sig) {
                    if match_offset as u64 >= find_ofs {
                        let kdbg_pa = Pa(pa) + match_offset as u64 - find_ofs;
                        if let Ok(kernbase_va) = read_kernbase(engine, kdbg_pa) {
                            return Ok(Some(KdbgLocation {
                                kdbg_pa,
                                kdbg_va: None,
                                kernbase_va,
                            }));
                        }
                    }
                }
            }
            pa += 4096;
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_offset_matches_known_anchors() {
        assert_eq!(field_offset("KernBase"), Some(0x18));
        assert_eq!(field_offset("PsActiveProcessHead"), Some(0x50));
        assert_eq!(field_offset("PsLoadedModuleList"), Some(0x48));
        assert_eq!(field_offset("VfCrashDataBlock"), Some(0x312));
        assert_eq!(field_offset("NotAField"), None);
    }

    #[test]
    fn tag_signatures_agree_with_find_offsets() {
        assert_eq!(SIG_IA32E.len() as u64, SIG_IA32E_FIND_OFS + 4);
        assert_eq!(SIG_LEGACY.len() as u64, SIG_LEGACY_FIND_OFS + 4);
        assert_eq!(SIG_TAG_ONLY.len() as u64, 4);
    }
}
