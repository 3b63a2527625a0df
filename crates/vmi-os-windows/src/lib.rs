//! Windows OS heuristics: KDBG discovery, version detection, and the
//! `_EPROCESS` list walk, wired up behind [`OsBackend`].
//!
//! Everything here works from a located `KdDebuggerDataBlock` — see
//! [`kdbg`] for the four-strategy cascade that finds it and [`version`]
//! for classifying the kernel build it reports.

mod error;
mod kdbg;
mod pe;
mod process;
mod version;

pub use self::{
    error::WindowsError,
    kdbg::{
        FastStrategy, FasterStrategy, InstantStrategy, KdbgLocation, KdbgStrategy, SlowStrategy,
        field_offset,
    },
    process::{ProcessEntry, ProcessOffsets},
    version::WindowsVersion,
};

use vmi_core::{Config, EngineView, OsBackend, OsKind, Pa, Va, VmiError};

/// The Windows OS plugin: a located debugger block, its detected version,
/// and the `_EPROCESS` offsets needed to walk the process list.
pub struct WindowsOs {
    kdbg: KdbgLocation,
    version: WindowsVersion,
    kernel_dtb: Pa,
    process_offsets: ProcessOffsets,
}

impl WindowsOs {
    /// Runs the KDBG locator cascade and version detection, building
    /// a ready-to-use Windows OS plugin.
    ///
    /// `config` supplies `win_kdvb` for a direct, VCPU-independent boot (the
    /// debugger block's own virtual address, as printed by a prior run's
    /// "consider persisting" suggestion); when present it skips the cascade
    /// entirely. Otherwise `win_kpcr`/`win_kdbg` enable the instant strategy
    /// (both required together, since one offset without the other can't
    /// locate anything). `win_tasks`/`win_pdbase`/`win_pid`/`win_pname`
    /// override the `_EPROCESS` layout in either path; any of the latter
    /// four left unset falls back to the well-known Win8-x64 offsets.
    pub fn discover(
        engine: &EngineView<'_>,
        dtb: Pa,
        ia32e: bool,
        config: &Config,
    ) -> Result<Self, VmiError> {
        let defaults = ProcessOffsets::WIN8_X64;
        let process_offsets = ProcessOffsets {
            active_process_links: config.int("win_tasks").unwrap_or(defaults.active_process_links),
            directory_table_base: config.int("win_pdbase").unwrap_or(defaults.directory_table_base),
            unique_process_id: config.int("win_pid").unwrap_or(defaults.unique_process_id),
            image_file_name: config.int("win_pname").unwrap_or(defaults.image_file_name),
        };

        if let Some(kdvb) = config.int("win_kdvb") {
            let kdbg_va = Va(kdvb);
            let kdbg_pa = engine.translate(dtb, kdbg_va)?;
            let kernbase_va = kdbg::read_kernbase(engine, kdbg_pa)?;
            let location = KdbgLocation {
                kdbg_pa,
                kdbg_va: Some(kdbg_va),
                kernbase_va,
            };

            let version = WindowsVersion::detect_or_err(engine, location.kdbg_pa)?;

            return Ok(Self {
                kdbg: location,
                version,
                kernel_dtb: dtb,
                process_offsets,
            });
        }

        let mut strategies: Vec<Box<dyn KdbgStrategy>> = Vec::new();

        if let (Some(kpcr_offset), Some(kdbg_offset)) =
            (config.int("win_kpcr"), config.int("win_kdbg"))
        {
            strategies.push(Box::new(InstantStrategy {
                kpcr_offset,
                kdbg_offset,
            }));
        }
        strategies.push(Box::new(FasterStrategy));
        strategies.push(Box::new(FastStrategy));
        strategies.push(Box::new(SlowStrategy));

        let location =
            kdbg::locate_kdbg(&strategies, engine, ia32e, dtb)?.ok_or(WindowsError::KdbgNotFound)?;

        let version = WindowsVersion::detect_or_err(engine, location.kdbg_pa)?;

        Ok(Self {
            kdbg: location,
            version,
            kernel_dtb: dtb,
            process_offsets,
        })
    }

    /// Builds a plugin directly from an already-located debugger block,
    /// skipping the cascade entirely — for callers that locate KDBG some
    /// other way (e.g. a prefilled `KDDEBUGGER_DATA64`) and just want the
    /// rest of the plugin built around it. [`discover`](Self::discover)'s
    /// `win_kdvb` config path builds its own `KdbgLocation` instead, since
    /// it also needs to apply the `_EPROCESS`-offset overrides.
    pub fn from_location(
        engine: &EngineView<'_>,
        kdbg: KdbgLocation,
        kernel_dtb: Pa,
    ) -> Result<Self, VmiError> {
        let version = WindowsVersion::detect_or_err(engine, kdbg.kdbg_pa)?;

        Ok(Self {
            kdbg,
            version,
            kernel_dtb,
            process_offsets: ProcessOffsets::WIN8_X64,
        })
    }

    /// The detected kernel version.
    pub fn version(&self) -> WindowsVersion {
        self.version
    }

    /// The located debugger block.
    pub fn kdbg(&self) -> KdbgLocation {
        self.kdbg
    }

    /// Lists every process reachable from `PsActiveProcessHead`.
    pub fn processes(
        &self,
        engine: &EngineView<'_>,
    ) -> Result<Vec<ProcessEntry>, VmiError> {
        let head_va = self.resolve_symbol(engine, "PsActiveProcessHead")?;
        process::walk_processes(engine, self.kernel_dtb, &self.process_offsets, head_va)
    }
}

impl OsBackend for WindowsOs {
    fn kind(&self) -> OsKind {
        OsKind::Windows
    }

    fn kernel_dtb(&self) -> Pa {
        self.kernel_dtb
    }

    fn resolve_symbol(&self, engine: &EngineView<'_>, symbol: &str) -> Result<Va, VmiError> {
        let offset = field_offset(symbol).ok_or_else(|| VmiError::UnknownSymbol(symbol.to_string()))?;
        let value = engine.mem().read_u64(self.kdbg.kdbg_pa + offset)?;
        Ok(Va(value))
    }

    fn resolve_pid(&self, engine: &EngineView<'_>, pid: u64) -> Result<Pa, VmiError> {
        let processes = self.processes(engine)?;
        processes
            .into_iter()
            .find(|p| p.pid == pid)
            .map(|p| p.dtb)
            .ok_or(VmiError::PidUnknown(pid))
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, collections::HashMap};

    use vmi_core::{Caches, ConfigValue, Driver, Memory, PageInfo, PageMode, PageSize, ReadOutcome, VcpuRegister};

    use super::*;

    struct FlatDriver {
        pages: RefCell<HashMap<u64, [u8; 4096]>>,
    }

    impl FlatDriver {
        fn new() -> Self {
            Self {
                pages: RefCell::new(HashMap::new()),
            }
        }

        fn write(&self, pa: u64, bytes: &[u8]) {
            let page_pa = pa & !0xFFF;
            let offset = (pa & 0xFFF) as usize;
            let mut pages = self.pages.borrow_mut();
            let page = pages.entry(page_pa).or_insert([0u8; 4096]);
            page[offset..offset + bytes.len()].copy_from_slice(bytes);
        }

        fn write_u16(&self, pa: u64, value: u16) {
            self.write(pa, &value.to_le_bytes());
        }

        fn write_u64(&self, pa: u64, value: u64) {
            self.write(pa, &value.to_le_bytes());
        }
    }

    impl Driver for FlatDriver {
        fn read_pa(&self, pa: Pa, len: usize) -> Result<ReadOutcome, VmiError> {
            let page_pa = pa.value() & !0xFFF;
            let offset = (pa.value() & 0xFFF) as usize;
            let pages = self.pages.borrow();
            let page = pages.get(&page_pa).copied().unwrap_or([0u8; 4096]);
            Ok(ReadOutcome {
                data: page[offset..offset + len].to_vec(),
                short: false,
            })
        }

        fn memsize(&self) -> Result<u64, VmiError> {
            Ok(1 << 32)
        }

        fn vcpu_register(&self, _reg: VcpuRegister, _vcpu: u32) -> Result<u64, VmiError> {
            Err(VmiError::NotSupported("vcpu_register"))
        }

        fn pause(&self) -> Result<(), VmiError> {
            Ok(())
        }

        fn resume(&self) -> Result<(), VmiError> {
            Ok(())
        }

        fn id_from_name(&self, _name: &str) -> Result<u64, VmiError> {
            Err(VmiError::NotSupported("id_from_name"))
        }

        fn name_from_id(&self, _id: u64) -> Result<String, VmiError> {
            Err(VmiError::NotSupported("name_from_id"))
        }

        fn check_id(&self, _id: u64) -> Result<bool, VmiError> {
            Ok(true)
        }
    }

    struct IdentityWalker;

    impl vmi_core::PagingWalker for IdentityWalker {
        fn page_mode(&self) -> PageMode {
            PageMode::Ia32e
        }

        fn translate(&self, _mem: &Memory<'_>, dtb: Pa, vaddr: Va) -> Result<PageInfo, VmiError> {
            Ok(PageInfo {
                vaddr,
                dtb,
                paddr: Pa(vaddr.value()),
                page_size: PageSize::Size4Kb,
                levels: [None; 4],
            })
        }

        fn enumerate(&self, _mem: &Memory<'_>, _dtb: Pa) -> Result<Vec<(Va, PageSize)>, VmiError> {
            Ok(Vec::new())
        }
    }

    /// `win_kdvb` takes the shortcut path straight to a fully built plugin,
    /// without ever touching a vCPU register or running the locator cascade.
    #[test]
    fn discover_uses_win_kdvb_when_present() {
        let driver = FlatDriver::new();
        let kdbg_pa = 0x1_2000u64;
        let kernbase_va = 0xFFFF_F800_0000_0000u64;

        driver.write_u64(kdbg_pa + 0x18, kernbase_va); // KernBase
        driver.write_u16(kdbg_pa + 0x14, 0x14); // Win8 version magic

        let mut config = Config::new();
        config.insert("win_kdvb", ConfigValue::Int(kdbg_pa));

        let caches = Caches::new();
        let mem = Memory::new(&driver, &caches.page);
        let walker = IdentityWalker;
        let engine = EngineView::new(mem, &walker, &driver);

        let os = WindowsOs::discover(&engine, Pa(0), true, &config).unwrap();

        assert_eq!(os.version(), WindowsVersion::Win8);
        assert_eq!(os.kdbg().kdbg_pa, Pa(kdbg_pa));
        assert_eq!(os.kdbg().kdbg_va, Some(Va(kdbg_pa)));
        assert_eq!(os.kdbg().kernbase_va, Va(kernbase_va));
    }
}
