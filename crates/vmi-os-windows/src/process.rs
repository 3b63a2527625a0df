//! Walking the kernel's doubly linked process list (`PsActiveProcessHead` /
//! `_EPROCESS.ActiveProcessLinks`).
//!
//! This is the one in-image structure walk promoted to a first-class
//! operation rather than left as a generic field read: process listing is
//! ubiquitous enough in VMI use that every OS heuristic here supports it
//! directly.

use vmi_core::{EngineView, Pa, Va, VmiError};

/// Byte offsets of the `_EPROCESS` fields this walk touches, relative to
/// the start of the structure.
///
/// Defaults are the well-known Win8-x64 layout; other builds configure
/// these via `win_tasks`/`win_pdbase`/`win_pid`/`win_pname`.
#[derive(Debug, Clone, Copy)]
pub struct ProcessOffsets {
    /// `ActiveProcessLinks` — the `LIST_ENTRY` linking sibling processes.
    pub active_process_links: u64,
    /// `Pcb.DirectoryTableBase` — the process's own CR3/DTB.
    pub directory_table_base: u64,
    /// `UniqueProcessId`.
    pub unique_process_id: u64,
    /// `ImageFileName` — a short, possibly-truncated, non-null-terminated
    /// ASCII buffer.
    pub image_file_name: u64,
}

impl ProcessOffsets {
    /// The offsets documented for a Win8-x64 kernel.
    pub const WIN8_X64: Self = Self {
        active_process_links: 0x2e8,
        directory_table_base: 0x28,
        unique_process_id: 0x2e0,
        image_file_name: 0x438,
    };
}

const IMAGE_FILE_NAME_LEN: usize = 16;

/// One process discovered while walking the active process list.
#[derive(Debug, Clone)]
pub struct ProcessEntry {
    /// `UniqueProcessId`.
    pub pid: u64,
    /// `ImageFileName`, decoded up to its first NUL (or the full buffer if
    /// none is present).
    pub name: String,
    /// The process's own directory table base.
    pub dtb: Pa,
}

/// Walks the circular list rooted at `list_head_va` (the VA of
/// `PsActiveProcessHead`, a bare `LIST_ENTRY`, not an `_EPROCESS`) and
/// returns every process found.
///
/// Bounded at [`MAX_PROCESSES`] entries so a corrupted or cyclic-but-wrong
/// list can't loop forever.
pub fn walk_processes(
    engine: &EngineView<'_>,
    dtb: Pa,
    offsets: &ProcessOffsets,
    list_head_va: Va,
) -> Result<Vec<ProcessEntry>, VmiError> {
    const MAX_PROCESSES: usize = 4096;

    let mut out = Vec::new();
    let mut cur = read_va_ptr(engine, dtb, list_head_va)?;

    for _ in 0..MAX_PROCESSES {
        if cur.is_null() || cur == list_head_va {
            break;
        }

        let eprocess_va = cur - offsets.active_process_links;

        let pid = read_va_u64(engine, dtb, eprocess_va + offsets.unique_process_id)?;
        let dtb_value = read_va_u64(engine, dtb, eprocess_va + offsets.directory_table_base)?;
        let name_bytes = engine.read_va(
            dtb,
            eprocess_va + offsets.image_file_name,
            IMAGE_FILE_NAME_LEN,
        )?;

        out.push(ProcessEntry {
            pid,
            name: decode_image_name(&name_bytes),
            dtb: Pa(dtb_value),
        });

        cur = read_va_ptr(engine, dtb, cur)?;
    }

    Ok(out)
}

fn read_va_ptr(engine: &EngineView<'_>, dtb: Pa, va: Va) -> Result<Va, VmiError> {
    Ok(Va(read_va_u64(engine, dtb, va)?))
}

fn read_va_u64(engine: &EngineView<'_>, dtb: Pa, va: Va) -> Result<u64, VmiError> {
    let bytes = engine.read_va(dtb, va, 8)?;
    Ok(u64::from_le_bytes(bytes.try_into().map_err(|_| {
        VmiError::NotSupported("read_va_u64: short read")
    })?))
}

fn decode_image_name(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, collections::HashMap};

    use vmi_core::{Caches, Driver, Memory, PageInfo, PageMode, PageSize, ReadOutcome, VcpuRegister};

    use super::*;

    #[test]
    fn decodes_nul_terminated_name() {
        let mut buf = [0u8; 16];
        buf[..6].copy_from_slice(b"System");
        assert_eq!(decode_image_name(&buf), "System");
    }

    #[test]
    fn decodes_full_buffer_without_nul() {
        let buf = *b"exactly16bytes!!";
        assert_eq!(decode_image_name(&buf), "exactly16bytes!!");
    }

    /// An identity-mapped `Driver` double: `pa == va` for every address, so
    /// tests can lay out an `_EPROCESS` list directly in "physical" memory
    /// without a real page table.
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

    /// Scenario 5: a single-entry, self-looping `PsActiveProcessHead` whose
    /// only process is `[4] "System"`, per the well-known Win8-x64 offsets.
    #[test]
    fn scenario_5_windows_process_walk() {
        let driver = FlatDriver::new();
        let offsets = ProcessOffsets::WIN8_X64;

        let list_head_va = 0x1000u64;
        let eprocess_va = 0x2000u64;
        let links_va = eprocess_va + offsets.active_process_links;

        // PsActiveProcessHead.Flink points at the one entry; the entry's
        // own Flink loops back to the head, ending the walk.
        driver.write_u64(list_head_va, links_va);
        driver.write_u64(links_va, list_head_va);

        driver.write_u64(eprocess_va + offsets.unique_process_id, 4);
        driver.write_u64(eprocess_va + offsets.directory_table_base, 0x18_5000);
        driver.write(
            eprocess_va + offsets.image_file_name,
            b"System\0\0\0\0\0\0\0\0\0\0",
        );

        let caches = Caches::new();
        let mem = Memory::new(&driver, &caches.page);
        let walker = IdentityWalker;
        let engine = vmi_core::EngineView::new(mem, &walker, &driver);

        let processes = walk_processes(&engine, Pa(0), &offsets, Va(list_head_va)).unwrap();

        assert_eq!(processes.len(), 1);
        assert_eq!(processes[0].pid, 4);
        assert_eq!(processes[0].name, "System");
        assert_eq!(processes[0].dtb, Pa(0x18_5000));
    }
}
