//! Walking the kernel's circular `task_struct` list rooted at `init_task`.

use vmi_core::{EngineView, Pa, Va, VmiError};

/// Byte offsets of the `task_struct`/`mm_struct` fields this walk touches.
///
/// Defaults are the well-known x86-64 layout; overridden via
/// `linux_tasks`/`linux_mm`/`linux_pid`/`linux_name`/`linux_pgd`.
#[derive(Debug, Clone, Copy)]
pub struct TaskOffsets {
    /// `tasks` — the `list_head` linking sibling tasks, inside `task_struct`.
    pub tasks: u64,
    /// `mm` — pointer to the `mm_struct`, inside `task_struct`.
    pub mm: u64,
    /// `pid` — the process id, inside `task_struct`.
    pub pid: u64,
    /// `comm` — the short process name, inside `task_struct`.
    pub name: u64,
    /// `pgd` — the page global directory pointer, inside `mm_struct`.
    pub pgd: u64,
}

impl TaskOffsets {
    /// The offsets documented for a representative x86-64 kernel.
    pub const X86_64: Self = Self {
        tasks: 0x3c0,
        mm: 0x3a8,
        pid: 0x3f8,
        name: 0x650,
        pgd: 0x48,
    };
}

const TASK_COMM_LEN: usize = 16;

/// One process discovered while walking `init_task`'s sibling list.
#[derive(Debug, Clone)]
pub struct ProcessEntry {
    /// `pid`.
    pub pid: u64,
    /// `comm`, decoded up to its first NUL (or the full buffer if none is
    /// present).
    pub name: String,
    /// The process's directory table base, i.e. `mm_struct.pgd` translated
    /// to a physical address.
    pub dtb: Pa,
}

/// Walks the circular list rooted at `init_task_va + offsets.tasks` and
/// returns every task found, including `init_task` itself.
///
/// Kernel threads (no `mm_struct`) are included with `dtb` set to
/// `kernel_dtb`, matching `read_va(_, 0, _)`'s convention that pid 0 means
/// "the kernel's own address space".
///
/// Bounded at [`MAX_TASKS`] entries so a corrupted or cyclic-but-wrong list
/// can't loop forever.
pub fn walk_tasks(
    engine: &EngineView<'_>,
    kernel_dtb: Pa,
    offsets: &TaskOffsets,
    init_task_va: Va,
) -> Result<Vec<ProcessEntry>, VmiError> {
    const MAX_TASKS: usize = 8192;

    let list_head_va = init_task_va + offsets.tasks;
    let mut out = Vec::new();
    let mut cur = read_va_ptr(engine, kernel_dtb, list_head_va)?;

    for _ in 0..MAX_TASKS {
        if cur.is_null() {
            break;
        }

        let task_va = cur - offsets.tasks;

        let pid = read_va_u32(engine, kernel_dtb, task_va + offsets.pid)? as u64;
        let name_bytes = engine.read_va(kernel_dtb, task_va + offsets.name, TASK_COMM_LEN)?;

        let mm_va = read_va_ptr(engine, kernel_dtb, task_va + offsets.mm)?;
        let dtb = if mm_va.is_null() {
            kernel_dtb
        } else {
            let pgd_va = read_va_ptr(engine, kernel_dtb, mm_va + offsets.pgd)?;
            engine.translate(kernel_dtb, pgd_va)?
        };

        out.push(ProcessEntry {
            pid,
            name: decode_comm(&name_bytes),
            dtb,
        });

        if task_va == init_task_va {
            break;
        }

        cur = read_va_ptr(engine, kernel_dtb, cur)?;
        if cur == list_head_va {
            break;
        }
    }

    Ok(out)
}

fn read_va_ptr(engine: &EngineView<'_>, dtb: Pa, va: Va) -> Result<Va, VmiError> {
    let bytes = engine.read_va(dtb, va, 8)?;
    let value = u64::from_le_bytes(
        bytes
            .try_into()
            .map_err(|_| VmiError::NotSupported("read_va_ptr: short read"))?,
    );
    Ok(Va(value))
}

fn read_va_u32(engine: &EngineView<'_>, dtb: Pa, va: Va) -> Result<u32, VmiError> {
    let bytes = engine.read_va(dtb, va, 4)?;
    Ok(u32::from_le_bytes(bytes.try_into().map_err(|_| {
        VmiError::NotSupported("read_va_u32: short read")
    })?))
}

fn decode_comm(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_nul_terminated_comm() {
        let mut buf = [0u8; 16];
        buf[..4].copy_from_slice(b"init");
        assert_eq!(decode_comm(&buf), "init");
    }
}
