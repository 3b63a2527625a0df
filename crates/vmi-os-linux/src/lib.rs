//! Linux OS heuristics: System.map symbol lookup and `init_task`-rooted
//! process-list walking, wired up behind [`OsBackend`].
//!
//! Unlike Windows, Linux carries no in-image debugger structure this crate
//! can discover by scanning — every symbol resolution here goes through an
//! externally supplied System.map-style text file (§4.5).

mod sysmap;
mod task;

pub use self::{
    sysmap::SysMap,
    task::{ProcessEntry, TaskOffsets},
};

use std::path::PathBuf;

use vmi_core::{Config, EngineView, OsBackend, OsKind, Pa, Va, VmiError};

/// The Linux OS plugin: a lazily loaded System.map and the `task_struct`
/// field offsets needed to walk the process list.
pub struct LinuxOs {
    sysmap: SysMap,
    offsets: TaskOffsets,
    kernel_dtb: Pa,
}

impl LinuxOs {
    /// Builds a Linux OS plugin from configuration.
    ///
    /// `config` must supply `sysmap` (§4.5: "if a System.map-style text file
    /// is configured, load it lazily"); `linux_tasks`/`linux_mm`/
    /// `linux_pid`/`linux_name`/`linux_pgd` override the `task_struct`/
    /// `mm_struct` layout, each falling back to the well-known x86-64
    /// offsets when absent.
    pub fn discover(dtb: Pa, config: &Config) -> Result<Self, VmiError> {
        let sysmap_path = config.require_str("sysmap")?;

        let defaults = TaskOffsets::X86_64;
        let offsets = TaskOffsets {
            tasks: config.int("linux_tasks").unwrap_or(defaults.tasks),
            mm: config.int("linux_mm").unwrap_or(defaults.mm),
            pid: config.int("linux_pid").unwrap_or(defaults.pid),
            name: config.int("linux_name").unwrap_or(defaults.name),
            pgd: config.int("linux_pgd").unwrap_or(defaults.pgd),
        };

        Ok(Self {
            sysmap: SysMap::new(PathBuf::from(sysmap_path)),
            offsets,
            kernel_dtb: dtb,
        })
    }

    /// Lists every task reachable from `init_task`.
    pub fn processes(&self, engine: &EngineView<'_>) -> Result<Vec<ProcessEntry>, VmiError> {
        let init_task_va = self.resolve_symbol(engine, "init_task")?;
        task::walk_tasks(engine, self.kernel_dtb, &self.offsets, init_task_va)
    }
}

impl OsBackend for LinuxOs {
    fn kind(&self) -> OsKind {
        OsKind::Linux
    }

    fn kernel_dtb(&self) -> Pa {
        self.kernel_dtb
    }

    fn resolve_symbol(&self, _engine: &EngineView<'_>, symbol: &str) -> Result<Va, VmiError> {
        self.sysmap.lookup(symbol).map(Va)
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
