//! The OS-plugin seam: [`OsBackend`] is implemented by `vmi-os-windows` and
//! `vmi-os-linux`; the façade in [`instance`](crate::instance) dispatches to
//! whichever one was selected at init through this trait alone.

use crate::{
    addr::{Pa, Va},
    arch::{Memory, PagingWalker},
    driver::{Driver, VcpuRegister},
    error::VmiError,
};

/// Which guest OS an [`Instance`](crate::instance::Instance) has identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsKind {
    /// Not yet determined.
    Unknown,
    /// Linux.
    Linux,
    /// Windows.
    Windows,
}

/// The capabilities an OS plugin needs from the engine to do its work:
/// physical reads (through the page cache), address translation (through
/// the selected walker), and vCPU register reads (through the driver).
///
/// Bundled into one borrow so `OsBackend` methods take a single parameter
/// instead of three.
pub struct EngineView<'a> {
    mem: Memory<'a>,
    walker: &'a dyn PagingWalker,
    driver: &'a dyn Driver,
}

impl<'a> EngineView<'a> {
    /// Creates a new view over the given memory accessor, walker, and
    /// driver.
    pub fn new(mem: Memory<'a>, walker: &'a dyn PagingWalker, driver: &'a dyn Driver) -> Self {
        Self {
            mem,
            walker,
            driver,
        }
    }

    /// The page-aligned physical-memory accessor.
    pub fn mem(&self) -> &Memory<'a> {
        &self.mem
    }

    /// Translates a virtual address under `dtb` using the active walker.
    pub fn translate(&self, dtb: Pa, va: Va) -> Result<Pa, VmiError> {
        self.walker.translate(&self.mem, dtb, va).map(|info| info.paddr)
    }

    /// Enumerates every present leaf mapping reachable from `dtb` using the
    /// active walker.
    pub fn enumerate(&self, dtb: Pa) -> Result<Vec<(Va, crate::page::PageSize)>, VmiError> {
        self.walker.enumerate(&self.mem, dtb)
    }

    /// Reads a virtual-CPU register.
    pub fn vcpu_register(&self, reg: VcpuRegister, vcpu: u32) -> Result<u64, VmiError> {
        self.driver.vcpu_register(reg, vcpu)
    }

    /// Reads `len` bytes starting at `va` under `dtb`, chopping the request
    /// at page boundaries and translating each page independently, per
    /// §4.6's `read_va` contract.
    pub fn read_va(&self, dtb: Pa, va: Va, len: usize) -> Result<Vec<u8>, VmiError> {
        let mut out = Vec::with_capacity(len);
        let mut remaining = len;
        let mut cursor = va;

        while remaining > 0 {
            let page_offset = cursor.page_offset(12) as usize;
            let chunk = remaining.min(4096 - page_offset);

            let pa = self.translate(dtb, cursor)?;
            let page = self.mem.read_page(pa.page_base(12))?;
            out.extend_from_slice(&page[page_offset..page_offset + chunk]);

            cursor = cursor + chunk as u64;
            remaining -= chunk;
        }

        Ok(out)
    }
}

/// An OS-specific introspection plugin.
///
/// Implementations are produced by OS-heuristic discovery (§4.4, §4.5) and
/// held behind a `Box<dyn OsBackend>` by the façade once an instance
/// transitions `partial -> complete`.
pub trait OsBackend {
    /// Which OS this backend identified.
    fn kind(&self) -> OsKind;

    /// The kernel's own directory table base, used as the translation root
    /// for `pid == 0` in `read_va`/`pagetable_lookup`.
    fn kernel_dtb(&self) -> Pa;

    /// Resolves a kernel symbol name to its virtual address.
    fn resolve_symbol(&self, engine: &EngineView<'_>, symbol: &str) -> Result<Va, VmiError>;

    /// Resolves a pid to its directory table base by walking the guest's
    /// process list; called only on a pid-cache miss.
    fn resolve_pid(&self, engine: &EngineView<'_>, pid: u64) -> Result<Pa, VmiError>;
}
