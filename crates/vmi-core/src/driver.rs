//! The uniform driver contract served by a hypervisor, KVM, or a raw image
//! file.
//!
//! Everything above this trait — the page cache, the walkers, the OS
//! heuristics — is written against [`Driver`] alone, so swapping Xen for a
//! file-backed dump changes nothing else in the engine.

use crate::{addr::Pa, error::VmiError};

/// A virtual-CPU register a [`Driver`] can be asked for.
///
/// Only the registers the engine actually needs (DTB discovery, KPCR
/// location) are modeled; a driver that cannot supply one should return
/// [`VmiError::NotSupported`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VcpuRegister {
    /// CR3 — the current directory table base.
    Cr3,
    /// CR4 — used to detect PAE.
    Cr4,
    /// EFER — used to detect long mode.
    Efer,
    /// FS_BASE — reaches `_KPCR` on 32-bit Windows.
    FsBase,
    /// GS_BASE — reaches `_KPCR` on 64-bit Windows.
    GsBase,
    /// TTBR0 — the ARM translation table base register.
    Ttbr0,
}

/// The outcome of a physical-memory read that may come up short.
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    /// The bytes actually read, always a prefix of the requested range.
    pub data: Vec<u8>,
    /// Whether the read came up short of the requested length.
    pub short: bool,
}

/// The uniform contract a VMI back-end implements.
///
/// A back-end is selected once, at [`Instance`](crate::instance::Instance)
/// construction, and is opaque to every caller above it. Implementations
/// for Xen and KVM are hypervisor-specific and out of scope for this crate;
/// [`vmi-driver-file`](https://docs.rs/vmi-driver-file) ships the one
/// concrete, in-scope back-end: a read-only, memory-mapped image file.
pub trait Driver {
    /// Reads up to `len` bytes starting at `pa`.
    ///
    /// A read that straddles an unmapped page returns the prefix that
    /// succeeded with [`ReadOutcome::short`] set, rather than failing the
    /// whole request — the call site decides whether a short read is
    /// acceptable.
    fn read_pa(&self, pa: Pa, len: usize) -> Result<ReadOutcome, VmiError>;

    /// Returns the total size of physical memory, in bytes.
    fn memsize(&self) -> Result<u64, VmiError>;

    /// Returns the value of a virtual-CPU register.
    ///
    /// File-mode drivers have no vCPU state and must fail unconditionally.
    fn vcpu_register(&self, reg: VcpuRegister, vcpu: u32) -> Result<u64, VmiError>;

    /// Pauses the virtual machine.
    ///
    /// A no-op for file-mode drivers.
    fn pause(&self) -> Result<(), VmiError>;

    /// Resumes the virtual machine.
    ///
    /// A no-op for file-mode drivers. Every consumer of the engine must
    /// resume before giving up its reference, because resuming flushes
    /// every cache (§5 ordering guarantee).
    fn resume(&self) -> Result<(), VmiError>;

    /// Resolves a guest's id (e.g. Xen domid) from its name.
    fn id_from_name(&self, name: &str) -> Result<u64, VmiError>;

    /// Resolves a guest's name from its id.
    fn name_from_id(&self, id: u64) -> Result<String, VmiError>;

    /// Checks whether a guest id refers to a live guest.
    fn check_id(&self, id: u64) -> Result<bool, VmiError>;
}

/// An RAII guard that resumes the virtual machine when dropped.
///
/// The engine offers scoped pause/resume but never auto-pauses; callers who
/// want a pause to definitely be matched by a resume — even across an early
/// return or a panic unwind — should hold one of these.
pub struct PauseGuard<'a> {
    driver: &'a dyn Driver,
    resumed: bool,
}

impl<'a> PauseGuard<'a> {
    /// Pauses `driver` and returns a guard that will resume it on drop.
    pub fn new(driver: &'a dyn Driver) -> Result<Self, VmiError> {
        driver.pause()?;
        Ok(Self {
            driver,
            resumed: false,
        })
    }

    /// Resumes the virtual machine now, rather than waiting for drop.
    pub fn resume(mut self) -> Result<(), VmiError> {
        self.resumed = true;
        self.driver.resume()
    }
}

impl Drop for PauseGuard<'_> {
    fn drop(&mut self) {
        if !self.resumed {
            if let Err(err) = self.driver.resume() {
                tracing::warn!(%err, "failed to resume virtual machine in PauseGuard::drop");
            }
        }
    }
}
