//! # Virtual Machine Introspection
//!
//! A library for introspecting a target's physical and virtual memory — a
//! live guest VM or a raw memory-image file — as a uniform, queryable
//! address space: enumerating kernel structures (process lists), translating
//! guest virtual addresses, and resolving kernel symbols without cooperation
//! from the guest OS.
//!
//! # Architecture
//!
//! The crate is split the way the workspace is split:
//!
//! - [`vmi_core`] — address newtypes ([`Pa`], [`Va`]), the [`Driver`] trait,
//!   the five bounded caches, the [`PagingWalker`]/[`OsBackend`] plugin
//!   traits, the configuration parser, and the [`Instance`] façade that
//!   dispatches every public operation to whichever plugins were installed
//!   at init.
//! - [`arch`] — page-table walkers, one module per architecture family.
//! - [`os`] — OS-heuristic plugins, one module per guest OS.
//! - [`driver`] — [`Driver`] back-ends. Only a raw memory-image file is
//!   shipped in-tree; a hypervisor back-end implements the same trait and
//!   plugs in without touching anything above it.
//!
//! Each of the above is gated behind a Cargo feature of the same name
//! (`arch-amd64`, `arch-arm`, `os-linux`, `os-windows`, `driver-file`), all
//! enabled by default.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use vmi_introspect::{
//!     driver::file::FileDriver,
//!     Config, InitMode, Instance, Pa,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! tracing::info!("opening memory image");
//! let driver = FileDriver::open("/path/to/memory.img")?;
//! let instance = Instance::new(Box::new(driver), Config::new(), InitMode::PARTIAL)?;
//!
//! let bytes = instance.read_pa(Pa(0x1000), 16)?;
//! println!("{bytes:02x?}");
//! # Ok(())
//! # }
//! ```
//!
//! Reaching `complete` state — the state that unlocks symbol lookups and
//! virtual-address reads — additionally requires selecting a page-table
//! walker and running (or skipping, via config) OS-heuristic discovery; see
//! [`Instance::set_paging`] and [`Instance::set_os`].
//!
//! # Current limitations
//!
//! - No write support: this is a read-only introspection engine.
//! - The only in-tree [`Driver`] is a raw memory-image file; a hypervisor
//!   back-end (Xen, KVM) implements the same trait but lives outside this
//!   crate.
//! - `get_va_pages` enumeration is unimplemented on ARM (§4.3 of the design).

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub use vmi_core::*;

/// Architecture-specific page-table walkers.
pub mod arch {
    pub use vmi_core::arch::*;

    /// x86 legacy 32-bit, PAE, and IA-32e (long mode) walkers.
    #[cfg(feature = "arch-amd64")]
    pub mod amd64 {
        pub use vmi_arch_amd64::*;
    }

    /// The ARMv7 short-descriptor walker.
    #[cfg(feature = "arch-arm")]
    pub mod arm {
        pub use vmi_arch_arm::*;
    }
}

/// `Driver` back-ends: uniform physical-memory access over a hypervisor,
/// KVM, or a raw image file.
pub mod driver {
    /// A memory-mapped, read-only raw physical-memory image file.
    #[cfg(feature = "driver-file")]
    pub mod file {
        pub use vmi_driver_file::*;
    }
}

/// OS-heuristic plugins: kernel/base discovery and symbol resolution for a
/// guest whose OS is not otherwise known.
pub mod os {
    pub use vmi_core::os::*;

    /// Linux: System.map lookup and `init_task`-rooted process walking.
    #[cfg(feature = "os-linux")]
    pub mod linux {
        pub use vmi_os_linux::*;
    }

    /// Windows: the four-strategy KDBG locator cascade, version detection,
    /// and `_EPROCESS`-list process walking.
    #[cfg(feature = "os-windows")]
    pub mod windows {
        pub use vmi_os_windows::*;
    }
}
