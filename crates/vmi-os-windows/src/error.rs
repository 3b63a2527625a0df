//! Errors specific to Windows OS-heuristic discovery.
//!
//! Everything here is wrapped into [`VmiError::Os`](vmi_core::VmiError::Os)
//! at the [`OsBackend`](vmi_core::OsBackend) boundary, the same way the
//! teacher's `vmi-os-windows` keeps a crate-local error enum that converts
//! into the core error type rather than overloading a generic variant.

use vmi_core::VmiError;

/// Errors raised while locating or classifying a Windows kernel.
#[derive(thiserror::Error, Debug)]
pub enum WindowsError {
    /// Every KDBG-locator strategy in the cascade was exhausted without a hit.
    #[error("unable to locate KdDebuggerDataBlock by any strategy")]
    KdbgNotFound,

    /// The `u16` at `kdbg + 0x14` did not match any member of the closed
    /// version-magic set.
    #[error("unrecognized Windows version magic 0x{0:x} at kdbg+0x14")]
    UnrecognizedVersion(u16),
}

impl From<WindowsError> for VmiError {
    fn from(value: WindowsError) -> Self {
        VmiError::os(value)
    }
}
