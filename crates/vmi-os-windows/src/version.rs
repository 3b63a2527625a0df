//! Windows version detection from the `u16` at `kdbg + 0x14`.

use vmi_core::{EngineView, Pa, VmiError};

use crate::error::WindowsError;

/// Offset of the version-magic `u16` within the debugger data block's
/// header (right after `Size`, before the padding that aligns `KernBase`).
const VERSION_OFFSET: u64 = 0x14;

/// A recognized Windows kernel version.
///
/// The magic values match upstream's closed set of build-family markers;
/// anything else is `Unknown` and leaves OS-heuristics init failed rather
/// than guessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowsVersion {
    Win2000,
    WinXp,
    Win2003,
    WinVista,
    Win2008,
    Win7,
    Win8,
}

impl WindowsVersion {
    /// Reads the version magic from the debugger block at `kdbg_pa` and
    /// classifies it.
    pub fn detect(engine: &EngineView<'_>, kdbg_pa: Pa) -> Result<Option<Self>, VmiError> {
        let magic = engine.mem().read_u16(kdbg_pa + VERSION_OFFSET)?;
        Ok(Self::from_magic(magic))
    }

    /// Like [`Self::detect`], but fails with [`WindowsError::UnrecognizedVersion`]
    /// (carrying the offending magic) instead of returning `None`.
    pub fn detect_or_err(engine: &EngineView<'_>, kdbg_pa: Pa) -> Result<Self, VmiError> {
        let magic = engine.mem().read_u16(kdbg_pa + VERSION_OFFSET)?;
        Self::from_magic(magic).ok_or_else(|| WindowsError::UnrecognizedVersion(magic).into())
    }

    fn from_magic(magic: u16) -> Option<Self> {
        Some(match magic {
            0xC => Self::Win2000,
            0xF => Self::WinXp,
            0x10 => Self::Win2003,
            0x11 => Self::WinVista,
            0x12 => Self::Win2008,
            0x13 => Self::Win7,
            0x14 => Self::Win8,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_every_closed_set_member() {
        assert_eq!(WindowsVersion::from_magic(0xC), Some(WindowsVersion::Win2000));
        assert_eq!(WindowsVersion::from_magic(0x14), Some(WindowsVersion::Win8));
    }

    #[test]
    fn rejects_unknown_magic() {
        assert_eq!(WindowsVersion::from_magic(0xFFFF), None);
    }
}
