//! The one concrete, in-scope [`Driver`] implementation: a read-only,
//! memory-mapped raw physical-memory image file (§4.1).
//!
//! A file is the simplest possible back-end — there is no vCPU, no
//! hypervisor to pause — so most of this trait's surface is either a no-op
//! or an unconditional failure, exactly as §4.1 specifies: `get_vcpureg`
//! fails unconditionally; `pause`/`resume` are no-ops.

use std::{fs::File, path::Path};

use memmap2::Mmap;
use vmi_core::{Driver, Pa, ReadOutcome, VcpuRegister, VmiError};

/// A memory-mapped physical-memory image.
pub struct FileDriver {
    mmap: Mmap,
}

impl FileDriver {
    /// Opens `path` and maps it read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VmiError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        // SAFETY: the file is not expected to be mutated out from under us;
        // the kernel's own page cache backs reads, same as every other
        // memmap2 consumer in this workspace.
        let mmap = unsafe { Mmap::map(&file) }?;

        tracing::debug!(path = %path.display(), size = mmap.len(), "mapped memory image");

        Ok(Self { mmap })
    }
}

impl Driver for FileDriver {
    fn read_pa(&self, pa: Pa, len: usize) -> Result<ReadOutcome, VmiError> {
        let start = pa.value() as usize;
        let total = self.mmap.len();

        if start >= total {
            return Ok(ReadOutcome {
                data: Vec::new(),
                short: len > 0,
            });
        }

        let end = start.saturating_add(len).min(total);
        let data = self.mmap[start..end].to_vec();
        let short = data.len() < len;

        Ok(ReadOutcome { data, short })
    }

    fn memsize(&self) -> Result<u64, VmiError> {
        Ok(self.mmap.len() as u64)
    }

    fn vcpu_register(&self, _reg: VcpuRegister, _vcpu: u32) -> Result<u64, VmiError> {
        Err(VmiError::NotSupported(
            "file driver has no vCPU state (get_vcpureg fails unconditionally in file mode)",
        ))
    }

    fn pause(&self) -> Result<(), VmiError> {
        Ok(())
    }

    fn resume(&self) -> Result<(), VmiError> {
        Ok(())
    }

    fn id_from_name(&self, _name: &str) -> Result<u64, VmiError> {
        Err(VmiError::NotSupported("file driver has no guest id/name mapping"))
    }

    fn name_from_id(&self, _id: u64) -> Result<String, VmiError> {
        Err(VmiError::NotSupported("file driver has no guest id/name mapping"))
    }

    fn check_id(&self, _id: u64) -> Result<bool, VmiError> {
        Err(VmiError::NotSupported("file driver has no guest id/name mapping"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_image(name: &str, contents: &[u8]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("vmi-driver-file-test-{name}"));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn reads_bytes_at_offset() {
        let mut contents = vec![0u8; 4096];
        contents.extend_from_slice(b"hello world");
        let path = write_image("reads-bytes", &contents);
        let driver = FileDriver::open(&path).unwrap();

        let outcome = driver.read_pa(Pa(4096), 5).unwrap();
        assert_eq!(outcome.data, b"hello");
        assert!(!outcome.short);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn short_read_past_end_of_image() {
        let path = write_image("short-read", b"0123456789");
        let driver = FileDriver::open(&path).unwrap();

        let outcome = driver.read_pa(Pa(5), 20).unwrap();
        assert_eq!(outcome.data, b"56789");
        assert!(outcome.short);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn read_entirely_past_end_is_empty_and_short() {
        let path = write_image("past-end", b"0123456789");
        let driver = FileDriver::open(&path).unwrap();

        let outcome = driver.read_pa(Pa(100), 10).unwrap();
        assert!(outcome.data.is_empty());
        assert!(outcome.short);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn vcpu_register_fails_unconditionally() {
        let path = write_image("vcpu", b"0123456789");
        let driver = FileDriver::open(&path).unwrap();

        assert!(driver.vcpu_register(VcpuRegister::Cr3, 0).is_err());

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn pause_and_resume_are_no_ops() {
        let path = write_image("pause-resume", b"0123456789");
        let driver = FileDriver::open(&path).unwrap();

        driver.pause().unwrap();
        driver.resume().unwrap();

        std::fs::remove_file(&path).unwrap();
    }
}
