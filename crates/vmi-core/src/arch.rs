//! The paging-mode enum, the physical-memory accessor every walker reads
//! through, and the walker plugin trait.

use std::rc::Rc;

use zerocopy::{FromBytes, IntoBytes};

use crate::{
    addr::Pa,
    cache::{BorrowedPage, PageCache},
    driver::Driver,
    error::VmiError,
    page::{PageInfo, PageSize},
};

/// The paging scheme in effect for an [`Instance`](crate::instance::Instance).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageMode {
    /// Not yet determined.
    Unknown,
    /// x86 2-level paging, 4 KiB/4 MiB leaves.
    Legacy32,
    /// x86 PAE 3-level paging, 4 KiB/2 MiB leaves.
    Pae,
    /// x86-64 IA-32e 4-level paging, 4 KiB/2 MiB/1 GiB leaves.
    Ia32e,
    /// ARMv7 short-descriptor format.
    Arm32,
}

impl PageMode {
    /// The log2 of the base page size for this mode; every mode here uses a
    /// 4 KiB base page except ARM, which additionally supports a 1 KiB tiny
    /// page at the lowest level.
    pub const fn page_shift(self) -> u32 {
        12
    }
}

/// A page-aligned physical-memory reader that transparently consults the
/// page cache before falling back to the driver.
///
/// Every walker reads leaf and intermediate descriptors exclusively through
/// this type — never directly through a [`Driver`] — so that the page
/// cache's correctness rule (§3: "a cached entry remains valid until the VM
/// is resumed or an explicit flush occurs") applies uniformly to every
/// architecture.
pub struct Memory<'a> {
    driver: &'a dyn Driver,
    cache: &'a PageCache,
}

const PAGE_SIZE: usize = 4096;

impl<'a> Memory<'a> {
    /// Creates a new accessor over `driver`, backed by `cache`.
    pub fn new(driver: &'a dyn Driver, cache: &'a PageCache) -> Self {
        Self { driver, cache }
    }

    /// Returns the total size of physical memory.
    pub fn memsize(&self) -> Result<u64, VmiError> {
        self.driver.memsize()
    }

    /// Reads the 4 KiB page containing `pa`, serving it from the cache on a
    /// hit and invalidating the cache entry on a failed re-fetch.
    pub fn read_page(&self, pa: Pa) -> Result<BorrowedPage, VmiError> {
        let page_pa = pa.page_base(12);

        if let Some(page) = self.cache.get(page_pa) {
            return Ok(page);
        }

        let outcome = match self.driver.read_pa(page_pa, PAGE_SIZE) {
            Ok(outcome) if !outcome.short && outcome.data.len() == PAGE_SIZE => outcome,
            Ok(_) => {
                // A short read here means the page is simply absent.
                self.cache.invalidate(page_pa);
                return Err(VmiError::PageNotPresent {
                    vaddr: crate::addr::Va(page_pa.0),
                    levels: [None; 4],
                });
            }
            Err(err) => {
                // Don't let a stale entry linger past a failed re-fetch.
                self.cache.invalidate(page_pa);
                return Err(err);
            }
        };

        let page: BorrowedPage = Rc::from(outcome.data.into_boxed_slice());
        self.cache.insert(page_pa, page.clone());
        Ok(page)
    }

    /// Reads a little-endian, fixed-size, plain-old-data value at `pa`.
    ///
    /// `pa` need not be page-aligned; the value must not straddle a page
    /// boundary.
    pub fn read_pod<T>(&self, pa: Pa) -> Result<T, VmiError>
    where
        T: FromBytes + IntoBytes,
    {
        let size = std::mem::size_of::<T>();
        let page_pa = pa.page_base(12);
        let offset = pa.page_offset(12) as usize;

        if offset + size > PAGE_SIZE {
            return Err(VmiError::NotSupported(
                "read_pod: value straddles a page boundary",
            ));
        }

        let page = self.read_page(page_pa)?;
        T::read_from_bytes(&page[offset..offset + size])
            .map_err(|_| VmiError::NotSupported("read_pod: slice length mismatch"))
    }

    /// Reads a little-endian `u16` at `pa`.
    pub fn read_u16(&self, pa: Pa) -> Result<u16, VmiError> {
        self.read_pod::<u16>(pa)
    }

    /// Reads a little-endian `u32` at `pa`.
    pub fn read_u32(&self, pa: Pa) -> Result<u32, VmiError> {
        self.read_pod::<u32>(pa)
    }

    /// Reads a little-endian `u64` at `pa`.
    pub fn read_u64(&self, pa: Pa) -> Result<u64, VmiError> {
        self.read_pod::<u64>(pa)
    }
}

/// A page-table walker for one paging mode.
///
/// Each walker is a pure function of `(dtb, vaddr)` plus whatever it reads
/// through [`Memory`]; it holds no state of its own; `self` is typically a
/// zero-sized unit struct, enabling the arch crates to hand out
/// `Box<dyn PagingWalker>` trait objects that the [`Instance`]
/// (crate::instance::Instance) selects once, at init, and never re-selects.
pub trait PagingWalker {
    /// The paging mode this walker implements.
    fn page_mode(&self) -> PageMode;

    /// Translates `vaddr` under `dtb`, filling in every intermediate
    /// descriptor consulted even when the walk ultimately fails.
    fn translate(&self, mem: &Memory<'_>, dtb: Pa, vaddr: crate::addr::Va)
    -> Result<PageInfo, VmiError>;

    /// Enumerates every present leaf mapping reachable from `dtb`.
    ///
    /// The sequence is finite but not guaranteed to be sorted. Walkers that
    /// do not implement enumeration (ARM, per §4.3) return an empty vector.
    fn enumerate(
        &self,
        mem: &Memory<'_>,
        dtb: Pa,
    ) -> Result<Vec<(crate::addr::Va, PageSize)>, VmiError>;
}
