//! The five bounded, LRU-evicted caches that sit between the façade and the
//! driver/walkers.
//!
//! Every cache obeys the same invalidation rule (§3 of the spec): an entry
//! stays valid until the guest is resumed or a caller explicitly flushes it.
//! [`Caches::flush_all`] is the single place that rule is enforced; it is
//! called from exactly one place in the façade — right after
//! [`Driver::resume`](crate::driver::Driver::resume) succeeds.

use std::{cell::RefCell, num::NonZeroUsize, rc::Rc};

use lru::LruCache;

use crate::addr::{Pa, Va};

/// Default capacity for each of the five caches, per the spec's data model.
pub const DEFAULT_CACHE_SIZE: usize = 25;

/// A page borrowed from the page cache. Immutable to consumers; the data is
/// shared (via `Rc`) with whatever cache slot produced it, so cloning this
/// is cheap and never copies the underlying bytes.
pub type BorrowedPage = Rc<[u8]>;

/// The namespace a cached symbol or RVA belongs to — distinguishes, e.g., a
/// kernel symbol from one resolved against a loaded module.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SymOwner {
    /// The kernel image itself (`ntoskrnl.exe`, `vmlinux`).
    Kernel,
    /// A named module or shared object loaded into the kernel or a process.
    Module(String),
}

/// A minimal bounded LRU map, shared by all five caches below.
struct BoundedCache<K, V> {
    inner: RefCell<LruCache<K, V>>,
}

impl<K, V> BoundedCache<K, V>
where
    K: std::hash::Hash + Eq,
{
    fn new(capacity: usize) -> Self {
        Self {
            inner: RefCell::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap()),
            )),
        }
    }

    fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.inner.borrow_mut().get(key).cloned()
    }

    fn insert(&self, key: K, value: V) {
        self.inner.borrow_mut().put(key, value);
    }

    fn remove(&self, key: &K) -> Option<V> {
        self.inner.borrow_mut().pop(key)
    }

    fn clear(&self) {
        self.inner.borrow_mut().clear();
    }

    fn len(&self) -> usize {
        self.inner.borrow().len()
    }
}

/// The page cache: page-aligned physical address → borrowed page bytes.
pub struct PageCache {
    inner: BoundedCache<Pa, BorrowedPage>,
}

impl PageCache {
    fn new(capacity: usize) -> Self {
        Self {
            inner: BoundedCache::new(capacity),
        }
    }

    /// Looks up a cached page. `pa` must already be page-aligned.
    pub fn get(&self, pa: Pa) -> Option<BorrowedPage> {
        self.inner.get(&pa)
    }

    /// Inserts a freshly read page.
    pub fn insert(&self, pa: Pa, page: BorrowedPage) {
        self.inner.insert(pa, page);
    }

    /// Evicts a single page, e.g. after a failed read that may have been
    /// caused by the page being remapped underneath us.
    pub fn invalidate(&self, pa: Pa) {
        self.inner.remove(&pa);
    }

    /// Number of pages currently cached.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if no pages are cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The pid cache: pid → directory table base.
pub struct PidCache {
    inner: BoundedCache<u64, Pa>,
}

impl PidCache {
    fn new(capacity: usize) -> Self {
        Self {
            inner: BoundedCache::new(capacity),
        }
    }

    /// Looks up the dtb for a cached pid.
    pub fn get(&self, pid: u64) -> Option<Pa> {
        self.inner.get(&pid)
    }

    /// Caches the dtb for a pid.
    pub fn insert(&self, pid: u64, dtb: Pa) {
        self.inner.insert(pid, dtb);
    }
}

/// The symbol cache: `(owner, symbol name)` → kernel virtual address.
pub struct SymCache {
    inner: BoundedCache<(SymOwner, String), Va>,
}

impl SymCache {
    fn new(capacity: usize) -> Self {
        Self {
            inner: BoundedCache::new(capacity),
        }
    }

    /// Looks up a cached symbol resolution.
    pub fn get(&self, owner: &SymOwner, symbol: &str) -> Option<Va> {
        self.inner.get(&(owner.clone(), symbol.to_owned()))
    }

    /// Caches a symbol resolution.
    pub fn insert(&self, owner: SymOwner, symbol: String, va: Va) {
        self.inner.insert((owner, symbol), va);
    }
}

/// The RVA cache: `(base VA, offset/field name)` → resolved VA.
pub struct RvaCache {
    inner: BoundedCache<(Va, String), Va>,
}

impl RvaCache {
    fn new(capacity: usize) -> Self {
        Self {
            inner: BoundedCache::new(capacity),
        }
    }

    /// Looks up a cached field/offset resolution relative to `base`.
    pub fn get(&self, base: Va, name: &str) -> Option<Va> {
        self.inner.get(&(base, name.to_owned()))
    }

    /// Caches a field/offset resolution.
    pub fn insert(&self, base: Va, name: String, resolved: Va) {
        self.inner.insert((base, name), resolved);
    }
}

/// The v2p cache: `(dtb, vaddr page)` → physical page address.
pub struct V2pCache {
    inner: BoundedCache<(Pa, u64), Pa>,
}

impl V2pCache {
    fn new(capacity: usize) -> Self {
        Self {
            inner: BoundedCache::new(capacity),
        }
    }

    /// Looks up a cached translation. `vaddr_page` must be shifted right by
    /// the page shift already (the key is independent of page size).
    pub fn get(&self, dtb: Pa, vaddr_page: u64) -> Option<Pa> {
        self.inner.get(&(dtb, vaddr_page))
    }

    /// Caches a translation result.
    pub fn insert(&self, dtb: Pa, vaddr_page: u64, paddr_page: Pa) {
        self.inner.insert((dtb, vaddr_page), paddr_page);
    }
}

/// The complete cache stack owned by an [`Instance`](crate::instance::Instance).
pub struct Caches {
    /// Physical page cache.
    pub page: PageCache,
    /// Pid → dtb cache.
    pub pid: PidCache,
    /// Symbol name → VA cache.
    pub sym: SymCache,
    /// Field/offset name → VA cache.
    pub rva: RvaCache,
    /// Virtual → physical page cache.
    pub v2p: V2pCache,
}

impl Caches {
    /// Creates the five caches, each with [`DEFAULT_CACHE_SIZE`] capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_SIZE)
    }

    /// Creates the five caches, each with the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            page: PageCache::new(capacity),
            pid: PidCache::new(capacity),
            sym: SymCache::new(capacity),
            rva: RvaCache::new(capacity),
            v2p: V2pCache::new(capacity),
        }
    }

    /// Flushes every cache. Called on every successful resume and available
    /// to callers who need to invalidate after a known guest-side change.
    pub fn flush_all(&self) {
        tracing::debug!("flushing all caches");
        self.page.inner.clear();
        self.pid.inner.clear();
        self.sym.inner.clear();
        self.rva.inner.clear();
        self.v2p.inner.clear();
    }
}

impl Default for Caches {
    fn default() -> Self {
        Self::new()
    }
}
