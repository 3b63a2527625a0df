//! Error types returned by the introspection engine.

use crate::{addr::Va, page::LevelEntry};

/// An error that can occur while using the introspection engine.
#[derive(thiserror::Error, Debug)]
pub enum VmiError {
    /// An error occurred in the VMI driver.
    #[error(transparent)]
    Driver(Box<dyn std::error::Error + Send + Sync>),

    /// An OS-specific error occurred while resolving a symbol or walking a
    /// kernel structure.
    #[error(transparent)]
    Os(Box<dyn std::error::Error + Send + Sync>),

    /// An I/O error occurred, e.g. while loading a System.map or config file.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The instance is not far enough along its lifecycle for the requested
    /// operation (e.g. a symbol lookup before the OS has been identified).
    #[error("instance is not ready for this operation")]
    NotReady,

    /// A page-table walker found a descriptor marked not-present.
    ///
    /// `levels` carries every intermediate descriptor the walker consulted
    /// before giving up, per §4.3's "walkers must fill intermediate
    /// descriptor fields even on failure" rule, so callers can diagnose
    /// where the walk stopped without re-walking by hand.
    #[error("page not present for {vaddr:?}")]
    PageNotPresent {
        /// The virtual address being translated.
        vaddr: Va,
        /// Intermediate descriptors consulted so far (§4.3).
        levels: [Option<LevelEntry>; 4],
    },

    /// A page-table descriptor had reserved bits set.
    #[error("reserved bits set in descriptor at {vaddr:?}")]
    ReservedBitsSet {
        /// The virtual address being translated.
        vaddr: Va,
        /// Intermediate descriptors consulted so far (§4.3).
        levels: [Option<LevelEntry>; 4],
    },

    /// An IA-32e virtual address was not canonical (bits `[63:48]` are not a
    /// sign-extension of bit 47).
    #[error("non-canonical address {0:?}")]
    NonCanonical(Va),

    /// A read returned fewer bytes than requested because translation failed
    /// partway through a multi-page request. The bytes that were
    /// successfully read are returned alongside this error by the caller's
    /// wrapping `Result`'s `Ok` arm is not used here; see [`ShortRead`].
    ///
    /// [`ShortRead`]: Self::ShortRead
    #[error("short read: {got} of {requested} bytes")]
    ShortRead {
        /// The data that was actually read.
        data: Vec<u8>,
        /// The number of bytes actually read.
        got: usize,
        /// The number of bytes that were requested.
        requested: usize,
    },

    /// A symbol name was not found in the active symbol map or debugger
    /// block.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    /// No symbol map (System.map or KDBG) is loaded.
    #[error("no symbol map is loaded")]
    NoSymbolMap,

    /// The OS type could not be determined by any heuristic.
    #[error("unable to determine OS type")]
    UnknownOs,

    /// The page mode (paging scheme) could not be determined.
    #[error("unable to determine page mode")]
    UnknownPageMode,

    /// The configuration was missing a required key or contained
    /// contradictory keys.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A pid was not found in the pid→dtb cache or process list.
    #[error("unknown pid: {0}")]
    PidUnknown(u64),

    /// A usage error: the caller violated a documented precondition (e.g.
    /// supplying both `name` and `domid`).
    #[error("usage error: {0}")]
    UsageError(String),

    /// Operation not supported by the active driver or OS backend.
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    /// Double-initialization or destruction while a cached borrow is
    /// outstanding.
    #[error("fatal: {0}")]
    Fatal(&'static str),
}

impl VmiError {
    /// Wraps a driver-level error.
    pub fn driver(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Driver(Box::new(err))
    }

    /// Wraps an OS-level error.
    pub fn os(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Os(Box::new(err))
    }
}
