//! Core types and the introspection engine.
//!
//! This crate implements the architecture-agnostic half of the system: the
//! address newtypes, the error type, the five bounded caches, the page-aligned
//! physical-memory accessor every walker reads through, the `Driver`/
//! `PagingWalker`/`OsBackend` plugin traits, the config-file parser, and the
//! `Instance` façade that dispatches §4.6's public operations to whichever
//! plugins were installed at init.
//!
//! Architecture-specific walkers live in `vmi-arch-amd64`/`vmi-arch-arm`,
//! OS heuristics in `vmi-os-windows`/`vmi-os-linux`, and the one concrete,
//! in-scope `Driver` implementation in `vmi-driver-file`. The root `vmi`
//! crate wires them all together behind Cargo features.

mod addr;
pub mod arch;
pub mod cache;
pub mod config;
mod driver;
mod error;
mod instance;
pub mod os;
pub mod page;

pub use self::{
    addr::{Pa, Va},
    arch::{Memory, PageMode, PagingWalker},
    cache::{Caches, SymOwner},
    config::{Config, ConfigValue},
    driver::{Driver, PauseGuard, ReadOutcome, VcpuRegister},
    error::VmiError,
    instance::{ConfigSource, InitMode, Instance, InstancePauseGuard, InstanceState},
    os::{EngineView, OsBackend, OsKind},
    page::{LevelEntry, PageInfo, PageSize},
};
