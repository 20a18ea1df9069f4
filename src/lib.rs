//! Workspace placeholder crate.
//!
//! This crate exposes shared feature flags that map to the individual
//! workspace crates. Host applications can depend on `gallery-workspace` and
//! enable `desktop-shims` to get the fully wired `core-service` facade without
//! listing each crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service;
