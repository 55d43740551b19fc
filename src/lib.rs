//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates. Host applications can depend on `audioshelf-workspace`
//! with `desktop-shims` enabled and reach the façade through
//! [`core_service`] without wiring each crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service;
