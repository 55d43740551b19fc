//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the Audioshelf core:
//! - Logging and tracing infrastructure
//! - Configuration (catalog location, platform bridges, scan tuning)
//! - Event bus for scan, library and open events
//!
//! ## Overview
//!
//! Every other `core-*` crate depends on this one for its logging
//! conventions and event types; `core-service` turns a [`CoreConfig`] into a
//! running engine.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{CoreConfig, RemotePolicy, ScanTuning};
pub use error::{Error, Result};
