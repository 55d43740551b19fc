//! Async abstraction layer for the Audioshelf core.
//!
//! Every `core-*` and `bridge-*` crate depends on this crate instead of
//! depending on Tokio directly. The re-exports keep the runtime choice in one
//! place, and the [`race`] module adds the timeout/cancellation composition the
//! synchronization engine is built on.
//!
//! # Modules
//!
//! - `task`: Task spawning, including the blocking pool used for file I/O
//! - `time`: Sleep, timeouts, intervals and wall-clock helpers
//! - `sync`: Locks, channels and `CancellationToken`
//! - `fs`: Async filesystem helpers
//! - `race`: "First of N wins, the rest are dropped" and deadline helpers
//!
//! # Examples
//!
//! ```rust
//! use core_async::race::{deadline, Outcome};
//! use core_async::time::Duration;
//!
//! async fn example() {
//!     let outcome = deadline(Duration::from_secs(1), async { 42 }).await;
//!     assert!(matches!(outcome, Outcome::Completed(42)));
//! }
//! ```

// Re-export the async entry-point/test macros so downstream crates never need
// direct Tokio dependencies.
pub use core_async_macros::{main, test};

// Lets `#[crate::test]` expand to `core_async::...` paths inside this crate.
extern crate self as core_async;

pub mod fs;
pub mod race;
pub mod runtime;
pub mod sync;
pub mod task;
pub mod time;

pub use task::spawn;
pub use time::{sleep, Duration, Instant};
