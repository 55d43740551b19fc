//! Time-related abstractions.
//!
//! Re-exports `tokio::time` for sleeping, timeouts and intervals, plus wall
//! clock helpers used for catalog timestamps.
//!
//! # Examples
//!
//! ```rust
//! use core_async::time::{sleep, Duration, Instant};
//!
//! async fn example() {
//!     let start = Instant::now();
//!     sleep(Duration::from_millis(10)).await;
//!     assert!(start.elapsed() >= Duration::from_millis(10));
//! }
//! ```

pub use tokio::time::{
    interval, sleep, sleep_until, timeout, Interval, MissedTickBehavior, Sleep, Timeout,
};

pub use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Returns the current time as milliseconds since UNIX_EPOCH.
///
/// Clocks set before the epoch report `0`.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Returns the current time as seconds since UNIX_EPOCH.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Converts a `SystemTime` into milliseconds since UNIX_EPOCH.
///
/// Times before the epoch map to a negative value, so ordering is preserved.
pub fn system_time_to_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_millis() as i64,
        Err(before) => -(before.duration().as_millis() as i64),
    }
}
