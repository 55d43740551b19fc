//! Task spawning and execution.
//!
//! - `spawn`: concurrent async work, returns an awaitable `JoinHandle`
//! - `spawn_blocking`: synchronous file I/O and parsing (directory walks,
//!   tag decoding) so the executor threads never stall
//!
//! # Examples
//!
//! ```rust
//! use core_async::task;
//!
//! async fn example() {
//!     let handle = task::spawn(async { 42 });
//!     assert_eq!(handle.await.unwrap(), 42);
//!
//!     let len = task::spawn_blocking(|| std::fs::read_dir(".").map(|d| d.count()))
//!         .await
//!         .unwrap();
//!     assert!(len.is_ok());
//! }
//! ```

pub use tokio::task::{spawn_blocking, yield_now, JoinError, JoinHandle, JoinSet};

/// Spawns a new asynchronous task on the Tokio runtime.
///
/// # Arguments
///
/// * `future` - The async computation to run
///
/// # Returns
///
/// A `JoinHandle` that can be awaited to get the task's result. Dropping the
/// handle detaches the task; it keeps running.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::task::spawn(future)
}

/// Result type for task operations.
pub type Result<T> = std::result::Result<T, JoinError>;
