//! Synchronization primitives.
//!
//! Re-exports of `tokio::sync` (async-aware locks and channels) plus
//! [`CancellationToken`] from `tokio-util`, which is how scans and downloads
//! are cancelled cooperatively across the workspace.
//!
//! # Examples
//!
//! ```rust
//! use core_async::sync::{CancellationToken, Mutex};
//!
//! async fn example() {
//!     let mutex = Mutex::new(42);
//!     *mutex.lock().await += 1;
//!
//!     let token = CancellationToken::new();
//!     let child = token.child_token();
//!     token.cancel();
//!     assert!(child.is_cancelled());
//! }
//! ```

pub use tokio::sync::{
    broadcast, mpsc, oneshot, watch, Mutex, MutexGuard, Notify, OwnedSemaphorePermit, RwLock,
    RwLockReadGuard, RwLockWriteGuard, Semaphore, SemaphorePermit,
};

pub use tokio_util::sync::{CancellationToken, DropGuard, WaitForCancellationFuture};
