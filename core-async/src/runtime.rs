//! Runtime utilities that abstract over the underlying async executor.
//!
//! We wrap Tokio's runtime primitives so that downstream crates never need to
//! depend on Tokio directly.

pub use tokio::runtime::{Builder, Handle, Runtime};

/// Runs the provided future to completion on a fresh current-thread runtime.
///
/// Used by the `#[core_async::test]` and `#[core_async::main]` attributes.
/// The blocking pool is available, so `task::spawn_blocking` works inside.
pub fn block_on<F>(future: F) -> F::Output
where
    F: std::future::Future,
{
    Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("core_async::runtime::block_on: failed to build Tokio runtime")
        .block_on(future)
}
