//! Racing primitives.
//!
//! [`first_of`] is the single building block: it polls N contenders
//! concurrently, returns the first value produced and drops every other
//! contender. Dropping an async future is how cancellation happens in this
//! workspace, so losers stop at their next suspension point.
//!
//! [`deadline`] and [`deadline_or_cancel`] are the two compositions used by
//! metadata extraction and remote materialization: the operation races a timer
//! (and optionally a [`CancellationToken`]).
//!
//! Work that already moved to the blocking pool keeps running after its
//! awaiting future is dropped; callers that need the work itself to stop must
//! hand it a token and cancel that token when the race is lost.
//!
//! # Examples
//!
//! ```rust
//! use core_async::race::{deadline, Outcome};
//! use core_async::time::{sleep, Duration};
//!
//! async fn example() {
//!     let slow = async {
//!         sleep(Duration::from_secs(5)).await;
//!         "done"
//!     };
//!     let outcome = deadline(Duration::from_millis(10), slow).await;
//!     assert_eq!(outcome, Outcome::TimedOut);
//! }
//! ```

use std::future::Future;

use futures::future::{select_all, BoxFuture, FutureExt};

use crate::sync::CancellationToken;
use crate::time::{sleep, Duration};

/// Result of racing an operation against a timer and/or a cancellation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The operation finished first.
    Completed(T),
    /// The timer fired first; the operation was dropped.
    TimedOut,
    /// The token was cancelled first; the operation was dropped.
    Cancelled,
}

impl<T> Outcome<T> {
    /// Returns the value if the operation won the race.
    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }
}

/// Polls every contender concurrently and returns the first to finish.
///
/// The remaining contenders are dropped before this function returns.
///
/// # Returns
///
/// `Some((index, value))` with the index of the winning contender in the input
/// vector, or `None` when `contenders` is empty. When several contenders are
/// ready on the same poll, the one listed first wins.
pub async fn first_of<'a, T>(contenders: Vec<BoxFuture<'a, T>>) -> Option<(usize, T)> {
    if contenders.is_empty() {
        return None;
    }

    let (value, index, losers) = select_all(contenders).await;
    drop(losers);
    Some((index, value))
}

/// Races `operation` against a timer of length `limit`.
pub async fn deadline<'a, F>(limit: Duration, operation: F) -> Outcome<F::Output>
where
    F: Future + Send + 'a,
    F::Output: Send + 'a,
{
    let contenders: Vec<BoxFuture<'a, Outcome<F::Output>>> = vec![
        operation.map(Outcome::Completed).boxed(),
        sleep(limit).map(|_| Outcome::TimedOut).boxed(),
    ];

    match first_of(contenders).await {
        Some((_, outcome)) => outcome,
        None => Outcome::TimedOut,
    }
}

/// Races `operation` against a timer and a cancellation token.
///
/// A token that is already cancelled wins immediately without polling the
/// operation to completion.
pub async fn deadline_or_cancel<'a, F>(
    limit: Duration,
    token: &'a CancellationToken,
    operation: F,
) -> Outcome<F::Output>
where
    F: Future + Send + 'a,
    F::Output: Send + 'a,
{
    if token.is_cancelled() {
        return Outcome::Cancelled;
    }

    let contenders: Vec<BoxFuture<'a, Outcome<F::Output>>> = vec![
        operation.map(Outcome::Completed).boxed(),
        sleep(limit).map(|_| Outcome::TimedOut).boxed(),
        token.cancelled().map(|_| Outcome::Cancelled).boxed(),
    ];

    match first_of(contenders).await {
        Some((_, outcome)) => outcome,
        None => Outcome::Cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[crate::test]
    async fn first_of_returns_fastest_contender() {
        let contenders: Vec<BoxFuture<'static, &str>> = vec![
            async {
                sleep(Duration::from_millis(200)).await;
                "slow"
            }
            .boxed(),
            async {
                sleep(Duration::from_millis(5)).await;
                "fast"
            }
            .boxed(),
        ];

        let (index, value) = first_of(contenders).await.unwrap();
        assert_eq!(index, 1);
        assert_eq!(value, "fast");
    }

    #[crate::test]
    async fn first_of_empty_is_none() {
        let contenders: Vec<BoxFuture<'static, ()>> = Vec::new();
        assert!(first_of(contenders).await.is_none());
    }

    #[crate::test]
    async fn losers_are_dropped() {
        struct SetOnDrop(Arc<AtomicBool>);
        impl Drop for SetOnDrop {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicBool::new(false));
        let guard = SetOnDrop(dropped.clone());
        let loser = async move {
            let _guard = guard;
            sleep(Duration::from_secs(10)).await;
        };

        let outcome = deadline(Duration::from_millis(5), loser).await;
        assert_eq!(outcome, Outcome::TimedOut);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[crate::test]
    async fn deadline_completes_before_timer() {
        let outcome = deadline(Duration::from_secs(1), async { 7 }).await;
        assert_eq!(outcome, Outcome::Completed(7));
        assert_eq!(outcome.completed(), Some(7));
    }

    #[crate::test]
    async fn cancel_wins_over_pending_operation() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        crate::task::spawn(async move {
            sleep(Duration::from_millis(5)).await;
            trigger.cancel();
        });

        let outcome = deadline_or_cancel(
            Duration::from_secs(10),
            &token,
            sleep(Duration::from_secs(5)),
        )
        .await;
        assert_eq!(outcome, Outcome::Cancelled);
    }

    #[crate::test]
    async fn already_cancelled_token_short_circuits() {
        let token = CancellationToken::new();
        token.cancel();
        let outcome = deadline_or_cancel(Duration::from_secs(1), &token, async { 1 }).await;
        assert_eq!(outcome, Outcome::Cancelled);
    }
}
