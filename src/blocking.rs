//! Blocking-work offload: handlers that need to call blocking code hop
//! onto a worker thread via [`tokio::task::spawn_blocking`] and the
//! cooperative task yields until the result (or the deadline) arrives.
//!
//! The number of blocking calls that may run at once is bounded by a
//! [`tokio::sync::Semaphore`] owned by [`BlockingLimiter`] and shared by
//! every `Client` on a server (one limiter per server instance, not per
//! connection).

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::Instant;

/// Bounds how many blocking calls may run concurrently across a server.
/// Cloning is cheap; every clone shares the same underlying permits.
#[derive(Clone)]
pub struct BlockingLimiter {
    semaphore: Arc<Semaphore>,
}

/// A server with no stated need for blocking-work offload still gets a
/// limiter with room for a modest default fan-out.
pub const DEFAULT_BLOCKING_CAPACITY: usize = 32;

impl Default for BlockingLimiter {
    fn default() -> Self {
        BlockingLimiter::new(DEFAULT_BLOCKING_CAPACITY)
    }
}

impl BlockingLimiter {
    pub fn new(capacity: usize) -> Self {
        BlockingLimiter {
            semaphore: Arc::new(Semaphore::new(capacity.max(1))),
        }
    }
}

#[derive(Debug, Error)]
pub enum BlockingError {
    #[error("blocking task cancelled at its deadline")]
    Cancelled,

    #[error("blocking task panicked: {0}")]
    Panicked(String),

    #[error("blocking task limiter was closed")]
    LimiterClosed,
}

/// Runs `f` on the blocking thread pool, gated by `limiter`'s capacity.
///
/// When `cancellable` is true and `deadline` is reached first, this
/// returns `Err(BlockingError::Cancelled)` without waiting for `f` to
/// finish (the spawned thread itself is not preemptible and keeps
/// running to completion in the background, since a cooperative runtime
/// can only cancel at a suspension point). When `cancellable` is false,
/// `deadline` is ignored and the call always waits for `f` to finish.
pub async fn run_sync_task<F, R>(
    limiter: &BlockingLimiter,
    f: F,
    cancellable: bool,
    deadline: Option<Instant>,
) -> Result<R, BlockingError>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let permit = limiter
        .semaphore
        .acquire()
        .await
        .map_err(|_| BlockingError::LimiterClosed)?;

    let task = tokio::task::spawn_blocking(f);

    let result = match (cancellable, deadline) {
        (true, Some(deadline)) => tokio::time::timeout_at(deadline, task)
            .await
            .map_err(|_| BlockingError::Cancelled)?,
        _ => task.await,
    };

    drop(permit);
    result.map_err(|err| BlockingError::Panicked(err.to_string()))
}

/// Convenience: run with no deadline and no early cancellation.
pub async fn run_sync<F, R>(limiter: &BlockingLimiter, f: F) -> Result<R, BlockingError>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    run_sync_task(limiter, f, false, None).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_blocking_closure_and_returns_its_value() {
        let limiter = BlockingLimiter::new(2);
        let result = run_sync(&limiter, || 2 + 2).await.unwrap();
        assert_eq!(result, 4);
    }

    #[tokio::test]
    async fn cancellable_task_times_out_at_deadline() {
        let limiter = BlockingLimiter::new(1);
        let deadline = Instant::now() + Duration::from_millis(20);
        let result = run_sync_task(
            &limiter,
            || std::thread::sleep(Duration::from_millis(200)),
            true,
            Some(deadline),
        )
        .await;
        assert!(matches!(result, Err(BlockingError::Cancelled)));
    }

    #[tokio::test]
    async fn non_cancellable_task_ignores_deadline() {
        let limiter = BlockingLimiter::new(1);
        let deadline = Instant::now() + Duration::from_millis(5);
        let result = run_sync_task(
            &limiter,
            || 1 + 1,
            false,
            Some(deadline),
        )
        .await
        .unwrap();
        assert_eq!(result, 2);
    }

    #[tokio::test]
    async fn limiter_serializes_access_beyond_capacity() {
        let limiter = BlockingLimiter::new(1);
        let a = run_sync(&limiter, || {
            std::thread::sleep(Duration::from_millis(10));
            1
        });
        let b = run_sync(&limiter, || 2);
        let (a, b) = tokio::join!(a, b);
        assert_eq!(a.unwrap(), 1);
        assert_eq!(b.unwrap(), 2);
    }
}
