//! Deadline and cancellation enforcement for dispatch.
//!
//! Dropping the inner future aborts the in-flight call; the connection guard
//! held by the caller is released either way.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Why a dispatch stopped before completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    TimedOut(Duration),
    Cancelled,
}

/// Run `fut` until it completes, `timeout` elapses or `cancel` fires.
pub async fn run_with_deadline<F>(
    fut: F,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<F::Output, Interrupted>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupted::Cancelled),
        res = tokio::time::timeout(timeout, fut) => res.map_err(|_| Interrupted::TimedOut(timeout)),
    }
}
